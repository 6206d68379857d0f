//! Category add / rename / remove over raw page text.
//!
//! Every operation masks comments and `<nowiki>` blocks first, so links inside
//! them are neither found nor rewritten, and restores them on success. A
//! failure returns no text at all.

use tracing::debug;

use crate::error::{EditFailure, EditResult};
use crate::mask::with_masked;
use crate::matcher::LinkPattern;
use crate::title::{CategoryRef, NamespaceAliasSet, same_category};

#[derive(Debug, Clone, Default)]
pub struct PageTextEditor {
    namespaces: NamespaceAliasSet,
}

impl PageTextEditor {
    pub fn new(namespaces: NamespaceAliasSet) -> Self {
        Self { namespaces }
    }

    pub fn namespaces(&self) -> &NamespaceAliasSet {
        &self.namespaces
    }

    /// Append `[[Category:Name|sort]]` on its own line at the end of `text`.
    ///
    /// `existing` is the list of categories already shown for the page; the
    /// identical rendered link appearing in live text is refused as well.
    pub fn add(&self, text: &str, category: &CategoryRef, existing: &[String]) -> EditResult<String> {
        if existing
            .iter()
            .any(|name| same_category(name, &category.name, &self.namespaces))
        {
            return Err(EditFailure::duplicate(&category.name));
        }
        let link = category.render_link(&self.namespaces);
        with_masked(text, |masked| {
            if masked.contains(&link) {
                return Err(EditFailure::duplicate(&category.name));
            }
            let mut out = String::with_capacity(masked.len() + link.len() + 2);
            out.push_str(masked);
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&link);
            out.push('\n');
            Ok(out)
        })
    }

    /// Rewrite the first link to `old_name` as a link to `new_category`.
    ///
    /// Further links to `old_name` are treated as accidental duplicates and
    /// removed. The sort key comes from `new_category` when it has one and is
    /// otherwise carried over from the first link.
    pub fn edit(&self, text: &str, old_name: &str, new_category: &CategoryRef) -> EditResult<String> {
        let pattern = LinkPattern::build(old_name, &self.namespaces, false)?;
        with_masked(text, |masked| {
            let matches = pattern.find_all(masked);
            let Some(first) = matches.first() else {
                return Err(EditFailure::not_found(old_name));
            };
            let suffix = match new_category.sort_key {
                Some(_) => new_category.sort_key_suffix(),
                None => first.suffix.unwrap_or_default().to_string(),
            };
            if matches.len() > 1 {
                debug!(
                    category = old_name,
                    duplicates = matches.len() - 1,
                    "removing duplicate category links"
                );
            }

            let mut out = String::with_capacity(masked.len());
            out.push_str(&masked[..first.range.start]);
            out.push_str("[[");
            out.push_str(&new_category.full_title(&self.namespaces));
            out.push_str(&suffix);
            out.push_str("]]");
            let mut cursor = first.range.end;
            for duplicate in &matches[1..] {
                out.push_str(&masked[cursor..duplicate.range.start]);
                cursor = if starts_line(masked, duplicate.range.start) {
                    line_break_end(masked, duplicate.range.end)
                } else {
                    duplicate.range.end
                };
            }
            out.push_str(&masked[cursor..]);
            Ok(out)
        })
    }

    /// Remove every link to `category_name`, together with its own line break.
    pub fn delete(&self, text: &str, category_name: &str) -> EditResult<String> {
        let pattern = LinkPattern::build(category_name, &self.namespaces, true)?;
        with_masked(text, |masked| {
            let replaced = pattern.replace_all(masked, "");
            if replaced == masked {
                return Err(EditFailure::not_found(category_name));
            }
            Ok(replaced.into_owned())
        })
    }
}

fn starts_line(text: &str, offset: usize) -> bool {
    offset == 0 || text[..offset].ends_with('\n')
}

fn line_break_end(text: &str, offset: usize) -> usize {
    let rest = &text[offset..];
    let trimmed = rest.trim_start_matches([' ', '\t', '\r']);
    let mut end = offset + (rest.len() - trimmed.len());
    if trimmed.starts_with('\n') {
        end += 1;
    }
    end
}
