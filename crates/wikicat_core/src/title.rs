use serde::Serialize;

use crate::error::{EditFailure, EditResult};

pub const NS_CATEGORY: i32 = 14;
pub const DEFAULT_CATEGORY_NAMESPACE: &str = "Category";

/// All names that select the category namespace on one wiki.
///
/// The first alias is the one used when rendering new links. Duplicates are
/// dropped on construction while keeping first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceAliasSet {
    aliases: Vec<String>,
    case_sensitive: bool,
}

impl NamespaceAliasSet {
    pub fn new<I, S>(aliases: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for alias in aliases {
            let alias = normalize_spaces(&alias.as_ref().replace('_', " "));
            if alias.is_empty() {
                continue;
            }
            let seen = out.iter().any(|existing| {
                if case_sensitive {
                    *existing == alias
                } else {
                    existing.to_lowercase() == alias.to_lowercase()
                }
            });
            if !seen {
                out.push(alias);
            }
        }
        if out.is_empty() {
            out.push(DEFAULT_CATEGORY_NAMESPACE.to_string());
        }
        Self {
            aliases: out,
            case_sensitive,
        }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn display_name(&self) -> &str {
        &self.aliases[0]
    }

    /// Return the part after `<alias>:` when `title` starts with a category prefix.
    pub fn strip_prefix<'a>(&self, title: &'a str) -> Option<&'a str> {
        let (prefix, rest) = title.split_once(':')?;
        let prefix = normalize_spaces(&prefix.replace('_', " "));
        let matched = self.aliases.iter().any(|alias| {
            if self.case_sensitive {
                *alias == prefix
            } else {
                alias.to_lowercase() == prefix.to_lowercase()
            }
        });
        matched.then_some(rest)
    }
}

impl Default for NamespaceAliasSet {
    fn default() -> Self {
        Self::new([DEFAULT_CATEGORY_NAMESPACE], false)
    }
}

/// A category as the engine sees it: canonical name plus optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRef {
    pub name: String,
    pub namespace_id: i32,
    pub sort_key: Option<String>,
}

impl CategoryRef {
    pub fn new(raw_name: &str, namespaces: &NamespaceAliasSet) -> EditResult<Self> {
        let name = normalize_category_name(raw_name, namespaces);
        if name.is_empty() {
            return Err(EditFailure::invalid_title(raw_name));
        }
        Ok(Self {
            name,
            namespace_id: NS_CATEGORY,
            sort_key: None,
        })
    }

    /// Parse user input of the form `Name` or `Name|sort key`.
    pub fn parse_input(input: &str, namespaces: &NamespaceAliasSet) -> EditResult<Self> {
        let (name, sort_key) = match input.split_once('|') {
            Some((name, sort_key)) => (name, Some(sort_key)),
            None => (input, None),
        };
        let category = Self::new(name, namespaces)?;
        Ok(category.with_sort_key(sort_key))
    }

    pub fn with_sort_key(mut self, sort_key: Option<&str>) -> Self {
        self.sort_key = sort_key
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        self
    }

    /// Wikitext between `[[Category:Name` and `]]`.
    pub fn sort_key_suffix(&self) -> String {
        match &self.sort_key {
            Some(sort_key) => format!("|{sort_key}"),
            None => String::new(),
        }
    }

    pub fn full_title(&self, namespaces: &NamespaceAliasSet) -> String {
        format!("{}:{}", namespaces.display_name(), self.name)
    }

    pub fn render_link(&self, namespaces: &NamespaceAliasSet) -> String {
        format!(
            "[[{}{}]]",
            self.full_title(namespaces),
            self.sort_key_suffix()
        )
    }
}

/// Canonical category name: no namespace prefix, spaces instead of
/// underscores, single spaces, illegal characters removed, and an upper-case
/// first letter unless the namespace is case-sensitive.
pub fn normalize_category_name(raw: &str, namespaces: &NamespaceAliasSet) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !is_illegal_title_char(*ch))
        .map(|ch| if ch == '_' { ' ' } else { ch })
        .collect();
    let mut name = normalize_spaces(&cleaned);
    if let Some(stripped) = name.strip_prefix(':') {
        name = stripped.trim_start().to_string();
    }
    if let Some(rest) = namespaces.strip_prefix(&name) {
        name = rest.trim().to_string();
    }
    if namespaces.case_sensitive() {
        name
    } else {
        upper_first(&name)
    }
}

/// Whether two names denote the same category under the namespace's rules.
pub fn same_category(left: &str, right: &str, namespaces: &NamespaceAliasSet) -> bool {
    normalize_category_name(left, namespaces) == normalize_category_name(right, namespaces)
}

/// Strip everything a prefix search cannot contain, whitespace included.
pub fn clean_prefix(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !is_illegal_title_char(*ch) && !ch.is_whitespace())
        .collect()
}

fn is_illegal_title_char(ch: char) -> bool {
    ch.is_control() || matches!(ch, '#' | '<' | '>' | '[' | ']' | '{' | '|' | '}')
}

fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}
