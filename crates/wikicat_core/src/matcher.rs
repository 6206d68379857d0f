//! Compiled patterns for `[[Category:Name|sort key]]` links.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::case_fold::{escape_literal, fold, fold_first};
use crate::error::{EditFailure, EditResult};
use crate::mask::MaskSession;
use crate::title::{CategoryRef, NamespaceAliasSet};

const TRAILING_LINE_BREAK: &str = r"[ \t\r]*\n?";

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ _]+").expect("compile space run regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkPatternParts {
    pub category_name: String,
    pub namespaces: NamespaceAliasSet,
    pub match_trailing_newline: bool,
}

/// A matcher for every link to one category.
///
/// Group 1 captures the namespace text as written, group 2 the optional `|sort key`
/// suffix. Case folding is written into the pattern itself; the regex is
/// compiled without `(?i)`.
#[derive(Debug, Clone)]
pub struct LinkPattern {
    parts: LinkPatternParts,
    regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch<'t> {
    pub range: Range<usize>,
    pub text: &'t str,
    pub namespace: &'t str,
    pub suffix: Option<&'t str>,
}

impl LinkMatch<'_> {
    pub fn sort_key(&self) -> Option<&str> {
        self.suffix.and_then(|suffix| suffix.strip_prefix('|'))
    }
}

impl LinkPattern {
    pub fn build(
        category_name: &str,
        namespaces: &NamespaceAliasSet,
        match_trailing_newline: bool,
    ) -> EditResult<Self> {
        let mut source = format!(
            r"\[\[({})[ _]*:[ _]*{}[ _]*(\|[^\]]*)?\]\]",
            namespace_alternation(namespaces),
            title_fragment(category_name)
        );
        if match_trailing_newline {
            source.push_str(TRAILING_LINE_BREAK);
        }
        let regex = Regex::new(&source).map_err(|error| {
            warn!(category = category_name, %error, "category pattern failed to compile");
            EditFailure::invalid_title(category_name)
        })?;
        debug!(category = category_name, pattern = %source, "compiled category pattern");

        Ok(Self {
            parts: LinkPatternParts {
                category_name: category_name.to_string(),
                namespaces: namespaces.clone(),
                match_trailing_newline,
            },
            regex,
        })
    }

    pub fn parts(&self) -> &LinkPatternParts {
        &self.parts
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn find_all<'t>(&self, text: &'t str) -> Vec<LinkMatch<'t>> {
        self.regex
            .captures_iter(text)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                Some(LinkMatch {
                    range: whole.range(),
                    text: whole.as_str(),
                    namespace: captures.get(1).map_or("", |group| group.as_str()),
                    suffix: captures.get(2).map(|group| group.as_str()),
                })
            })
            .collect()
    }

    pub fn replace_all<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        self.regex.replace_all(text, NoExpand(replacement))
    }
}

/// Every category link in `text` outside comments and `<nowiki>` blocks,
/// in source order.
pub fn scan_categories(text: &str, namespaces: &NamespaceAliasSet) -> Vec<CategoryRef> {
    let source = format!(
        r"\[\[({})[ _]*:([^\]|]+)(\|[^\]]*)?\]\]",
        namespace_alternation(namespaces)
    );
    let Ok(regex) = Regex::new(&source) else {
        return Vec::new();
    };
    let (masked, _session) = MaskSession::mask_with_random_id(text);
    regex
        .captures_iter(&masked)
        .filter_map(|captures| {
            let name = captures.get(2)?.as_str();
            let sort_key = captures
                .get(3)
                .map(|suffix| suffix.as_str().trim_start_matches('|'));
            CategoryRef::new(name, namespaces)
                .ok()
                .map(|category| category.with_sort_key(sort_key))
        })
        .collect()
}

fn namespace_alternation(namespaces: &NamespaceAliasSet) -> String {
    namespaces
        .aliases()
        .iter()
        .map(|alias| {
            let fragment = if namespaces.case_sensitive() {
                escape_literal(alias)
            } else {
                fold(alias)
            };
            space_equivalent(&fragment)
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn title_fragment(category_name: &str) -> String {
    space_equivalent(&fold_first(category_name))
}

// Escaping never touches ' ' or '_', so every run of them in a fragment is literal title text.
fn space_equivalent(fragment: &str) -> String {
    SPACE_RUN.replace_all(fragment, NoExpand("[ _]+")).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{LinkPattern, scan_categories};
    use crate::title::NamespaceAliasSet;

    fn german() -> NamespaceAliasSet {
        NamespaceAliasSet::new(["Kategorie", "Category"], false)
    }

    const GERMAN_NS: &str = "[Kk][Aa][Tt][Ee][Gg][Oo][Rr][Ii][Ee]|[Cc][Aa][Tt][Ee][Gg][Oo][Rr][Yy]";

    #[test]
    fn builds_expected_source() {
        let pattern = LinkPattern::build("Foo Bar", &german(), false).expect("build");
        assert_eq!(
            pattern.as_str(),
            format!(r"\[\[({GERMAN_NS})[ _]*:[ _]*[Ff]oo[ _]+Bar[ _]*(\|[^\]]*)?\]\]")
        );
    }

    #[test]
    fn only_first_title_letter_is_folded() {
        let pattern = LinkPattern::build("ÄÄä", &german(), false).expect("build");
        assert!(pattern.as_str().contains("[ _]*[Ää]Ää[ _]*"));
    }

    #[test]
    fn supplementary_title_characters_survive() {
        let name = "\u{1D11E}\u{1D11E}";
        let pattern = LinkPattern::build(name, &german(), false).expect("build");
        assert!(pattern.as_str().contains(name));
        assert!(pattern.is_match("[[Category:\u{1D11E}\u{1D11E}]]"));
    }

    #[test]
    fn case_sensitive_namespace_is_escaped_not_folded() {
        let set = NamespaceAliasSet::new(["Category"], true);
        let pattern = LinkPattern::build("Foo", &set, false).expect("build");
        assert!(pattern.as_str().starts_with(r"\[\[(Category)"));
        assert!(pattern.is_match("[[Category:foo]]"));
        assert!(!pattern.is_match("[[category:Foo]]"));
    }

    #[test]
    fn matches_alias_case_and_space_variants() {
        let pattern = LinkPattern::build("Foo Bar", &german(), false).expect("build");
        for text in [
            "[[Category:Foo Bar]]",
            "[[category:foo_Bar]]",
            "[[KATEGORIE : Foo__Bar ]]",
            "[[Kategorie:Foo  Bar|sort]]",
            "[[Category_:_Foo Bar]]",
        ] {
            assert_eq!(pattern.find_all(text).len(), 1, "{text}");
        }
        for text in [
            "[[Category:Foo Baz]]",
            "[[Category:FooBar]]",
            "[[Template:Foo Bar]]",
            "[[Category:Foo bar]]",
        ] {
            assert!(!pattern.is_match(text), "{text}");
        }
    }

    #[test]
    fn captures_namespace_and_sort_key() {
        let pattern = LinkPattern::build("Foo", &german(), false).expect("build");
        let matches = pattern.find_all("x [[kategorie:Foo|Sort Key]] y [[Category:Foo]]");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].namespace, "kategorie");
        assert_eq!(matches[0].suffix, Some("|Sort Key"));
        assert_eq!(matches[0].sort_key(), Some("Sort Key"));
        assert_eq!(matches[1].suffix, None);
        assert_eq!(matches[1].text, "[[Category:Foo]]");
    }

    #[test]
    fn single_link_yields_single_match() {
        let pattern = LinkPattern::build("Old", &NamespaceAliasSet::default(), false)
            .expect("build");
        let text = "Some text.\n[[Category:Old]]\n";
        let matches = pattern.find_all(text);
        assert_eq!(matches.len(), 1);
        assert_eq!(&text[matches[0].range.clone()], "[[Category:Old]]");
    }

    #[test]
    fn trailing_newline_mode_consumes_one_line_break() {
        let pattern =
            LinkPattern::build("Old", &NamespaceAliasSet::default(), true).expect("build");
        let text = "a\n[[Category:Old]] \t\r\n\nb";
        let matches = pattern.find_all(text);
        assert_eq!(matches[0].text, "[[Category:Old]] \t\r\n");
        assert_eq!(pattern.replace_all(text, ""), "a\n\nb");
        assert!(pattern.parts().match_trailing_newline);
    }

    #[test]
    fn replacement_text_is_not_expanded() {
        let pattern = LinkPattern::build("A", &NamespaceAliasSet::default(), false)
            .expect("build");
        assert_eq!(pattern.replace_all("[[Category:A]]", "$1"), "$1");
    }

    #[test]
    fn regex_metacharacters_in_names_are_literal() {
        let pattern = LinkPattern::build("C++ (language)", &NamespaceAliasSet::default(), false)
            .expect("build");
        assert!(pattern.is_match("[[Category:C++ (language)]]"));
        assert!(!pattern.is_match("[[Category:CCC (language)]]"));
    }

    #[test]
    fn scan_lists_live_categories_only() {
        let text = "[[Category:Alpha]]\n<!-- [[Category:Hidden]] -->\n[[kategorie:beta_gamma|key]]\n[[Beta]]";
        let found = scan_categories(text, &german());
        let names: Vec<_> = found.iter().map(|category| category.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta gamma"]);
        assert_eq!(found[1].sort_key.as_deref(), Some("key"));
    }
}
