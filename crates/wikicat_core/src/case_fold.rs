//! Case-insensitive literal fragments for patterns that cannot use the `(?i)` flag.
//!
//! Category patterns mix a namespace part whose case policy comes from the wiki
//! configuration with a title part where only the first letter is insensitive.
//! Both halves live in one compiled regex, so folding is spelled out per
//! character instead of being delegated to the engine.

/// Regex fragment matching `text` with every cased character in either case.
///
/// Characters with a single-character upper and lower form become a class
/// (`A` -> `[Aa]`, `ä` -> `[Ää]`); everything else is emitted as an escaped
/// literal. Iteration is per `char`, so characters outside the Basic
/// Multilingual Plane are never split.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 4);
    for ch in text.chars() {
        push_folded(&mut out, ch);
    }
    out
}

/// Fold only the first character of `text` and escape the remainder.
pub fn fold_first(text: &str) -> String {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut out = String::with_capacity(text.len() + 4);
    push_folded(&mut out, first);
    out.push_str(&regex::escape(chars.as_str()));
    out
}

/// Escape `text` so it matches itself literally.
pub fn escape_literal(text: &str) -> String {
    regex::escape(text)
}

fn push_folded(out: &mut String, ch: char) {
    let upper = single_char(ch.to_uppercase());
    let lower = single_char(ch.to_lowercase());
    match (upper, lower) {
        (Some(upper), Some(lower)) if upper != lower => {
            // Cased letters are never regex metacharacters, so the class needs no escaping.
            out.push('[');
            out.push(upper);
            out.push(lower);
            if ch != upper && ch != lower {
                // titlecase digraphs such as U+01C5
                out.push(ch);
            }
            out.push(']');
        }
        _ => {
            let mut buffer = [0u8; 4];
            out.push_str(&regex::escape(ch.encode_utf8(&mut buffer)));
        }
    }
}

fn single_char(mut mapping: impl Iterator<Item = char>) -> Option<char> {
    let first = mapping.next()?;
    if mapping.next().is_some() {
        return None;
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::{escape_literal, fold, fold_first};

    fn anchored(fragment: &str) -> Regex {
        Regex::new(&format!("^(?:{fragment})$")).expect("fragment compiles")
    }

    #[test]
    fn ascii_letters_become_classes() {
        assert_eq!(fold("A"), "[Aa]");
        assert_eq!(fold("a"), "[Aa]");
        assert_eq!(fold("Foo"), "[Ff][Oo][Oo]");
    }

    #[test]
    fn non_ascii_letters_become_classes() {
        assert_eq!(fold("Ä"), "[Ää]");
        assert_eq!(fold("ä"), "[Ää]");
        assert_eq!(fold("Кат"), "[Кк][Аа][Тт]");
    }

    #[test]
    fn caseless_characters_are_escaped_literals() {
        assert_eq!(fold("_"), "_");
        assert_eq!(fold("€"), "€");
        assert_eq!(fold("7"), "7");
        assert_eq!(
            fold("\\{}()|.?*+-^$[]"),
            "\\\\\\{\\}\\(\\)\\|\\.\\?\\*\\+\\-\\^\\$\\[\\]"
        );
    }

    #[test]
    fn supplementary_plane_characters_stay_whole() {
        // U+1D11E MUSICAL SYMBOL G CLEF has no case
        assert_eq!(fold("\u{1D11E}"), "\u{1D11E}");
        // U+10C80 OLD HUNGARIAN CAPITAL LETTER A pairs with U+10CC0
        assert_eq!(fold("\u{10C80}"), "[\u{10C80}\u{10CC0}]");
        assert_eq!(fold("\u{10CC0}"), "[\u{10C80}\u{10CC0}]");
    }

    #[test]
    fn multi_character_mappings_fall_back_to_literal() {
        // 'ß' upper-cases to "SS"
        assert_eq!(fold("ß"), "ß");
    }

    #[test]
    fn titlecase_digraph_matches_all_three_forms() {
        let pattern = anchored(&fold("\u{01C5}"));
        for candidate in ["\u{01C4}", "\u{01C5}", "\u{01C6}"] {
            assert!(pattern.is_match(candidate), "{candidate:?}");
        }
    }

    #[test]
    fn folded_letter_matches_both_cases_and_nothing_else() {
        for (upper, lower) in [('A', 'a'), ('Ä', 'ä'), ('Ω', 'ω'), ('Ж', 'ж')] {
            let pattern = anchored(&fold(&upper.to_string()));
            assert!(pattern.is_match(&upper.to_string()));
            assert!(pattern.is_match(&lower.to_string()));
            assert!(!pattern.is_match("x"));
            assert!(!pattern.is_match(&format!("{upper}{lower}")));
        }
    }

    #[test]
    fn folded_symbols_only_match_themselves() {
        for symbol in [".", "*", "(", "]", "|", "1", "-"] {
            let pattern = anchored(&fold(symbol));
            assert!(pattern.is_match(symbol));
            assert!(!pattern.is_match("a"));
        }
    }

    #[test]
    fn fold_first_leaves_the_tail_case_sensitive() {
        assert_eq!(fold_first("foo.bar"), "[Ff]oo\\.bar");
        assert_eq!(fold_first(""), "");
        let pattern = anchored(&fold_first("Ääa"));
        assert!(pattern.is_match("Ääa"));
        assert!(pattern.is_match("ääa"));
        assert!(!pattern.is_match("ÄÄa"));
    }

    #[test]
    fn escape_literal_round_trips_through_the_engine() {
        let text = "a+b (c)";
        assert!(anchored(&escape_literal(text)).is_match(text));
    }
}
