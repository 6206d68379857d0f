//! Hiding `<nowiki>` blocks and HTML comments from the category rewriter.

use std::sync::LazyLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::{Captures, Regex};
use tracing::debug;

pub const SESSION_ID_LENGTH: usize = 32;

static PROTECTED_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<nowiki>.*?</nowiki>|<!--.*?-->").expect("compile protected span regex")
});

/// One span taken out of the page text, keyed by its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRegion {
    pub placeholder_key: String,
    pub original_text: String,
}

/// The regions removed by one masking pass.
///
/// Placeholders have the form `<session_id>-<ordinal>`, ordinals counting from
/// zero in order of discovery. The session id is random, so a placeholder
/// colliding with real page text is not expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSession {
    session_id: String,
    regions: Vec<ProtectedRegion>,
}

impl MaskSession {
    pub fn mask(text: &str, session_id: impl Into<String>) -> (String, Self) {
        let session_id = session_id.into();
        let mut regions = Vec::new();
        let masked = PROTECTED_SPAN.replace_all(text, |captures: &Captures<'_>| {
            let placeholder_key = format!("{session_id}-{}", regions.len());
            regions.push(ProtectedRegion {
                placeholder_key: placeholder_key.clone(),
                original_text: captures[0].to_string(),
            });
            placeholder_key
        });
        debug!(regions = regions.len(), "masked protected regions");
        (masked.into_owned(), Self { session_id, regions })
    }

    pub fn mask_with_random_id(text: &str) -> (String, Self) {
        Self::mask(text, generate_session_id())
    }

    /// Put every masked span back in place of its placeholder.
    pub fn unmask(&self, text: &str) -> String {
        let mut out = text.to_string();
        // Highest ordinal first so that `id-1` never eats the prefix of `id-10`.
        for region in self.regions.iter().rev() {
            out = out.replacen(&region.placeholder_key, &region.original_text, 1);
        }
        out
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn regions(&self) -> &[ProtectedRegion] {
        &self.regions
    }
}

/// Run `transform` over the masked form of `text` and restore the result.
///
/// When `transform` fails nothing is returned, so there is nothing to restore.
pub fn with_masked<E>(
    text: &str,
    transform: impl FnOnce(&str) -> Result<String, E>,
) -> Result<String, E> {
    let (masked, session) = MaskSession::mask_with_random_id(text);
    let transformed = transform(&masked)?;
    Ok(session.unmask(&transformed))
}

pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LENGTH)
        .map(char::from)
        .collect()
}
