//! Locale records: one source string plus its translations, shared by every
//! document that references it.
//!
//! ```text
//! { id: "…", strings: [ { lang: "--", text: "A locale" }, { lang: "ca", text: "Un local" } ],
//!   refs: ["<doc id>", "<type id>"] }
//! ```

pub mod backend;
pub mod slots;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use backend::{LocaleBackend, LocaleFilter, MemoryBackend};
pub use store::{LocaleStore, TypeDumpOptions};

/// Language tag marking the original, untranslated text of a locale.
pub const SOURCE_LANG: &str = "--";

/// Opaque locale identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleId(String);

impl LocaleId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LocaleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for LocaleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for LocaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One language entry of a locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleString {
    pub lang: String,
    pub text: String,
    /// Free-form provenance supplied by the caller.
    #[serde(default)]
    pub extra: String,
}

impl LocaleString {
    pub fn new(lang: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            text: text.into(),
            extra: String::new(),
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }
}

/// A persisted locale record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub id: LocaleId,
    pub strings: Vec<LocaleString>,
    #[serde(default)]
    pub refs: Vec<String>,
}

impl Locale {
    pub fn string(&self, lang: &str) -> Option<&LocaleString> {
        self.strings.iter().find(|s| s.lang == lang)
    }

    pub fn text(&self, lang: &str) -> Option<&str> {
        self.string(lang).map(|s| s.text.as_str())
    }

    pub fn has_lang(&self, lang: &str) -> bool {
        self.string(lang).is_some()
    }

    /// Source text, `""` when the record has no `"--"` entry.
    pub fn source_text(&self) -> &str {
        self.text(SOURCE_LANG).unwrap_or_default()
    }

    pub fn has_ref(&self, reference: &str) -> bool {
        self.refs.iter().any(|r| r == reference)
    }

    /// Replace the entry for each incoming language, append the others.
    pub fn merge_strings(&mut self, incoming: &[LocaleString]) {
        for string in incoming {
            match self.strings.iter_mut().find(|s| s.lang == string.lang) {
                Some(existing) => *existing = string.clone(),
                None => self.strings.push(string.clone()),
            }
        }
    }

    /// Copy of the record with strings narrowed to `lang`.
    pub fn narrowed(&self, lang: &str) -> Locale {
        Locale {
            id: self.id.clone(),
            strings: self
                .strings
                .iter()
                .filter(|s| s.lang == lang)
                .cloned()
                .collect(),
            refs: self.refs.clone(),
        }
    }
}

/// Locale payload that has not been resolved against the store yet: either a
/// fresh one-language value or an explicit override carrying an `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<LocaleId>,
    #[serde(default)]
    pub strings: Vec<LocaleString>,
    #[serde(default)]
    pub refs: Vec<String>,
}

impl LocaleDraft {
    /// One-language draft, `"--"` when `lang` is `None`.
    pub fn text(text: impl Into<String>, lang: Option<&str>) -> Self {
        Self {
            id: None,
            strings: vec![LocaleString::new(lang.unwrap_or(SOURCE_LANG), text)],
            refs: Vec::new(),
        }
    }

    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        if !self.refs.contains(&reference) {
            self.refs.push(reference);
        }
        self
    }
}

impl From<Locale> for LocaleDraft {
    fn from(locale: Locale) -> Self {
        Self {
            id: Some(locale.id),
            strings: locale.strings,
            refs: locale.refs,
        }
    }
}

/// Grouping tag ("client", "server", …) placed in locale refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleType {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A language seen by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub lang: String,
    #[serde(default)]
    pub display_name: String,
}
