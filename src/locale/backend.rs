//! Storage seam for locale, locale-type and language records.

use parking_lot::RwLock;

use super::{Language, Locale, LocaleId, LocaleType};
use crate::error::StoreError;

/// Record selection understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocaleFilter<'a> {
    /// Any string with this text, optionally restricted to one language.
    Text { text: &'a str, lang: Option<&'a str> },
    /// Records whose refs contain the value.
    Ref(&'a str),
    /// Records holding at least one empty translation.
    MissingText,
    All,
}

impl LocaleFilter<'_> {
    pub fn matches(&self, locale: &Locale) -> bool {
        match *self {
            LocaleFilter::Text { text, lang } => locale
                .strings
                .iter()
                .any(|s| s.text == text && lang.map_or(true, |l| s.lang == l)),
            LocaleFilter::Ref(reference) => locale.has_ref(reference),
            LocaleFilter::MissingText => locale.strings.iter().any(|s| s.text.is_empty()),
            LocaleFilter::All => true,
        }
    }
}

/// Persistence collaborator of the locale store.
///
/// Results of `find_locales` come back in creation order. `find_or_insert_type`
/// must be atomic: two concurrent calls for one `kind` yield the same record.
pub trait LocaleBackend: Send + Sync {
    fn find_locale(&self, id: &LocaleId) -> Result<Option<Locale>, StoreError>;
    fn find_locales(&self, filter: LocaleFilter<'_>) -> Result<Vec<Locale>, StoreError>;
    fn insert_locale(&self, locale: &Locale) -> Result<(), StoreError>;
    /// Overwrite an existing record. `false` when no record has that id.
    fn replace_locale(&self, locale: &Locale) -> Result<bool, StoreError>;
    fn delete_locale(&self, id: &LocaleId) -> Result<bool, StoreError>;

    fn find_or_insert_type(&self, kind: &str) -> Result<LocaleType, StoreError>;
    fn find_type(&self, kind: &str) -> Result<Option<LocaleType>, StoreError>;
    fn list_types(&self) -> Result<Vec<LocaleType>, StoreError>;

    fn upsert_language(&self, language: &Language) -> Result<(), StoreError>;
    /// All languages, sorted by code.
    fn languages(&self) -> Result<Vec<Language>, StoreError>;
}

#[derive(Default)]
struct MemoryTables {
    locales: Vec<Locale>,
    types: Vec<LocaleType>,
    languages: Vec<Language>,
}

/// Process-local backend for tests and embedding.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<MemoryTables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocaleBackend for MemoryBackend {
    fn find_locale(&self, id: &LocaleId) -> Result<Option<Locale>, StoreError> {
        Ok(self.tables.read().locales.iter().find(|l| &l.id == id).cloned())
    }

    fn find_locales(&self, filter: LocaleFilter<'_>) -> Result<Vec<Locale>, StoreError> {
        Ok(self
            .tables
            .read()
            .locales
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }

    fn insert_locale(&self, locale: &Locale) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.locales.iter().any(|l| l.id == locale.id) {
            return Err(StoreError::Backend(format!("duplicate locale id {}", locale.id)));
        }
        tables.locales.push(locale.clone());
        Ok(())
    }

    fn replace_locale(&self, locale: &Locale) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.locales.iter_mut().find(|l| l.id == locale.id) {
            Some(existing) => {
                *existing = locale.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_locale(&self, id: &LocaleId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let before = tables.locales.len();
        tables.locales.retain(|l| &l.id != id);
        Ok(tables.locales.len() != before)
    }

    fn find_or_insert_type(&self, kind: &str) -> Result<LocaleType, StoreError> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.types.iter().find(|t| t.kind == kind) {
            return Ok(existing.clone());
        }
        let created = LocaleType {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
        };
        tables.types.push(created.clone());
        Ok(created)
    }

    fn find_type(&self, kind: &str) -> Result<Option<LocaleType>, StoreError> {
        Ok(self.tables.read().types.iter().find(|t| t.kind == kind).cloned())
    }

    fn list_types(&self) -> Result<Vec<LocaleType>, StoreError> {
        Ok(self.tables.read().types.clone())
    }

    fn upsert_language(&self, language: &Language) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.languages.iter_mut().find(|l| l.lang == language.lang) {
            Some(existing) => *existing = language.clone(),
            None => tables.languages.push(language.clone()),
        }
        Ok(())
    }

    fn languages(&self) -> Result<Vec<Language>, StoreError> {
        let mut languages = self.tables.read().languages.clone();
        languages.sort_by(|a, b| a.lang.cmp(&b.lang));
        Ok(languages)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Memory backend that fails every call while `failing` is set.
    #[derive(Default)]
    pub(crate) struct FlakyBackend {
        pub(crate) inner: MemoryBackend,
        pub(crate) failing: AtomicBool,
    }

    impl FlakyBackend {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("database unavailable".into()));
            }
            Ok(())
        }
    }

    impl LocaleBackend for FlakyBackend {
        fn find_locale(&self, id: &LocaleId) -> Result<Option<Locale>, StoreError> {
            self.check()?;
            self.inner.find_locale(id)
        }

        fn find_locales(&self, filter: LocaleFilter<'_>) -> Result<Vec<Locale>, StoreError> {
            self.check()?;
            self.inner.find_locales(filter)
        }

        fn insert_locale(&self, locale: &Locale) -> Result<(), StoreError> {
            self.check()?;
            self.inner.insert_locale(locale)
        }

        fn replace_locale(&self, locale: &Locale) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.replace_locale(locale)
        }

        fn delete_locale(&self, id: &LocaleId) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.delete_locale(id)
        }

        fn find_or_insert_type(&self, kind: &str) -> Result<LocaleType, StoreError> {
            self.check()?;
            self.inner.find_or_insert_type(kind)
        }

        fn find_type(&self, kind: &str) -> Result<Option<LocaleType>, StoreError> {
            self.check()?;
            self.inner.find_type(kind)
        }

        fn list_types(&self) -> Result<Vec<LocaleType>, StoreError> {
            self.check()?;
            self.inner.list_types()
        }

        fn upsert_language(&self, language: &Language) -> Result<(), StoreError> {
            self.check()?;
            self.inner.upsert_language(language)
        }

        fn languages(&self) -> Result<Vec<Language>, StoreError> {
            self.check()?;
            self.inner.languages()
        }
    }
}
