//! Locale store: content deduplication and reference counting on top of a
//! [`LocaleBackend`].
//!
//! Every read-then-write sequence runs under a slot lock: `locale:<id>` for a
//! record, `content:<text>` while deciding whether a text needs a new record,
//! `type:<kind>` for type upserts. Content slots are always taken before record
//! slots.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::backend::{LocaleBackend, LocaleFilter};
use super::slots::SlotLocks;
use super::{Language, Locale, LocaleDraft, LocaleId, LocaleString, LocaleType, SOURCE_LANG};
use crate::error::{I18nError, Result};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::notify::{MissingNotifier, MissingTranslation};

/// Filters for [`LocaleStore::find_locales_by_type`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeDumpOptions {
    /// Only locales whose translation is absent or empty.
    pub only_missing: bool,
    /// Only locales with a non-empty translation.
    pub clean_missing: bool,
}

pub struct LocaleStore {
    backend: Arc<dyn LocaleBackend>,
    default_language: String,
    notifier: Option<Arc<MissingNotifier>>,
    metrics: Option<Arc<MetricsRegistry>>,
    slots: SlotLocks,
    languages: RwLock<Vec<String>>,
}

fn record_slot(id: &LocaleId) -> String {
    format!("locale:{id}")
}

fn content_slot(text: &str) -> String {
    format!("content:{text}")
}

impl LocaleStore {
    pub fn new(backend: Arc<dyn LocaleBackend>, default_language: impl Into<String>) -> Self {
        Self {
            backend,
            default_language: default_language.into(),
            notifier: None,
            metrics: None,
            slots: SlotLocks::new(),
            languages: RwLock::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<MissingNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn find(&self, id: &LocaleId) -> Result<Option<Locale>> {
        Ok(self.backend.find_locale(id)?)
    }

    /// Languages checked by content matching, highest priority first.
    fn candidate_langs<'a>(&'a self, lang: &'a str) -> Vec<&'a str> {
        let mut langs: Vec<&str> = Vec::with_capacity(3);
        for candidate in [lang, self.default_language.as_str(), SOURCE_LANG] {
            if !langs.contains(&candidate) {
                langs.push(candidate);
            }
        }
        langs
    }

    /// Existing record holding `text` under `lang`, the default language or
    /// `"--"`, in that order. Earliest record wins within one language.
    pub fn find_by_content(&self, text: &str, lang: &str) -> Result<Option<Locale>> {
        for candidate in self.candidate_langs(lang) {
            let filter = LocaleFilter::Text {
                text,
                lang: Some(candidate),
            };
            if let Some(found) = self.backend.find_locales(filter)?.into_iter().next() {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub fn find_or_create_type(&self, kind: &str) -> Result<LocaleType> {
        let _slot = self.slots.lock(format!("type:{kind}"));
        Ok(self.backend.find_or_insert_type(kind)?)
    }

    pub fn list_types(&self) -> Result<Vec<LocaleType>> {
        Ok(self.backend.list_types()?)
    }

    /// Persist `incoming`.
    ///
    /// - With an `id` it replaces the strings of that record, keeping its refs.
    /// - With `original` its strings are merged into that record.
    /// - Otherwise an equivalent record is looked up by content and merged
    ///   into; a new record is created only when none exists.
    pub fn save(&self, original: Option<&Locale>, incoming: LocaleDraft) -> Result<Locale> {
        let span = self.metrics.as_ref().map(|m| m.span(metric_names::LOCALE_SAVE));

        let saved = match (incoming.id.clone(), original) {
            (Some(id), _) => self.overwrite(id, incoming),
            (None, Some(original)) => match self.merge_into(&original.id, &incoming.strings)? {
                Some(merged) => Ok(merged),
                None => {
                    warn!(id = %original.id, "original locale vanished, resolving by content");
                    self.save_by_content(incoming)
                }
            },
            (None, None) => self.save_by_content(incoming),
        };

        if let Some(span) = span {
            span.finish();
        }
        saved
    }

    /// Replace the strings of record `id`. Stored refs are kept; incoming
    /// refs are added to them.
    fn overwrite(&self, id: LocaleId, incoming: LocaleDraft) -> Result<Locale> {
        let _slot = self.slots.lock(record_slot(&id));
        let stored = self
            .backend
            .find_locale(&id)?
            .ok_or_else(|| I18nError::locale_not_found(id.as_str()))?;

        let mut refs = stored.refs;
        for reference in incoming.refs {
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
        let locale = Locale {
            id,
            strings: incoming.strings,
            refs,
        };
        if !self.backend.replace_locale(&locale)? {
            return Err(I18nError::locale_not_found(locale.id.as_str()));
        }
        debug!(id = %locale.id, refs = locale.refs.len(), "locale overwritten");
        Ok(locale)
    }

    /// Merge `strings` into the stored record `id`. `None` if it no longer exists.
    fn merge_into(&self, id: &LocaleId, strings: &[LocaleString]) -> Result<Option<Locale>> {
        let _slot = self.slots.lock(record_slot(id));
        let Some(mut current) = self.backend.find_locale(id)? else {
            return Ok(None);
        };
        current.merge_strings(strings);
        if !self.backend.replace_locale(&current)? {
            return Ok(None);
        }
        debug!(id = %current.id, "locale merged");
        Ok(Some(current))
    }

    fn save_by_content(&self, incoming: LocaleDraft) -> Result<Locale> {
        let key_text = incoming
            .strings
            .first()
            .map(|s| s.text.as_str())
            .unwrap_or_default();
        let _content = self.slots.lock(content_slot(key_text));

        for string in &incoming.strings {
            if let Some(found) = self.find_by_content(&string.text, &string.lang)? {
                if let Some(merged) = self.merge_into(&found.id, &incoming.strings)? {
                    return Ok(merged);
                }
            }
        }
        self.create(incoming)
    }

    fn create(&self, incoming: LocaleDraft) -> Result<Locale> {
        let mut strings = incoming.strings;
        if !strings.iter().any(|s| s.lang == SOURCE_LANG) {
            let source = strings.first().map(|s| s.text.clone()).unwrap_or_default();
            strings.push(LocaleString::new(SOURCE_LANG, source));
        }
        let mut refs: Vec<String> = Vec::with_capacity(incoming.refs.len());
        for reference in incoming.refs {
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }

        let locale = Locale {
            id: LocaleId::generate(),
            strings,
            refs,
        };
        self.backend.insert_locale(&locale)?;
        info!(id = %locale.id, text = %locale.source_text(), "locale created");

        let announced = locale
            .strings
            .iter()
            .find(|s| s.lang != SOURCE_LANG)
            .or_else(|| locale.strings.first());
        if let Some(string) = announced {
            self.announce(MissingTranslation {
                kind: String::new(),
                text: string.text.clone(),
                lang: string.lang.clone(),
                extra: string.extra.clone(),
            });
        }
        Ok(locale)
    }

    /// Attach `reference` to the locale. `false` when it was already attached.
    pub fn add_ref(&self, id: &LocaleId, reference: &str) -> Result<bool> {
        let _slot = self.slots.lock(record_slot(id));
        let mut locale = self
            .backend
            .find_locale(id)?
            .ok_or_else(|| I18nError::locale_not_found(id.as_str()))?;
        if locale.has_ref(reference) {
            return Ok(false);
        }
        locale.refs.push(reference.to_string());
        if !self.backend.replace_locale(&locale)? {
            return Err(I18nError::locale_not_found(id.as_str()));
        }
        debug!(id = %id, reference, refs = locale.refs.len(), "locale ref added");
        Ok(true)
    }

    /// Detach `reference` from every locale; locales left without refs are
    /// deleted. Returns how many locales were touched.
    pub fn remove_ref(&self, reference: &str) -> Result<usize> {
        let referencing = self.backend.find_locales(LocaleFilter::Ref(reference))?;
        let mut touched = 0;

        for candidate in referencing {
            let _slot = self.slots.lock(record_slot(&candidate.id));
            let Some(mut locale) = self.backend.find_locale(&candidate.id)? else {
                continue;
            };
            if !locale.has_ref(reference) {
                continue;
            }
            locale.refs.retain(|r| r != reference);
            if locale.refs.is_empty() {
                self.backend.delete_locale(&locale.id)?;
                debug!(id = %locale.id, "locale deleted (no refs left)");
            } else {
                self.backend.replace_locale(&locale)?;
            }
            touched += 1;
        }
        Ok(touched)
    }

    /// Record that `text` has no translation for `lang`.
    ///
    /// Adds an empty `lang` entry to the matching locale (creating the locale
    /// when none exists) and tags it with the `kind` type. Nothing happens for
    /// the default language, or when the entry already exists. Returns the
    /// written record.
    pub fn missing(
        &self,
        kind: &str,
        text: &str,
        lang: &str,
        extra: &str,
    ) -> Result<Option<Locale>> {
        if lang == SOURCE_LANG || lang == self.default_language {
            return Ok(None);
        }
        let locale_type = self.find_or_create_type(kind)?;
        let _content = self.slots.lock(content_slot(text));

        if let Some(found) = self.find_by_content(text, lang)? {
            let _slot = self.slots.lock(record_slot(&found.id));
            if let Some(mut current) = self.backend.find_locale(&found.id)? {
                if current.has_lang(lang) {
                    return Ok(None);
                }
                current
                    .strings
                    .push(LocaleString::new(lang, "").with_extra(extra));
                if !current.has_ref(&locale_type.id) {
                    current.refs.push(locale_type.id.clone());
                }
                self.backend.replace_locale(&current)?;
                self.announce_missing(kind, text, lang, extra);
                return Ok(Some(current));
            }
        }

        let created = Locale {
            id: LocaleId::generate(),
            strings: vec![
                LocaleString::new(SOURCE_LANG, text),
                LocaleString::new(lang, "").with_extra(extra),
            ],
            refs: vec![locale_type.id],
        };
        self.backend.insert_locale(&created)?;
        self.announce_missing(kind, text, lang, extra);
        Ok(Some(created))
    }

    /// Set the `lang` translation of every locale whose source text is
    /// `source_text`, creating the locale first when there is none.
    pub fn set_translation(
        &self,
        kind: &str,
        source_text: &str,
        new_text: &str,
        lang: &str,
        extra: &str,
    ) -> Result<Vec<Locale>> {
        if source_text.is_empty() || lang.is_empty() {
            return Ok(Vec::new());
        }
        self.add_language(lang, None)?;

        let filter = LocaleFilter::Text {
            text: source_text,
            lang: Some(SOURCE_LANG),
        };
        let mut targets = self.backend.find_locales(filter)?;
        if targets.is_empty() {
            self.missing(kind, source_text, lang, extra)?;
            targets = self.backend.find_locales(filter)?;
        }

        let mut updated = Vec::with_capacity(targets.len());
        for target in targets {
            let _slot = self.slots.lock(record_slot(&target.id));
            let Some(mut current) = self.backend.find_locale(&target.id)? else {
                continue;
            };
            current.merge_strings(&[LocaleString::new(lang, new_text).with_extra(extra)]);
            self.backend.replace_locale(&current)?;
            updated.push(current);
        }
        info!(text = %source_text, lang, count = updated.len(), "translation set");
        Ok(updated)
    }

    /// Locales referencing `reference`, strings narrowed to `lang` when given.
    pub fn find_by_ref(&self, reference: &str, lang: Option<&str>) -> Result<Vec<Locale>> {
        let locales = self.backend.find_locales(LocaleFilter::Ref(reference))?;
        Ok(match lang {
            Some(lang) => locales.iter().map(|l| l.narrowed(lang)).collect(),
            None => locales,
        })
    }

    /// `source text → translation` for every locale of type `kind`.
    pub fn find_locales_by_type(
        &self,
        kind: &str,
        lang: Option<&str>,
        options: TypeDumpOptions,
    ) -> Result<BTreeMap<String, String>> {
        let ask = match lang {
            Some(lang) if lang != SOURCE_LANG && !lang.is_empty() => lang,
            _ => self.default_language.as_str(),
        };
        let Some(locale_type) = self.backend.find_type(kind)? else {
            return Ok(BTreeMap::new());
        };

        let locales = self
            .backend
            .find_locales(LocaleFilter::Ref(&locale_type.id))?;
        let mut translations = BTreeMap::new();
        for locale in &locales {
            let translation = locale.text(ask);
            let has_translation = translation.is_some_and(|t| !t.is_empty());
            if options.clean_missing && !has_translation {
                continue;
            }
            if options.only_missing && has_translation {
                continue;
            }
            translations.insert(
                locale.source_text().to_string(),
                translation.unwrap_or_default().to_string(),
            );
        }
        Ok(translations)
    }

    /// Locales holding at least one empty translation.
    pub fn find_missing(&self) -> Result<Vec<Locale>> {
        Ok(self.backend.find_locales(LocaleFilter::MissingText)?)
    }

    /// Reload the known-language list from storage.
    pub fn init_languages(&self) -> Result<Vec<String>> {
        let langs: Vec<String> = self
            .backend
            .languages()?
            .into_iter()
            .map(|l| l.lang.to_lowercase())
            .collect();
        *self.languages.write() = langs.clone();
        Ok(langs)
    }

    /// Register `lang` if unseen. Returns whether it was new.
    pub fn add_language(&self, lang: &str, display_name: Option<&str>) -> Result<bool> {
        let lang = lang.to_lowercase();
        if lang.is_empty() || lang == SOURCE_LANG {
            return Ok(false);
        }
        if self.languages.read().contains(&lang) {
            return Ok(false);
        }
        {
            let mut langs = self.languages.write();
            if langs.contains(&lang) {
                return Ok(false);
            }
            langs.push(lang.clone());
        }

        let language = Language {
            lang: lang.clone(),
            display_name: display_name.unwrap_or_default().to_string(),
        };
        if let Err(e) = self.backend.upsert_language(&language) {
            self.languages.write().retain(|l| l != &lang);
            return Err(e.into());
        }
        info!(lang = %lang, "language registered");
        Ok(true)
    }

    /// Languages registered in this process.
    pub fn known_languages(&self) -> Vec<String> {
        self.languages.read().clone()
    }

    /// Languages in storage, sorted by code.
    pub fn available_languages(&self) -> Result<Vec<Language>> {
        Ok(self.backend.languages()?)
    }

    fn announce_missing(&self, kind: &str, text: &str, lang: &str, extra: &str) {
        self.announce(MissingTranslation {
            kind: kind.to_string(),
            text: text.to_string(),
            lang: lang.to_string(),
            extra: extra.to_string(),
        });
    }

    fn announce(&self, missing: MissingTranslation) {
        match &self.notifier {
            Some(notifier) => notifier.notify(missing),
            None => debug!(text = %missing.text, lang = %missing.lang, "missing translation (no notifier)"),
        }
    }
}
