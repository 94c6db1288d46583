//! Direct translation: render cache in front of the locale store.
//!
//! A miss looks the text up by content, records a missing translation when the
//! requested language has none, then caches and renders the chosen text.

pub mod cache;
pub mod template;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::locale::{Locale, LocaleStore};
use crate::metrics::{metric_names, MetricsRegistry};
use cache::RenderCache;

/// Per-call context for [`Translator::translate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions<'a> {
    /// Locale type tagged on missing translations. Configured default when `None`.
    pub kind: Option<&'a str>,
    /// Caller-supplied provenance stored with missing translations.
    pub extra: &'a str,
    /// Template data.
    pub data: Option<&'a Value>,
}

pub struct Translator {
    cache: Arc<RenderCache>,
    store: Arc<LocaleStore>,
    default_kind: String,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Translator {
    pub fn new(
        cache: Arc<RenderCache>,
        store: Arc<LocaleStore>,
        default_kind: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            store,
            default_kind: default_kind.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<LocaleStore> {
        &self.store
    }

    /// Translate `text` into `lang` and render it with `options.data`.
    ///
    /// Template failures fall back to the untranslated `text`. Storage failures
    /// are returned and leave the cache untouched.
    pub fn translate(&self, text: &str, lang: &str, options: &TranslateOptions<'_>) -> Result<String> {
        let started = Instant::now();
        let data = options.data.unwrap_or(&Value::Null);
        let fp = fingerprint(text);

        match self.cache.get(fp, lang, data) {
            Ok(Some(rendered)) => {
                self.record(metric_names::TRANSLATE_CACHED, started);
                return Ok(rendered);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, text, lang, "cached translation failed to render");
                return Ok(text.to_string());
            }
        }

        let chosen = self.lookup(text, lang, options)?;
        let rendered = self
            .cache
            .put(&chosen, lang, Some(fp))
            .and_then(|renderer| renderer.render(data));
        self.record(metric_names::TRANSLATE_STORE, started);

        match rendered {
            Ok(rendered) => Ok(rendered),
            Err(e) => {
                error!(error = %e, text, lang, "translation template failed");
                Ok(text.to_string())
            }
        }
    }

    pub fn translate_all(
        &self,
        texts: &[&str],
        lang: &str,
        options: &TranslateOptions<'_>,
    ) -> Result<Vec<String>> {
        texts
            .iter()
            .map(|text| self.translate(text, lang, options))
            .collect()
    }

    /// Store `new_text` as the `lang` translation of `source_text` and drop the
    /// stale cache entry.
    pub fn set_translation(
        &self,
        source_text: &str,
        new_text: &str,
        lang: &str,
        extra: &str,
    ) -> Result<Vec<Locale>> {
        let updated =
            self.store
                .set_translation(&self.default_kind, source_text, new_text, lang, extra)?;
        self.cache.invalidate(fingerprint(source_text), lang);
        Ok(updated)
    }

    /// Text to cache for `(text, lang)`: the stored translation when it is
    /// non-empty, `text` otherwise.
    fn lookup(&self, text: &str, lang: &str, options: &TranslateOptions<'_>) -> Result<String> {
        self.store.add_language(lang, None)?;
        let record = self.store.find_by_content(text, lang)?;

        if let Some(translation) = record
            .as_ref()
            .and_then(|r| r.text(lang))
            .filter(|t| !t.is_empty())
        {
            return Ok(translation.to_string());
        }

        if record.as_ref().is_some_and(|r| r.has_lang(lang)) {
            warn!(text, lang, "Still missing translation");
        } else {
            let kind = options.kind.unwrap_or(&self.default_kind);
            if self.store.missing(kind, text, lang, options.extra)?.is_some() {
                debug!(text, lang, kind, "missing translation recorded");
            }
        }
        Ok(text.to_string())
    }

    fn record(&self, name: &'static str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record(name, started.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json::json;

    use super::template::TeraEngine;
    use super::*;
    use crate::error::I18nError;
    use crate::locale::backend::testing::FlakyBackend;
    use crate::locale::{LocaleBackend, LocaleDraft, MemoryBackend, SOURCE_LANG};
    use crate::notify::testing::RecordingSink;
    use crate::notify::MissingNotifier;

    fn cache() -> Arc<RenderCache> {
        Arc::new(RenderCache::new(100, Duration::from_secs(3600), Arc::new(TeraEngine)))
    }

    fn translator_on(backend: Arc<dyn LocaleBackend>) -> Translator {
        let store = Arc::new(LocaleStore::new(backend, "en"));
        Translator::new(cache(), store, "server")
    }

    fn translator() -> Translator {
        translator_on(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn miss_records_once_then_serves_from_cache() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(MissingNotifier::spawn(vec![sink.clone()]).unwrap());
        let store = Arc::new(
            LocaleStore::new(Arc::new(MemoryBackend::new()), "en").with_notifier(notifier.clone()),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        let translator =
            Translator::new(cache(), Arc::clone(&store), "server").with_metrics(metrics.clone());

        let record = store.save(None, LocaleDraft::text("Hello", None).with_ref("d1")).unwrap();
        assert_eq!(record.strings.len(), 1);

        let options = TranslateOptions { extra: "greeting", ..Default::default() };
        assert_eq!(translator.translate("Hello", "fr", &options).unwrap(), "Hello");
        assert_eq!(translator.translate("Hello", "fr", &options).unwrap(), "Hello");
        notifier.wait_idle().await;

        let fr_events: Vec<_> = sink.events().into_iter().filter(|e| e.lang == "fr").collect();
        assert_eq!(fr_events.len(), 1);
        assert_eq!(fr_events[0].kind, "server");
        assert_eq!(fr_events[0].text, "Hello");
        assert_eq!(fr_events[0].extra, "greeting");

        let updated = store.find(&record.id).unwrap().unwrap();
        assert_eq!(updated.text("fr"), Some(""));
        assert_eq!(metrics.count(metric_names::TRANSLATE_CACHED), 1);
        assert_eq!(metrics.count(metric_names::TRANSLATE_STORE), 1);
    }

    #[tokio::test]
    async fn empty_text_notifies_at_most_once() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(MissingNotifier::spawn(vec![sink.clone()]).unwrap());
        let store = Arc::new(
            LocaleStore::new(Arc::new(MemoryBackend::new()), "en").with_notifier(notifier.clone()),
        );
        let translator = Translator::new(cache(), store, "server");

        for _ in 0..3 {
            assert_eq!(translator.translate("", "de", &TranslateOptions::default()).unwrap(), "");
        }
        notifier.wait_idle().await;
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn existing_translation_is_rendered_with_data() {
        let translator = translator();
        translator
            .set_translation("Hello {{ name }}", "Bonjour {{ name }}", "fr", "")
            .unwrap();

        let data = json!({ "name": "Ada" });
        let options = TranslateOptions { data: Some(&data), ..Default::default() };
        assert_eq!(
            translator.translate("Hello {{ name }}", "fr", &options).unwrap(),
            "Bonjour Ada"
        );
        // default language renders the source
        assert_eq!(
            translator.translate("Hello {{ name }}", "en", &options).unwrap(),
            "Hello Ada"
        );
    }

    #[test]
    fn render_failure_returns_raw_text() {
        let translator = translator();
        let out = translator
            .translate("Hi {{ user }}", "fr", &TranslateOptions::default())
            .unwrap();
        assert_eq!(out, "Hi {{ user }}");
    }

    #[test]
    fn storage_failure_is_returned_and_not_cached() {
        let backend = Arc::new(FlakyBackend::default());
        let translator = translator_on(backend.clone());

        backend.failing.store(true, Ordering::SeqCst);
        let err = translator
            .translate("Hello", "fr", &TranslateOptions::default())
            .unwrap_err();
        assert!(matches!(err, I18nError::Storage(_)));
        assert!(translator.cache().is_empty());

        backend.failing.store(false, Ordering::SeqCst);
        assert_eq!(
            translator.translate("Hello", "fr", &TranslateOptions::default()).unwrap(),
            "Hello"
        );
        assert_eq!(translator.cache().len(), 1);
    }

    #[test]
    fn set_translation_invalidates_cached_text() {
        let translator = translator();
        let options = TranslateOptions::default();
        assert_eq!(translator.translate("Bye", "ca", &options).unwrap(), "Bye");

        let updated = translator.set_translation("Bye", "Adéu", "ca", "").unwrap();
        assert_eq!(updated[0].text(SOURCE_LANG), Some("Bye"));
        assert_eq!(translator.translate("Bye", "ca", &options).unwrap(), "Adéu");
    }

    #[test]
    fn translate_all_keeps_order() {
        let translator = translator();
        translator.set_translation("Yes", "Sí", "es", "").unwrap();
        let out = translator
            .translate_all(&["Yes", "No"], "es", &TranslateOptions::default())
            .unwrap();
        assert_eq!(out, vec!["Sí", "No"]);
    }
}
