//! i18n-store: translation lookup behind a render cache, backed by a
//! deduplicating, reference-counted locale store.
//! Main library: wiring of cache, store, notifier and document collections.

pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod locale;
pub mod metrics;
pub mod notify;
pub mod storage;
pub mod translate;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

pub use config::I18nConfig;
pub use document::{DocumentSchema, Field, LocalizableCollection};
pub use error::{I18nError, Result};
pub use locale::{Locale, LocaleDraft, LocaleId, LocaleStore, SOURCE_LANG};
pub use translate::{TranslateOptions, Translator};

use document::{DocumentBackend, MemoryDocuments};
use locale::{LocaleBackend, MemoryBackend};
use metrics::{MetricSummary, MetricsRegistry};
use notify::{MissingNotifier, NotificationSink, TracingSink};
use storage::SqliteBackend;
use translate::cache::RenderCache;
use translate::template::TeraEngine;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `i18n_store=info` filter. Does nothing if a subscriber is already set.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("i18n_store=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Everything wired together for one process.
pub struct I18n {
    config: I18nConfig,
    metrics: Arc<MetricsRegistry>,
    notifier: Arc<MissingNotifier>,
    store: Arc<LocaleStore>,
    translator: Translator,
    documents: Arc<dyn DocumentBackend>,
}

impl I18n {
    /// SQLite storage when `database_path` is set, in-memory otherwise.
    /// Installs the tracing subscriber and logs missing translations. Needs a
    /// running tokio runtime.
    pub fn open(config: I18nConfig) -> Result<Self> {
        config.validate()?;
        init_tracing(config.log_json);
        let (locales, documents): (Arc<dyn LocaleBackend>, Arc<dyn DocumentBackend>) =
            match &config.database_path {
                Some(path) => {
                    let db = Arc::new(SqliteBackend::open(path)?);
                    let locales: Arc<dyn LocaleBackend> = db.clone();
                    let documents: Arc<dyn DocumentBackend> = db;
                    (locales, documents)
                }
                None => (
                    Arc::new(MemoryBackend::new()),
                    Arc::new(MemoryDocuments::new()),
                ),
            };
        Self::with_backends(config, locales, documents, vec![Arc::new(TracingSink)])
    }

    pub fn with_backends(
        config: I18nConfig,
        locales: Arc<dyn LocaleBackend>,
        documents: Arc<dyn DocumentBackend>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRegistry::new());
        let notifier = Arc::new(MissingNotifier::spawn(sinks)?);

        let store = Arc::new(
            LocaleStore::new(locales, config.default_language.clone())
                .with_notifier(Arc::clone(&notifier))
                .with_metrics(Arc::clone(&metrics)),
        );
        let languages = store.init_languages()?;

        let cache = Arc::new(
            RenderCache::new(config.cache_max_keys, config.cache_ttl(), Arc::new(TeraEngine))
                .with_metrics(Arc::clone(&metrics)),
        );
        let translator = Translator::new(
            cache,
            Arc::clone(&store),
            config.default_locale_type.clone(),
        )
        .with_metrics(Arc::clone(&metrics));

        info!(
            default_language = %config.default_language,
            languages = languages.len(),
            cache_max_keys = config.cache_max_keys,
            "i18n store ready"
        );

        Ok(Self {
            config,
            metrics,
            notifier,
            store,
            translator,
            documents,
        })
    }

    pub fn translate(&self, text: &str, lang: &str, options: &TranslateOptions<'_>) -> Result<String> {
        self.translator.translate(text, lang, options)
    }

    pub fn set_translation(
        &self,
        source_text: &str,
        new_text: &str,
        lang: &str,
        extra: &str,
    ) -> Result<Vec<Locale>> {
        self.translator.set_translation(source_text, new_text, lang, extra)
    }

    /// Bind a document collection to the locale store.
    pub fn localizable(&self, schema: DocumentSchema) -> LocalizableCollection {
        LocalizableCollection::new(schema, Arc::clone(&self.documents), Arc::clone(&self.store))
            .with_cache(Arc::clone(self.cache()))
            .with_metrics(Arc::clone(&self.metrics))
    }

    pub fn config(&self) -> &I18nConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocaleStore> {
        &self.store
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        self.translator.cache()
    }

    pub fn notifier(&self) -> &Arc<MissingNotifier> {
        &self.notifier
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }

    /// Deliver queued notifications and stop the notifier.
    pub async fn shutdown(&self) {
        self.notifier.wait_idle().await;
        self.notifier.shutdown();
        info!("i18n store shut down");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::DocumentQuery;
    use crate::error::NotifierError;
    use crate::notify::testing::RecordingSink;

    fn memory(sink: Arc<RecordingSink>) -> I18n {
        I18n::with_backends(
            I18nConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryDocuments::new()),
            vec![sink],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn documents_and_translation_share_locales() {
        let sink = Arc::new(RecordingSink::default());
        let i18n = memory(sink.clone());
        let pages = i18n.localizable(
            DocumentSchema::new("pages").field(Field::localized("title")),
        );

        let page = pages.save(json!({ "title": "Welcome" }), None).unwrap();
        assert_eq!(
            i18n.translate("Welcome", "ca", &TranslateOptions::default()).unwrap(),
            "Welcome"
        );
        i18n.set_translation("Welcome", "Benvingut", "ca", "").unwrap();
        assert_eq!(
            i18n.translate("Welcome", "ca", &TranslateOptions::default()).unwrap(),
            "Benvingut"
        );

        let read = pages.find(&DocumentQuery::all(), Some("ca")).unwrap();
        assert_eq!(read[0]["title"], "Benvingut");
        assert_eq!(read[0]["id"], page["id"]);

        i18n.shutdown().await;
        assert!(sink.events().iter().any(|e| e.lang == "ca" && e.text == "Welcome"));
        assert!(i18n.metrics_summary().contains_key(metrics::metric_names::DOCUMENT_SAVE));
    }

    #[tokio::test]
    async fn document_save_refreshes_cached_translation() {
        let i18n = memory(Arc::new(RecordingSink::default()));
        let pages = i18n.localizable(
            DocumentSchema::new("pages").field(Field::localized("title")),
        );
        let page = pages.save(json!({ "title": "Welcome" }), None).unwrap();
        let options = TranslateOptions::default();
        assert_eq!(i18n.translate("Welcome", "ca", &options).unwrap(), "Welcome");

        pages
            .save(json!({ "id": page["id"], "title": "Benvingut" }), Some("ca"))
            .unwrap();
        assert_eq!(i18n.translate("Welcome", "ca", &options).unwrap(), "Benvingut");
        i18n.shutdown().await;
    }

    #[tokio::test]
    async fn open_installs_tracing_subscriber() {
        let config = I18nConfig {
            log_json: true,
            ..I18nConfig::default()
        };
        let i18n = I18n::open(config).unwrap();
        assert!(tracing::dispatcher::has_been_set());
        assert!(i18n.config().log_json);
        i18n.shutdown().await;
    }

    #[tokio::test]
    async fn open_uses_sqlite_when_configured() {
        let dir = std::env::temp_dir().join(format!("i18n-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = I18nConfig {
            database_path: Some(dir.join("locales.db")),
            ..I18nConfig::default()
        };

        {
            let i18n = I18n::open(config.clone()).unwrap();
            i18n.set_translation("Open", "Obrir", "ca", "").unwrap();
        }
        let reopened = I18n::open(config).unwrap();
        assert_eq!(reopened.store().known_languages(), vec!["ca".to_string()]);
        assert_eq!(
            reopened.translate("Open", "ca", &TranslateOptions::default()).unwrap(),
            "Obrir"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_requires_runtime() {
        let err = I18n::open(I18nConfig::default()).err().unwrap();
        assert!(matches!(err, I18nError::Notifier(NotifierError::NoRuntime)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = I18nConfig {
            cache_max_keys: 0,
            ..I18nConfig::default()
        };
        assert!(matches!(I18n::open(config), Err(I18nError::Config(_))));
    }
}
