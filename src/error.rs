//! Error types shared across the cache, the locale store and the document adapter.

use thiserror::Error;

/// Failure reported by a storage backend. Propagated to callers unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Template compilation or rendering failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template compile error: {0}")]
    Compile(String),
    #[error("template render error: {0}")]
    Render(String),
}

/// The notifier background task could not be started.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("missing-translation notifier needs a running tokio runtime")]
    NoRuntime,
}

/// Top-level error for every public operation of the crate.
#[derive(Debug, Error)]
pub enum I18nError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[error(transparent)]
    TemplateRender(#[from] TemplateError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl I18nError {
    pub(crate) fn locale_not_found(id: impl Into<String>) -> Self {
        I18nError::NotFound {
            what: "locale",
            id: id.into(),
        }
    }
}

pub type Result<T, E = I18nError> = std::result::Result<T, E>;
