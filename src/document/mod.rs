//! Localizable documents: schema-declared fields whose values live in the
//! locale store.
//!
//! A localized field holds plain text or an inline locale object on input and
//! a locale id once saved. Reads expand ids back into locale content.

pub mod backend;
pub mod path;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

pub use backend::{DocumentBackend, DocumentQuery, MemoryDocuments};

use crate::error::{I18nError, Result, StoreError};
use crate::fingerprint::fingerprint;
use crate::locale::{Locale, LocaleDraft, LocaleId, LocaleStore, SOURCE_LANG};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::cache::RenderCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// Reference to a locale record.
    Localized,
    Object(Vec<Field>),
    /// Array of sub-documents.
    Array(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Scalar }
    }

    pub fn localized(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Localized }
    }

    pub fn object(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self { name: name.into(), kind: FieldKind::Object(fields) }
    }

    pub fn array(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self { name: name.into(), kind: FieldKind::Array(fields) }
    }
}

/// Declared shape of one document collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl DocumentSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Paths of every localized field, `a.*.b` for fields inside arrays.
    pub fn localizable_fields(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_localized(&self.fields, "", &mut paths);
        paths
    }
}

fn collect_localized(fields: &[Field], prefix: &str, paths: &mut Vec<String>) {
    for field in fields {
        let full = format!("{prefix}{}", field.name);
        match &field.kind {
            FieldKind::Scalar => {}
            FieldKind::Localized => paths.push(full),
            FieldKind::Object(nested) => collect_localized(nested, &format!("{full}."), paths),
            FieldKind::Array(nested) => {
                collect_localized(nested, &format!("{full}.{}.", path::WILDCARD), paths)
            }
        }
    }
}

enum FieldPlan {
    Keep(LocaleId),
    Save {
        draft: LocaleDraft,
        previous_id: Option<LocaleId>,
    },
}

/// A document collection bound to the locale store.
pub struct LocalizableCollection {
    schema: DocumentSchema,
    localized_fields: Vec<String>,
    documents: Arc<dyn DocumentBackend>,
    store: Arc<LocaleStore>,
    cache: Option<Arc<RenderCache>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl LocalizableCollection {
    pub fn new(
        schema: DocumentSchema,
        documents: Arc<dyn DocumentBackend>,
        store: Arc<LocaleStore>,
    ) -> Self {
        let localized_fields = schema.localizable_fields();
        debug!(collection = %schema.name, fields = ?localized_fields, "localizable collection registered");
        Self {
            schema,
            localized_fields,
            documents,
            store,
            cache: None,
            metrics: None,
        }
    }

    /// Render cache to invalidate when a save changes locale content.
    pub fn with_cache(mut self, cache: Arc<RenderCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn localized_fields(&self) -> &[String] {
        &self.localized_fields
    }

    /// Resolve every localized field against the store, persist the document
    /// with locale ids in place, and attach the document to those locales.
    pub fn save(&self, doc: Value, lang: Option<&str>) -> Result<Value> {
        let span = self.metrics.as_ref().map(|m| m.span(metric_names::DOCUMENT_SAVE));
        let saved = self.save_inner(doc, lang);
        if let Some(span) = span {
            span.finish();
        }
        saved
    }

    fn save_inner(&self, mut doc: Value, lang: Option<&str>) -> Result<Value> {
        if !doc.is_object() {
            return Err(I18nError::InvalidDocument(
                "document must be a JSON object".into(),
            ));
        }
        let doc_id = match doc.get("id").cloned() {
            Some(Value::String(id)) if !id.is_empty() => id,
            None | Some(Value::Null) | Some(Value::String(_)) => {
                let id = uuid::Uuid::new_v4().to_string();
                doc["id"] = Value::String(id.clone());
                id
            }
            Some(other) => {
                return Err(I18nError::InvalidDocument(format!(
                    "document id must be a string, got {other}"
                )))
            }
        };
        let stored = self.documents.find_document(self.name(), &doc_id)?;

        // every field is checked before the store is touched
        let plan = self.plan_fields(&doc, stored.as_ref(), &doc_id, lang)?;

        let locale_ids = match self.apply_plan(&mut doc, plan) {
            Ok(ids) => ids,
            Err(e) if stored.is_none() => {
                if let Err(cleanup) = self.store.remove_ref(&doc_id) {
                    warn!(collection = %self.name(), id = %doc_id, error = %cleanup, "failed to release refs of unsaved document");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match stored {
            Some(_) => self.documents.upsert_document(self.name(), &doc_id, &doc)?,
            None => self.documents.insert_document(self.name(), &doc_id, &doc)?,
        }
        for id in &locale_ids {
            self.store.add_ref(id, &doc_id)?;
        }
        debug!(collection = %self.name(), id = %doc_id, locales = locale_ids.len(), "document saved");
        Ok(doc)
    }

    fn plan_fields(
        &self,
        doc: &Value,
        stored: Option<&Value>,
        doc_id: &str,
        lang: Option<&str>,
    ) -> Result<Vec<(String, FieldPlan)>> {
        let mut plan = Vec::new();
        for pattern in &self.localized_fields {
            for field_path in path::expand(doc, pattern) {
                let Some(value) = path::get(doc, &field_path) else {
                    continue;
                };
                let previous_id = stored
                    .and_then(|s| path::get(s, &field_path))
                    .and_then(Value::as_str)
                    .map(LocaleId::from);

                let step = match value {
                    Value::Null => continue,
                    // unchanged id from a previous save
                    Value::String(text) if previous_id.as_ref().is_some_and(|id| id.as_str() == text.as_str()) => {
                        FieldPlan::Keep(LocaleId::from(text.as_str()))
                    }
                    Value::String(text) => FieldPlan::Save {
                        draft: LocaleDraft::text(text.as_str(), lang).with_ref(doc_id),
                        previous_id,
                    },
                    Value::Object(_) => {
                        let mut draft: LocaleDraft = serde_json::from_value(value.clone())
                            .map_err(|e| I18nError::InvalidDocument(format!("{field_path}: {e}")))?;
                        if draft.id.is_none() {
                            draft = draft.with_ref(doc_id);
                        }
                        FieldPlan::Save { draft, previous_id }
                    }
                    other => {
                        return Err(I18nError::InvalidDocument(format!(
                            "{field_path}: expected text or locale object, got {other}"
                        )))
                    }
                };
                plan.push((field_path, step));
            }
        }
        Ok(plan)
    }

    /// Write the planned locales and replace each field with its locale id.
    fn apply_plan(&self, doc: &mut Value, plan: Vec<(String, FieldPlan)>) -> Result<Vec<LocaleId>> {
        let mut locale_ids: Vec<LocaleId> = Vec::new();
        for (field_path, step) in plan {
            let id = match step {
                FieldPlan::Keep(id) => {
                    if self.store.find(&id)?.is_none() {
                        return Err(I18nError::locale_not_found(id.as_str()));
                    }
                    id
                }
                FieldPlan::Save { draft, previous_id } => {
                    self.resolve(draft, previous_id.as_ref())?.id
                }
            };
            path::set(doc, &field_path, Value::String(id.to_string()));
            if !locale_ids.contains(&id) {
                locale_ids.push(id);
            }
        }
        Ok(locale_ids)
    }

    /// Save one draft, merging into the previously stored locale of the field
    /// when the draft carries no explicit id.
    fn resolve(&self, draft: LocaleDraft, previous_id: Option<&LocaleId>) -> Result<Locale> {
        for string in &draft.strings {
            if string.lang != SOURCE_LANG {
                self.store.add_language(&string.lang, None)?;
            }
        }
        let before = match draft.id.as_ref().or(previous_id) {
            Some(id) => self.store.find(id)?,
            None => None,
        };
        let original = if draft.id.is_none() { before.as_ref() } else { None };
        let saved = self.store.save(original, draft)?;
        self.invalidate_cached(before.iter().chain(std::iter::once(&saved)));
        Ok(saved)
    }

    /// Drop cached renders of every text of `locales` in every language they
    /// carry, the default language included.
    fn invalidate_cached<'a>(&self, locales: impl Iterator<Item = &'a Locale>) {
        let Some(cache) = &self.cache else {
            return;
        };
        let default_language = self.store.default_language();
        for locale in locales {
            let mut langs: Vec<&str> = vec![default_language];
            for string in &locale.strings {
                if string.lang != SOURCE_LANG && !langs.contains(&string.lang.as_str()) {
                    langs.push(&string.lang);
                }
            }
            for string in &locale.strings {
                let fp = fingerprint(&string.text);
                for lang in &langs {
                    cache.invalidate(fp, lang);
                }
            }
        }
    }

    /// Documents matching `query`, localized fields expanded.
    ///
    /// Without `lang` each field becomes the full locale record; with `lang`
    /// just that translation (`""` when absent).
    pub fn find(&self, query: &DocumentQuery, lang: Option<&str>) -> Result<Vec<Value>> {
        let lang = lang.map(|l| self.stored_lang(l));
        self.documents
            .find_documents(self.name(), query)?
            .into_iter()
            .map(|doc| self.expand(doc, lang))
            .collect()
    }

    pub fn find_one(&self, id: &str, lang: Option<&str>) -> Result<Option<Value>> {
        let lang = lang.map(|l| self.stored_lang(l));
        self.documents
            .find_document(self.name(), id)?
            .map(|doc| self.expand(doc, lang))
            .transpose()
    }

    /// Locales referencing the document.
    pub fn find_locales(&self, doc_id: &str, lang: Option<&str>) -> Result<Vec<Locale>> {
        let lang = lang.map(|l| self.stored_lang(l));
        self.store.find_by_ref(doc_id, lang)
    }

    /// Detach the document from its locales, then delete it.
    pub fn remove(&self, doc_id: &str) -> Result<bool> {
        let released = self.store.remove_ref(doc_id)?;
        let deleted = self.documents.delete_document(self.name(), doc_id)?;
        debug!(collection = %self.name(), id = %doc_id, released, deleted, "document removed");
        Ok(deleted)
    }

    /// The default language is stored as the source text.
    fn stored_lang<'a>(&self, lang: &'a str) -> &'a str {
        if lang == self.store.default_language() {
            SOURCE_LANG
        } else {
            lang
        }
    }

    fn expand(&self, mut doc: Value, lang: Option<&str>) -> Result<Value> {
        for pattern in &self.localized_fields {
            for field_path in path::expand(&doc, pattern) {
                let Some(id) = path::get(&doc, &field_path).and_then(Value::as_str) else {
                    continue;
                };
                let id = LocaleId::from(id);
                let expanded = match (self.store.find(&id)?, lang) {
                    (Some(locale), Some(lang)) => {
                        Value::String(locale.text(lang).unwrap_or_default().to_string())
                    }
                    (Some(locale), None) => serde_json::to_value(&locale).map_err(StoreError::from)?,
                    (None, Some(_)) => {
                        warn!(collection = %self.name(), id = %id, "document references a missing locale");
                        Value::String(String::new())
                    }
                    (None, None) => {
                        warn!(collection = %self.name(), id = %id, "document references a missing locale");
                        continue;
                    }
                };
                path::set(&mut doc, &field_path, expanded);
            }
        }
        Ok(doc)
    }
}
