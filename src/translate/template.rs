//! Template engine seam: text in, reusable renderer out.
//! Plain text becomes a constant renderer; anything with `{{ }}` / `{% %}`
//! markers is compiled by Tera.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use crate::error::TemplateError;

const TEMPLATE_NAME: &str = "translation";

static TEMPLATE_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*?\}\}|\{%.*?%\}").expect("template marker regex"));

type RenderFn = dyn Fn(&Value) -> Result<String, TemplateError> + Send + Sync;

/// Compiled, cheaply clonable handle for one translation text.
#[derive(Clone)]
pub struct Renderer(Arc<RenderFn>);

impl Renderer {
    pub fn new<F>(render: F) -> Self
    where
        F: Fn(&Value) -> Result<String, TemplateError> + Send + Sync + 'static,
    {
        Self(Arc::new(render))
    }

    /// Renderer that always yields `text`.
    pub fn constant(text: &str) -> Self {
        let text: Arc<str> = Arc::from(text);
        Self::new(move |_| Ok(text.to_string()))
    }

    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        (self.0)(data)
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Renderer(..)")
    }
}

/// Compiles translation text into a [`Renderer`].
pub trait TemplateEngine: Send + Sync {
    fn compile(&self, text: &str) -> Result<Renderer, TemplateError>;
}

/// Whether `text` carries template markers and needs compiling.
pub fn is_template(text: &str) -> bool {
    TEMPLATE_MARKERS.is_match(text)
}

/// Default engine backed by Tera. Autoescaping is off: translations are text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeraEngine;

impl TemplateEngine for TeraEngine {
    fn compile(&self, text: &str) -> Result<Renderer, TemplateError> {
        if !is_template(text) {
            return Ok(Renderer::constant(text));
        }

        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_template(TEMPLATE_NAME, text)
            .map_err(|e| TemplateError::Compile(error_chain(&e)))?;
        let tera = Arc::new(tera);

        Ok(Renderer::new(move |data| {
            let context = match data {
                Value::Null => Context::new(),
                other => Context::from_value(other.clone())
                    .map_err(|e| TemplateError::Render(error_chain(&e)))?,
            };
            tera.render(TEMPLATE_NAME, &context)
                .map_err(|e| TemplateError::Render(error_chain(&e)))
        }))
    }
}

/// Tera keeps the useful part of its messages in the source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
