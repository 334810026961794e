//! Message bodies rendered from Tera templates.
//!
//! A template called `invoice` is made of `invoice.plain.tera` (required)
//! and `invoice.html.tera` (optional). The message data is available as
//! `message`; when the data is an object its fields are also available at
//! the top level.

use std::path::Path;

use serde_json::Value;
use tera::{Context, Tera};

use crate::error::{ConfigurationFailure, ProductionFailure};

const PLAIN_SUFFIX: &str = ".plain.tera";
const HTML_SUFFIX: &str = ".html.tera";

/// A rendered body: the plain text and, when available, an HTML alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub plain: String,
    pub html: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Templates {
    tera: Tera,
}

impl Templates {
    /// Load every `*.tera` file under `dir`.
    ///
    /// A missing directory yields an empty set: plain-text mail still
    /// works and templated mail fails per message.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationFailure::Templates`] if a template does not
    /// parse or the path is not valid UTF-8.
    pub fn load(dir: &Path) -> Result<Self, ConfigurationFailure> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Template directory not found, templated mail will fail");
            return Ok(Self::default());
        }

        let root = dir.to_str().ok_or_else(|| {
            ConfigurationFailure::Templates(format!("{} is not valid UTF-8", dir.display()))
        })?;
        let mut tera = Tera::new(&format!("{}/**/*.tera", root.trim_end_matches('/')))
            .map_err(|e| ConfigurationFailure::Templates(describe(&e)))?;
        tera.autoescape_on(vec![HTML_SUFFIX]);

        let templates = Self { tera };
        tracing::debug!(templates = ?templates.names(), "Loaded templates");
        Ok(templates)
    }

    /// Build from in-memory `(file name, source)` pairs, e.g.
    /// `("invoice.plain.tera", "...")`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationFailure::Templates`] if a template does not
    /// parse.
    pub fn from_raw<'a>(
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigurationFailure> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![HTML_SUFFIX]);
        tera.add_raw_templates(sources)
            .map_err(|e| ConfigurationFailure::Templates(describe(&e)))?;

        Ok(Self { tera })
    }

    /// Names of the complete templates (those with a plain-text part).
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self
            .tera
            .get_template_names()
            .filter_map(|name| name.strip_suffix(PLAIN_SUFFIX))
            .collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.has_file(&format!("{name}{PLAIN_SUFFIX}"))
    }

    fn has_file(&self, file: &str) -> bool {
        self.tera.get_template_names().any(|name| name == file)
    }

    /// Render template `name` with `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ProductionFailure::TemplateMissing`] when there is no
    /// plain-text part and [`ProductionFailure::TemplateRender`] when
    /// either part fails to render.
    pub fn render(&self, name: &str, data: &Value) -> Result<Rendered, ProductionFailure> {
        if !self.contains(name) {
            return Err(ProductionFailure::TemplateMissing(name.to_string()));
        }

        let mut context = Context::new();
        if let Value::Object(fields) = data {
            for (key, value) in fields {
                context.insert(key.as_str(), value);
            }
        }
        context.insert("message", data);

        let render = |file: String| {
            self.tera
                .render(&file, &context)
                .map_err(|e| ProductionFailure::TemplateRender {
                    template: name.to_string(),
                    reason: describe(&e),
                })
        };

        let plain = render(format!("{name}{PLAIN_SUFFIX}"))?;
        let html_file = format!("{name}{HTML_SUFFIX}");
        let html = if self.has_file(&html_file) {
            Some(render(html_file)?)
        } else {
            None
        };

        Ok(Rendered { plain, html })
    }
}

/// Tera keeps the useful detail in the error's source chain.
fn describe(error: &tera::Error) -> String {
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
