//! Data-driven field extraction from HTML with CSS selectors.
//!
//! Each [`FieldRule`] yields `Result<String, FieldNotFound>`; a miss becomes a
//! null field, so every record of a run carries the same columns.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::job::Record;
use harvest_core::sink::WORKER_ID_COLUMN;
use harvest_core::traits::{Extractor, Fetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// Failure reason for pages that match a not-found marker.
pub const PAGE_NOT_FOUND: &str = "page not found";

/// How to pull one field out of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Which match to use when the selector matches several elements.
    #[serde(default)]
    pub index: usize,
    /// Suffix removed from the value, e.g. `" years old"`.
    #[serde(default)]
    pub strip_suffix: Option<String>,
    /// Keep only the first line of the value.
    #[serde(default)]
    pub first_line: bool,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: None,
            index: 0,
            strip_suffix: None,
            first_line: false,
        }
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn strip_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.strip_suffix = Some(suffix.into());
        self
    }

    pub fn first_line(mut self) -> Self {
        self.first_line = true;
        self
    }
}

/// A rules file: the fields to extract plus texts that mark a missing page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub not_found_markers: Vec<String>,
}

impl ExtractionRules {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid extraction rules: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read rules {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

/// Why a single field could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldNotFound {
    #[error("no element #{index} for '{selector}'")]
    NoMatch { selector: String, index: usize },

    #[error("attribute '{0}' missing")]
    MissingAttribute(String),

    #[error("empty value")]
    Empty,
}

struct CompiledRule {
    rule: FieldRule,
    selector: Selector,
}

/// Applies [`ExtractionRules`] to HTML documents.
#[derive(Clone)]
pub struct SelectorExtractor {
    rules: Arc<Vec<CompiledRule>>,
    not_found_markers: Arc<Vec<String>>,
}

impl SelectorExtractor {
    /// Compile every selector up front. Invalid selectors, duplicate field
    /// names and the reserved `job` and `worker_id` names are configuration
    /// errors.
    pub fn new(rules: ExtractionRules) -> Result<Self, AppError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.fields.len());

        for rule in rules.fields {
            if rule.name == Record::JOB_FIELD || rule.name == WORKER_ID_COLUMN {
                return Err(AppError::ConfigError(format!(
                    "field name '{}' is reserved",
                    rule.name
                )));
            }
            if !seen.insert(rule.name.clone()) {
                return Err(AppError::ConfigError(format!(
                    "duplicate field '{}'",
                    rule.name
                )));
            }
            let selector = Selector::parse(&rule.selector).map_err(|e| {
                AppError::ConfigError(format!("Invalid selector for '{}': {e}", rule.name))
            })?;
            compiled.push(CompiledRule { rule, selector });
        }

        Ok(Self {
            rules: Arc::new(compiled),
            not_found_markers: Arc::new(rules.not_found_markers),
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|c| c.rule.name.as_str())
    }

    /// Build the record for `job` from its page.
    pub fn extract_html(&self, job: &str, html: &str) -> Result<Record, AppError> {
        let document = Html::parse_document(html);

        if !self.not_found_markers.is_empty() {
            let text: String = document.root_element().text().collect();
            if self.not_found_markers.iter().any(|m| text.contains(m.as_str())) {
                return Err(AppError::ExtractionFailed(PAGE_NOT_FOUND.into()));
            }
        }

        let mut record = Record::new(job);
        for compiled in self.rules.iter() {
            let value = match apply(compiled, &document) {
                Ok(value) => Some(value),
                Err(miss) => {
                    tracing::debug!(%job, field = %compiled.rule.name, reason = %miss, "Field not found");
                    None
                }
            };
            record.set(compiled.rule.name.clone(), value);
        }
        Ok(record)
    }
}

fn apply(compiled: &CompiledRule, document: &Html) -> Result<String, FieldNotFound> {
    let rule = &compiled.rule;
    let element: ElementRef<'_> = document
        .select(&compiled.selector)
        .nth(rule.index)
        .ok_or_else(|| FieldNotFound::NoMatch {
            selector: rule.selector.clone(),
            index: rule.index,
        })?;

    let raw = match &rule.attribute {
        Some(attribute) => element
            .value()
            .attr(attribute)
            .ok_or_else(|| FieldNotFound::MissingAttribute(attribute.clone()))?
            .to_string(),
        None => element.text().collect::<String>(),
    };

    let mut value = raw.trim();
    if rule.first_line {
        value = value.lines().next().unwrap_or_default().trim();
    }
    if let Some(suffix) = &rule.strip_suffix {
        value = value.strip_suffix(suffix.as_str()).unwrap_or(value).trim();
    }

    if value.is_empty() {
        return Err(FieldNotFound::Empty);
    }
    Ok(value.to_string())
}

/// Fetches the job's page and applies a [`SelectorExtractor`] to it.
///
/// Fetch errors (HTTP status, network, timeout) are returned as-is and become
/// a failure outcome for the job.
#[derive(Clone)]
pub struct PageExtractor<F: Fetcher> {
    fetcher: F,
    selectors: SelectorExtractor,
}

impl<F: Fetcher> PageExtractor<F> {
    pub fn new(fetcher: F, selectors: SelectorExtractor) -> Self {
        Self { fetcher, selectors }
    }
}

impl<F: Fetcher> Extractor for PageExtractor<F> {
    async fn extract(&self, job: &str) -> Result<Record, AppError> {
        let html = self.fetcher.fetch(job).await?;
        self.selectors.extract_html(job, &html)
    }
}
