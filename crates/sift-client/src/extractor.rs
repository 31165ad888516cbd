use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sift_core::error::AppError;
use sift_core::models::{FieldMap, ListingItem, ListingPage};
use sift_core::traits::Extractor;

/// Selector configuration for one site, usually loaded from JSON.
///
/// Every field value is a CSS selector, optionally suffixed with `@attr`
/// to read an attribute instead of the element text:
///
/// ```json
/// {
///   "listing": {
///     "header": { "title": "h1" },
///     "item": "li.product",
///     "link": "a@href",
///     "fields": { "name": ".name", "price": ".price" }
///   },
///   "detail": {
///     "fields": { "sku": ".sku", "image": "img.main@src" }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// Page-level fields, matched against the whole document.
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Selector for each item container.
    pub item: String,
    /// Detail reference inside an item container. Defaults to `a@href`.
    #[serde(default = "default_link")]
    pub link: String,
    /// Summary fields, matched inside each item container.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailSelectors {
    pub fields: BTreeMap<String, String>,
}

fn default_link() -> String {
    "a@href".to_string()
}

impl SelectorConfig {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid selector config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read selector config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }
}

/// A compiled `selector[@attr]` pair.
#[derive(Debug)]
struct FieldSelector {
    selector: Selector,
    attr: Option<String>,
}

impl FieldSelector {
    fn parse(name: &str, spec: &str) -> Result<Self, AppError> {
        let (css, attr) = split_attr(spec);
        let selector = Selector::parse(css).map_err(|e| {
            AppError::ConfigError(format!("Invalid selector for '{name}' ({spec}): {e}"))
        })?;
        Ok(Self {
            selector,
            attr: attr.map(str::to_string),
        })
    }

    /// First non-empty value under `scope`.
    fn first(&self, scope: ElementRef<'_>) -> Option<String> {
        scope.select(&self.selector).find_map(|el| {
            let value = match &self.attr {
                Some(attr) => el.value().attr(attr).map(collapse_whitespace),
                None => Some(collapse_whitespace(&el.text().collect::<String>())),
            };
            value.filter(|v| !v.is_empty())
        })
    }
}

/// Split a trailing `@attr` off a field spec. An `@` inside an attribute
/// selector (e.g. `a[href*="@"]`) is left alone.
fn split_attr(spec: &str) -> (&str, Option<&str>) {
    match spec.rsplit_once('@') {
        Some((css, attr))
            if !css.trim().is_empty()
                && !attr.is_empty()
                && attr
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':') =>
        {
            (css.trim(), Some(attr))
        }
        _ => (spec.trim(), None),
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compile_fields(
    fields: &BTreeMap<String, String>,
) -> Result<Vec<(String, FieldSelector)>, AppError> {
    fields
        .iter()
        .map(|(name, spec)| Ok((name.clone(), FieldSelector::parse(name, spec)?)))
        .collect()
}

fn collect_fields(fields: &[(String, FieldSelector)], scope: ElementRef<'_>) -> FieldMap {
    fields
        .iter()
        .filter_map(|(name, field)| field.first(scope).map(|v| (name.clone(), v)))
        .collect()
}

#[derive(Debug)]
struct Compiled {
    header: Vec<(String, FieldSelector)>,
    item: Selector,
    link: FieldSelector,
    summary: Vec<(String, FieldSelector)>,
    detail: Vec<(String, FieldSelector)>,
}

/// [`Extractor`] driven by CSS selectors, using `scraper`.
///
/// Selectors are compiled once at construction; clones share them.
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    compiled: Arc<Compiled>,
}

impl SelectorExtractor {
    pub fn new(config: &SelectorConfig) -> Result<Self, AppError> {
        if config.detail.fields.is_empty() {
            return Err(AppError::ConfigError(
                "Selector config defines no detail fields".to_string(),
            ));
        }

        let item = Selector::parse(&config.listing.item).map_err(|e| {
            AppError::ConfigError(format!(
                "Invalid item selector ({}): {e}",
                config.listing.item
            ))
        })?;

        let compiled = Compiled {
            header: compile_fields(&config.listing.header)?,
            item,
            link: FieldSelector::parse("link", &config.listing.link)?,
            summary: compile_fields(&config.listing.fields)?,
            detail: compile_fields(&config.detail.fields)?,
        };

        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }
}

impl Extractor for SelectorExtractor {
    fn extract_listing(&self, document: &str) -> Result<ListingPage, AppError> {
        let html = Html::parse_document(document);
        let root = html.root_element();
        let c = &self.compiled;

        let header_fields = collect_fields(&c.header, root);
        let items: Vec<ListingItem> = root
            .select(&c.item)
            .map(|el| ListingItem::new(c.link.first(el), collect_fields(&c.summary, el)))
            .collect();

        if items.is_empty() && header_fields.is_empty() {
            return Err(AppError::MalformedDocument(
                "listing matched neither header fields nor items".to_string(),
            ));
        }

        tracing::debug!(items = items.len(), "Listing extracted");
        Ok(ListingPage {
            header_fields,
            items,
        })
    }

    fn extract_detail(&self, document: &str) -> Result<FieldMap, AppError> {
        let html = Html::parse_document(document);
        let fields = collect_fields(&self.compiled.detail, html.root_element());

        if fields.is_empty() {
            return Err(AppError::MalformedDocument(
                "detail matched none of the configured fields".to_string(),
            ));
        }
        Ok(fields)
    }
}
