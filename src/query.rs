//! Query parameter normalization: filter, sort, page, include and sparse fieldsets.

use crate::action::Options;
use crate::case::{dasherize, dedasherize};
use crate::config::{Action, ActionConfig, Settings};
use crate::error::ApiError;
use crate::model::Model;
use axum::extract::Query;
use axum::http::Uri;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortField {
    /// De-dasherized attribute name, or `id`.
    pub field: String,
    pub descending: bool,
}

/// Query parameters of one request, parsed once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// `filter[field]=value`; field names de-dasherized.
    pub filter: BTreeMap<String, String>,
    pub sort: Vec<SortField>,
    pub page: BTreeMap<String, String>,
    /// Include paths, terms de-dasherized.
    pub include: Vec<String>,
    /// Type -> dasherized member names.
    pub fields: BTreeMap<String, Vec<String>>,
}

/// A resolved page: 1-based number and size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub number: usize,
    pub size: usize,
}

fn bracketed<'a>(key: &'a str, family: &str) -> Option<&'a str> {
    key.strip_prefix(family)?
        .strip_prefix('[')?
        .strip_suffix(']')
        .filter(|inner| !inner.is_empty())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl QueryParams {
    pub fn from_uri(uri: &Uri) -> Result<Self, ApiError> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|e| ApiError::bad_request(format!("Malformed query string: {e}")))?;
        Self::from_pairs(pairs)
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, ApiError> {
        let mut q = QueryParams::default();
        for (key, value) in pairs {
            if let Some(field) = bracketed(&key, "filter") {
                q.filter.insert(dedasherize(field), value);
            } else if let Some(kind) = bracketed(&key, "fields") {
                q.fields
                    .insert(kind.to_string(), split_list(&value).map(dasherize).collect());
            } else if let Some(name) = bracketed(&key, "page") {
                q.page.insert(name.to_string(), value);
            } else if key == "sort" {
                q.sort = split_list(&value)
                    .map(|term| match term.strip_prefix('-') {
                        Some(field) => SortField {
                            field: dedasherize(field),
                            descending: true,
                        },
                        None => SortField {
                            field: dedasherize(term),
                            descending: false,
                        },
                    })
                    .collect();
            } else if key == "include" {
                q.include = split_list(&value)
                    .map(|path| path.split('.').map(dedasherize).collect::<Vec<_>>().join("."))
                    .collect();
            }
        }
        Ok(q)
    }

    /// `filter[id]=a,b`, de-duplicated in request order.
    pub fn ids_filter(&self) -> Option<Vec<String>> {
        let raw = self.filter.get("id")?;
        let mut ids: Vec<String> = Vec::new();
        for id in split_list(raw) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        Some(ids)
    }

    /// Rejects filters and sorts outside the action's whitelists.
    pub fn check_whitelists(&self, action: Action, cfg: &ActionConfig) -> Result<(), ApiError> {
        if !action.filterable() {
            return Ok(());
        }
        if let Some(field) = self.filter.keys().find(|f| !cfg.filter_by.contains(*f)) {
            return Err(ApiError::bad_request(format!(
                "Filter `{}' is not supported by `{}'",
                dasherize(field),
                action
            )));
        }
        if let Some(s) = self.sort.iter().find(|s| !cfg.sort_by.contains(&s.field)) {
            return Err(ApiError::bad_request(format!(
                "Sort `{}' is not supported by `{}'",
                dasherize(&s.field),
                action
            )));
        }
        Ok(())
    }

    /// The page to serve, if paging applies: client `page[...]` or the configured default size.
    pub fn page_request(&self, settings: &Settings) -> Result<Option<PageRequest>, ApiError> {
        let parse = |name: &str| -> Result<Option<usize>, ApiError> {
            match self.page.get(name) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(Some)
                    .ok_or_else(|| {
                        ApiError::bad_request(format!("page[{name}] must be a positive integer"))
                    }),
            }
        };
        let number = parse("number")?;
        let size = parse("size")?;
        if number.is_none() && size.is_none() && settings.page_size.is_none() {
            return Ok(None);
        }
        let size = size
            .or(settings.page_size)
            .unwrap_or(settings.max_page_size);
        if size > settings.max_page_size {
            return Err(ApiError::bad_request(format!(
                "page[size] must not exceed {}",
                settings.max_page_size
            )));
        }
        Ok(Some(PageRequest {
            number: number.unwrap_or(1),
            size,
        }))
    }

    /// Client includes, or the helper's default when the client sent none, minus excluded prefixes.
    pub fn effective_includes(&self, options: &Options) -> Vec<String> {
        let mut included = if self.include.is_empty() {
            options.include.clone().unwrap_or_default()
        } else {
            self.include.clone()
        };
        if !options.exclude.is_empty() {
            included.retain(|path| {
                let terms: Vec<&str> = path.split('.').collect();
                !(1..=terms.len()).any(|n| options.exclude.iter().any(|x| *x == terms[..n].join(".")))
            });
        }
        included
    }

    /// Filters, sorts and pages a collection returned by `index` or `fetch`.
    /// Returns the page and its pagination links.
    pub fn filter_sort_page(
        &self,
        mut models: Vec<Model>,
        page: Option<PageRequest>,
        self_path: &str,
    ) -> (Vec<Model>, Map<String, Value>) {
        for (field, raw) in &self.filter {
            let wanted: Vec<&str> = split_list(raw).collect();
            models.retain(|m| {
                field_text(m, field).map_or(false, |text| wanted.iter().any(|w| *w == text))
            });
        }
        if !self.sort.is_empty() {
            models.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|s| {
                        let ord = compare_field(a, b, &s.field);
                        if s.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let mut links = Map::new();
        let Some(page) = page else {
            return (models, links);
        };
        let total = models.len();
        let last = total.div_ceil(page.size).max(1);
        let href = |n: usize| Value::String(self.page_href(self_path, n, page.size));
        links.insert("self".into(), href(page.number));
        links.insert("first".into(), href(1));
        links.insert("last".into(), href(last));
        if page.number > 1 {
            links.insert("prev".into(), href((page.number - 1).min(last)));
        }
        if page.number < last {
            links.insert("next".into(), href(page.number + 1));
        }
        let start = (page.number - 1).saturating_mul(page.size);
        let models = models.into_iter().skip(start).take(page.size).collect();
        (models, links)
    }

    fn page_href(&self, path: &str, number: usize, size: usize) -> String {
        let mut parts: Vec<String> = self
            .filter
            .iter()
            .map(|(k, v)| format!("filter[{}]={}", dasherize(k), v))
            .collect();
        if !self.sort.is_empty() {
            let sort: Vec<String> = self
                .sort
                .iter()
                .map(|s| format!("{}{}", if s.descending { "-" } else { "" }, dasherize(&s.field)))
                .collect();
            parts.push(format!("sort={}", sort.join(",")));
        }
        parts.push(format!("page[number]={number}"));
        parts.push(format!("page[size]={size}"));
        format!("{}?{}", path, parts.join("&"))
    }
}

fn field_text(model: &Model, field: &str) -> Option<String> {
    if field == "id" {
        return Some(model.id.clone());
    }
    match model.attribute(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_field(a: &Model, b: &Model, field: &str) -> Ordering {
    if field == "id" {
        return match (a.id.parse::<i64>(), b.id.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.id.cmp(&b.id),
        };
    }
    compare_values(a.attribute(field), b.attribute(field))
}

/// Nulls first, numbers numerically, everything else by its text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
