//! JSON:API document serialization.

use crate::case::dasherize;
use crate::error::ErrorObject;
use crate::model::{Identifier, Linkage, Model};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Per-response serialization inputs supplied by the engine.
#[derive(Clone, Debug, Default)]
pub struct DocumentOptions {
    /// Include paths, already pruned.
    pub include: Vec<String>,
    /// Sparse fieldsets: type -> dasherized member names.
    pub fields: BTreeMap<String, Vec<String>>,
    pub meta: Option<Map<String, Value>>,
    pub links: Map<String, Value>,
}

/// Builds response documents. Swap it on the engine to change the wire shape.
pub trait Serializer: Send + Sync + 'static {
    /// Single primary resource, or `data: null` with meta.
    fn model(&self, model: Option<&Model>, opts: &DocumentOptions) -> Value;
    fn models(&self, models: &[Model], opts: &DocumentOptions) -> Value;
    /// Relationship document of `rel` on `parent`.
    fn linkage(&self, parent: &Identifier, rel: &str, linkage: &Linkage, opts: &DocumentOptions) -> Value;
    fn errors(&self, errors: &[ErrorObject]) -> Value;
}

/// Default serializer: dasherized member names, `self`/`related` links under `base_url`.
#[derive(Clone, Debug)]
pub struct DocumentSerializer {
    base_url: String,
    version: String,
}

impl DocumentSerializer {
    pub fn new(base_url: impl Into<String>, version: impl Into<String>) -> Self {
        DocumentSerializer {
            base_url: base_url.into(),
            version: version.into(),
        }
    }

    pub fn self_link(&self, kind: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, dasherize(kind), id)
    }

    fn relationship_links(&self, kind: &str, id: &str, rel: &str) -> Value {
        let base = self.self_link(kind, id);
        json!({
            "self": format!("{}/relationships/{}", base, dasherize(rel)),
            "related": format!("{}/{}", base, dasherize(rel)),
        })
    }

    fn resource_object(&self, model: &Model, fields: &BTreeMap<String, Vec<String>>) -> Value {
        let wanted = fields.get(&model.kind);
        let keep = |name: &str| wanted.map_or(true, |w| w.iter().any(|f| f == name));

        let mut attributes = Map::new();
        for (k, v) in &model.attributes {
            let key = dasherize(k);
            if keep(&key) {
                attributes.insert(key, v.clone());
            }
        }
        let mut relationships = Map::new();
        for (name, rel) in &model.relationships {
            let key = dasherize(name);
            if !keep(&key) {
                continue;
            }
            let mut obj = Map::new();
            obj.insert("links".into(), self.relationship_links(&model.kind, &model.id, name));
            if let Some(data) = &rel.data {
                obj.insert("data".into(), data.to_value());
            }
            relationships.insert(key, Value::Object(obj));
        }
        let mut links = Map::new();
        links.insert("self".into(), Value::String(self.self_link(&model.kind, &model.id)));
        links.extend(model.links.clone());

        let mut out = Map::new();
        out.insert("type".into(), Value::String(dasherize(&model.kind)));
        out.insert("id".into(), Value::String(model.id.clone()));
        if !attributes.is_empty() {
            out.insert("attributes".into(), Value::Object(attributes));
        }
        if !relationships.is_empty() {
            out.insert("relationships".into(), Value::Object(relationships));
        }
        out.insert("links".into(), Value::Object(links));
        Value::Object(out)
    }

    /// Walks include paths from the primary data and collects related models once each.
    fn included(&self, primary: &[&Model], opts: &DocumentOptions) -> Vec<Value> {
        let mut seen: BTreeSet<Identifier> = primary.iter().map(|m| m.identifier()).collect();
        let mut out = Vec::new();
        for path in &opts.include {
            let mut frontier: Vec<&Model> = primary.to_vec();
            for term in path.split('.') {
                let next: Vec<&Model> = frontier
                    .iter()
                    .filter_map(|m| m.relationships.get(term))
                    .flat_map(|rel| rel.resources.iter())
                    .collect();
                for m in &next {
                    if seen.insert(m.identifier()) {
                        out.push(self.resource_object(m, &opts.fields));
                    }
                }
                frontier = next;
            }
        }
        out
    }

    fn document(&self, data: Value, included: Vec<Value>, opts: &DocumentOptions) -> Value {
        let mut doc = Map::new();
        doc.insert("data".into(), data);
        if !included.is_empty() {
            doc.insert("included".into(), Value::Array(included));
        }
        self.top_level(&mut doc, opts);
        Value::Object(doc)
    }

    fn top_level(&self, doc: &mut Map<String, Value>, opts: &DocumentOptions) {
        if !opts.links.is_empty() {
            doc.insert("links".into(), Value::Object(opts.links.clone()));
        }
        if let Some(meta) = &opts.meta {
            doc.insert("meta".into(), Value::Object(meta.clone()));
        }
        doc.insert("jsonapi".into(), json!({ "version": self.version }));
    }
}

impl Default for DocumentSerializer {
    fn default() -> Self {
        DocumentSerializer::new("", "1.0")
    }
}

impl Serializer for DocumentSerializer {
    fn model(&self, model: Option<&Model>, opts: &DocumentOptions) -> Value {
        match model {
            Some(m) => {
                let included = self.included(&[m], opts);
                self.document(self.resource_object(m, &opts.fields), included, opts)
            }
            None => self.document(Value::Null, Vec::new(), opts),
        }
    }

    fn models(&self, models: &[Model], opts: &DocumentOptions) -> Value {
        let primary: Vec<&Model> = models.iter().collect();
        let included = self.included(&primary, opts);
        let data = models
            .iter()
            .map(|m| self.resource_object(m, &opts.fields))
            .collect();
        self.document(Value::Array(data), included, opts)
    }

    fn linkage(&self, parent: &Identifier, rel: &str, linkage: &Linkage, opts: &DocumentOptions) -> Value {
        let mut doc = Map::new();
        doc.insert("links".into(), self.relationship_links(&parent.kind, &parent.id, rel));
        doc.insert("data".into(), linkage.to_value());
        if let Some(meta) = &opts.meta {
            doc.insert("meta".into(), Value::Object(meta.clone()));
        }
        doc.insert("jsonapi".into(), json!({ "version": self.version }));
        Value::Object(doc)
    }

    fn errors(&self, errors: &[ErrorObject]) -> Value {
        json!({ "errors": errors, "jsonapi": { "version": self.version } })
    }
}
