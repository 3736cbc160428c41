//! Resource objects as helpers return them, and identifiers as clients send them.

use crate::case::{dedasherize, object_keys_dedasherized};
use crate::error::ApiError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `{type, id}` pair naming one resource.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

impl Identifier {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Identifier {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("id must be a string, got {other}"))),
    }
}

/// Resource linkage of one relationship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
    One(Option<Identifier>),
    Many(Vec<Identifier>),
}

impl Linkage {
    pub fn to_value(&self) -> Value {
        match self {
            Linkage::One(None) => Value::Null,
            Linkage::One(Some(id)) => serde_json::json!(id),
            Linkage::Many(ids) => serde_json::json!(ids),
        }
    }
}

/// A relationship as loaded on a model: its linkage (if known) and the related models
/// available for `included`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relationship {
    pub data: Option<Linkage>,
    pub resources: Vec<Model>,
}

/// A resource as returned by action helpers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub kind: String,
    pub id: String,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, Relationship>,
    pub links: Map<String, Value>,
}

impl Model {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Model {
            kind: kind.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.kind.clone(), self.id.clone())
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// To-one linkage without the related model.
    pub fn has_one(mut self, name: &str, target: Option<Identifier>) -> Self {
        self.relationships.entry(name.to_string()).or_default().data = Some(Linkage::One(target));
        self
    }

    /// To-many linkage without the related models.
    pub fn has_many(mut self, name: &str, targets: Vec<Identifier>) -> Self {
        self.relationships.entry(name.to_string()).or_default().data = Some(Linkage::Many(targets));
        self
    }

    /// Related models for `included`; linkage is derived from them unless already set.
    pub fn with_related(mut self, name: &str, models: Vec<Model>, to_many: bool) -> Self {
        let rel = self.relationships.entry(name.to_string()).or_default();
        if rel.data.is_none() {
            let ids: Vec<Identifier> = models.iter().map(Model::identifier).collect();
            rel.data = Some(if to_many {
                Linkage::Many(ids)
            } else {
                Linkage::One(ids.into_iter().next())
            });
        }
        rel.resources = models;
        self
    }

    pub fn link(mut self, name: &str, href: impl Into<String>) -> Self {
        self.links.insert(name.to_string(), Value::String(href.into()));
        self
    }

    pub fn linkage(&self, rel: &str) -> Option<&Linkage> {
        self.relationships.get(rel).and_then(|r| r.data.as_ref())
    }
}

/// Primary data of a create or update request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceObject {
    pub kind: Option<String>,
    pub id: Option<String>,
    /// Attribute names de-dasherized.
    pub attributes: Map<String, Value>,
    /// Relationship name (de-dasherized) -> raw relationship object, in payload order.
    pub relationships: Vec<(String, Value)>,
}

impl ResourceObject {
    /// Reads `data` from a request document. Absent or non-object data is `None`.
    pub fn from_document(doc: &Value) -> Result<Option<Self>, ApiError> {
        let data = match doc.get("data") {
            Some(Value::Object(d)) => d,
            _ => return Ok(None),
        };
        let kind = data.get("type").and_then(Value::as_str).map(str::to_string);
        let id = match data.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => return Err(ApiError::bad_request("Resource id must be a string")),
        };
        let mut attributes = match data.get("attributes") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(a)) => a.clone(),
            Some(_) => return Err(ApiError::bad_request("Resource attributes must be an object")),
        };
        object_keys_dedasherized(&mut attributes);
        let relationships = match data.get("relationships") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(r)) => r.iter().map(|(k, v)| (dedasherize(k), v.clone())).collect(),
            Some(_) => {
                return Err(ApiError::bad_request("Resource relationships must be an object"))
            }
        };
        Ok(Some(ResourceObject {
            kind,
            id,
            attributes,
            relationships,
        }))
    }
}

/// Parses the `data` member of a relationship document.
pub fn parse_linkage(doc: &Value) -> Result<Linkage, ApiError> {
    let data = doc
        .get("data")
        .ok_or_else(|| ApiError::bad_request("Relationship document must have a `data' member"))?;
    match data {
        Value::Null => Ok(Linkage::One(None)),
        Value::Object(_) => serde_json::from_value(data.clone())
            .map(|id| Linkage::One(Some(id)))
            .map_err(|e| ApiError::bad_request(format!("Malformed resource identifier: {e}"))),
        Value::Array(_) => serde_json::from_value(data.clone())
            .map(Linkage::Many)
            .map_err(|e| ApiError::bad_request(format!("Malformed resource identifiers: {e}"))),
        _ => Err(ApiError::bad_request("Relationship data must be null, an object or an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_accept_numeric_ids() {
        let id: Identifier = serde_json::from_value(json!({"type": "tags", "id": 7})).unwrap();
        assert_eq!(id, Identifier::new("tags", "7"));
    }

    #[test]
    fn resource_object_dedasherizes_and_keeps_relationship_order() {
        let doc = json!({"data": {
            "type": "posts", "id": "hello",
            "attributes": {"display-title": "Hi"},
            "relationships": {
                "tags": {"data": []},
                "author": {"data": {"type": "authors", "id": "1"}}
            }
        }});
        let ro = ResourceObject::from_document(&doc).unwrap().unwrap();
        assert_eq!(ro.kind.as_deref(), Some("posts"));
        assert_eq!(ro.attributes["display_title"], "Hi");
        let names: Vec<&str> = ro.relationships.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["tags", "author"]);
    }

    #[test]
    fn linkage_shapes() {
        assert_eq!(parse_linkage(&json!({"data": null})).unwrap(), Linkage::One(None));
        assert_eq!(
            parse_linkage(&json!({"data": [{"type": "tags", "id": "1"}]})).unwrap(),
            Linkage::Many(vec![Identifier::new("tags", "1")])
        );
        assert!(parse_linkage(&json!({})).is_err());
        assert!(parse_linkage(&json!({"data": 3})).is_err());
    }

    #[test]
    fn with_related_derives_linkage() {
        let post = Model::new("posts", "1")
            .with_related("tags", vec![Model::new("tags", "a")], true)
            .with_related("author", vec![Model::new("authors", "9")], false);
        assert_eq!(post.linkage("tags"), Some(&Linkage::Many(vec![Identifier::new("tags", "a")])));
        assert_eq!(
            post.linkage("author"),
            Some(&Linkage::One(Some(Identifier::new("authors", "9"))))
        );
    }
}
