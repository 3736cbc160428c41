//! Build-time validation: path uniqueness, relationship consistency, policy references.

use crate::config::tree::ConfigTree;
use crate::config::types::{Action, Scope};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Shape of one declared resource, as far as validation is concerned.
#[derive(Clone, Debug, Default)]
pub struct ResourceOutline {
    pub name: String,
    pub path_segment: String,
    pub id_pattern: Option<String>,
    /// Relationship name -> declared related type (`None` means the relationship name is the type).
    pub has_one: Vec<(String, Option<String>)>,
    pub has_many: Vec<(String, Option<String>)>,
    /// Relationship writes that were given a helper, per relationship.
    pub bound: Vec<(Scope, String, Action)>,
}

/// Compiles an `{id}` constraint, anchored at both ends.
pub fn compile_id_pattern(resource: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| ConfigError::InvalidIdPattern {
        resource: resource.to_string(),
        source,
    })
}

pub fn validate(outlines: &[ResourceOutline], tree: &ConfigTree) -> Result<(), ConfigError> {
    let names: HashSet<&str> = outlines.iter().map(|o| o.name.as_str()).collect();
    let by_name: HashMap<&str, &ResourceOutline> =
        outlines.iter().map(|o| (o.name.as_str(), o)).collect();

    let mut path_segments = HashSet::new();
    for o in outlines {
        if !path_segments.insert(o.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(o.path_segment.clone()));
        }
        if let Some(p) = &o.id_pattern {
            compile_id_pattern(&o.name, p)?;
        }

        let mut rel_names = HashSet::new();
        for (rel, related) in o.has_one.iter().chain(o.has_many.iter()) {
            if !rel_names.insert(rel.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "relationship `{}` declared twice on `{}`",
                    rel, o.name
                )));
            }
            if rel == "relationships" {
                return Err(ConfigError::Validation(format!(
                    "`relationships` is reserved and cannot name a relationship of `{}`",
                    o.name
                )));
            }
            if let Some(t) = related {
                if !names.contains(t.as_str()) {
                    return Err(ConfigError::UnknownResource(t.clone()));
                }
            }
        }
    }

    // Everything the tree mentions must have been declared with a route.
    for (name, res) in tree.entries() {
        let outline = by_name
            .get(name)
            .ok_or_else(|| ConfigError::UnknownResource(name.to_string()))?;
        let declared = |rels: &[(String, Option<String>)], rel: &str| rels.iter().any(|(r, _)| r == rel);
        for (rel, actions) in res.has_one.iter() {
            if !declared(&outline.has_one, rel) {
                return Err(ConfigError::UnknownRelationship {
                    resource: name.to_string(),
                    relationship: rel.clone(),
                });
            }
            check_sideloads(outline, Scope::HasOne, rel, actions)?;
        }
        for (rel, actions) in res.has_many.iter() {
            if !declared(&outline.has_many, rel) {
                return Err(ConfigError::UnknownRelationship {
                    resource: name.to_string(),
                    relationship: rel.clone(),
                });
            }
            check_sideloads(outline, Scope::HasMany, rel, actions)?;
        }
    }
    Ok(())
}

/// `sideload_on` is only meaningful when the relationship write has a helper to run.
fn check_sideloads(
    outline: &ResourceOutline,
    scope: Scope,
    rel: &str,
    actions: &crate::config::tree::ActionMap,
) -> Result<(), ConfigError> {
    for (action, cfg) in actions {
        if cfg.sideload_on.is_empty() {
            continue;
        }
        let bound = outline
            .bound
            .iter()
            .any(|(s, r, a)| *s == scope && r == rel && a == action);
        if !bound {
            return Err(ConfigError::Validation(format!(
                "`{}/{}` allows sideloading `{}` but declares no helper for it",
                outline.name, rel, action
            )));
        }
    }
    Ok(())
}
