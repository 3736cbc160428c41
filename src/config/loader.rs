//! Access policy documents: roles and query whitelists declared in JSON instead of code.

use crate::config::tree::{ConfigTree, Target};
use crate::config::types::{Action, ActionOptions, Scope};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionPolicy {
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    #[serde(default)]
    pub sideload_on: Option<Vec<String>>,
    #[serde(default)]
    pub filter_by: Option<Vec<String>>,
    #[serde(default)]
    pub sort_by: Option<Vec<String>>,
}

/// Action name -> policy. Keys are parsed into [`Action`] when applied.
pub type ActionPolicies = BTreeMap<String, ActionPolicy>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultPolicies {
    #[serde(default)]
    pub resource: ActionPolicies,
    #[serde(default)]
    pub has_one: ActionPolicies,
    #[serde(default)]
    pub has_many: ActionPolicies,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcePolicy {
    #[serde(default)]
    pub resource: ActionPolicies,
    #[serde(default)]
    pub has_one: BTreeMap<String, ActionPolicies>,
    #[serde(default)]
    pub has_many: BTreeMap<String, ActionPolicies>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default)]
    pub defaults: DefaultPolicies,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourcePolicy>,
}

impl ActionPolicy {
    fn options(&self) -> Result<ActionOptions, ConfigError> {
        let mut opts = ActionOptions::default();
        if let Some(roles) = &self.roles {
            opts = opts.roles(roles.iter().map(String::as_str));
        }
        if let Some(parents) = &self.sideload_on {
            let parents = parents
                .iter()
                .map(|p| p.parse::<Action>())
                .collect::<Result<Vec<_>, _>>()?;
            opts = opts.sideload_on(parents);
        }
        if let Some(fields) = &self.filter_by {
            opts = opts.filter_by(fields.iter().cloned());
        }
        if let Some(fields) = &self.sort_by {
            opts = opts.sort_by(fields.iter().cloned());
        }
        Ok(opts)
    }
}

fn each_action(
    policies: &ActionPolicies,
    mut f: impl FnMut(Action, ActionOptions) -> Result<(), ConfigError>,
) -> Result<(), ConfigError> {
    for (name, policy) in policies {
        f(name.parse()?, policy.options()?)?;
    }
    Ok(())
}

impl PolicyDocument {
    /// Applies the `defaults` section. Must run before any resource entry exists.
    pub fn apply_defaults(&self, tree: &mut ConfigTree) -> Result<(), ConfigError> {
        each_action(&self.defaults.resource, |a, o| tree.set_default(Scope::Resource, a, o))?;
        each_action(&self.defaults.has_one, |a, o| tree.set_default(Scope::HasOne, a, o))?;
        each_action(&self.defaults.has_many, |a, o| tree.set_default(Scope::HasMany, a, o))?;
        Ok(())
    }

    /// Applies the per-resource sections on top of what code declared.
    pub fn apply_resources(&self, tree: &mut ConfigTree) -> Result<(), ConfigError> {
        for (name, res) in &self.resources {
            each_action(&res.resource, |a, o| tree.declare(Target::Resource(name), a, o))?;
            for (rel, policies) in &res.has_one {
                each_action(policies, |a, o| tree.declare(Target::HasOne(name, rel), a, o))?;
            }
            for (rel, policies) in &res.has_many {
                each_action(policies, |a, o| tree.declare(Target::HasMany(name, rel), a, o))?;
            }
        }
        Ok(())
    }
}

pub fn parse_policy(json: &str) -> Result<PolicyDocument, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

pub fn load_policy_file(path: impl AsRef<Path>) -> Result<PolicyDocument, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let doc = parse_policy(&raw)?;
    tracing::debug!(path = %path.display(), resources = doc.resources.len(), "loaded access policy");
    Ok(doc)
}
