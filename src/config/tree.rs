//! Resource configuration tree: mutable while routes are declared, frozen before serving.

use crate::config::types::{Action, ActionConfig, ActionOptions, Scope};
use crate::error::ConfigError;
use std::collections::BTreeMap;

pub type ActionMap = BTreeMap<Action, ActionConfig>;

fn blank(scope: Scope) -> ActionMap {
    Action::in_scope(scope)
        .map(|a| (a, ActionConfig::default()))
        .collect()
}

/// Per-resource configuration: resource actions plus one action map per relationship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceConfig {
    pub resource: ActionMap,
    pub has_one: BTreeMap<String, ActionMap>,
    pub has_many: BTreeMap<String, ActionMap>,
}

impl ResourceConfig {
    pub fn action(&self, action: Action) -> Option<&ActionConfig> {
        self.resource.get(&action)
    }

    pub fn has_one_action(&self, rel: &str, action: Action) -> Option<&ActionConfig> {
        self.has_one.get(rel).and_then(|m| m.get(&action))
    }

    pub fn has_many_action(&self, rel: &str, action: Action) -> Option<&ActionConfig> {
        self.has_many.get(rel).and_then(|m| m.get(&action))
    }
}

/// Template every new entry is copied from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Defaults {
    pub resource: ActionMap,
    pub has_one: ActionMap,
    pub has_many: ActionMap,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            resource: blank(Scope::Resource),
            has_one: blank(Scope::HasOne),
            has_many: blank(Scope::HasMany),
        }
    }
}

impl Defaults {
    fn map_mut(&mut self, scope: Scope) -> &mut ActionMap {
        match scope {
            Scope::Resource => &mut self.resource,
            Scope::HasOne => &mut self.has_one,
            Scope::HasMany => &mut self.has_many,
        }
    }
}

/// Where a declaration lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target<'a> {
    Resource(&'a str),
    HasOne(&'a str, &'a str),
    HasMany(&'a str, &'a str),
}

impl Target<'_> {
    pub fn scope(&self) -> Scope {
        match self {
            Target::Resource(_) => Scope::Resource,
            Target::HasOne(..) => Scope::HasOne,
            Target::HasMany(..) => Scope::HasMany,
        }
    }
}

/// Setup-time tree. Entries are created on first reference from a deep copy of the defaults,
/// so later default changes never reach existing entries.
#[derive(Clone, Debug, Default)]
pub struct ConfigTree {
    defaults: Defaults,
    resources: BTreeMap<String, ResourceConfig>,
}

impl ConfigTree {
    pub fn new() -> Self {
        ConfigTree::default()
    }

    /// Changes the template for entries created from now on.
    pub fn set_default(
        &mut self,
        scope: Scope,
        action: Action,
        opts: ActionOptions,
    ) -> Result<(), ConfigError> {
        if action.scope() != scope {
            return Err(ConfigError::WrongScope { action, scope });
        }
        opts.check(action)?;
        let entry = self.defaults.map_mut(scope).entry(action).or_default();
        opts.apply(entry);
        Ok(())
    }

    /// Get-or-create the entry for `name`.
    pub fn config_for(&mut self, name: &str) -> &mut ResourceConfig {
        let defaults = &self.defaults;
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| ResourceConfig {
                resource: defaults.resource.clone(),
                has_one: BTreeMap::new(),
                has_many: BTreeMap::new(),
            })
    }

    pub fn has_one_for(&mut self, name: &str, rel: &str) -> &mut ActionMap {
        let template = self.defaults.has_one.clone();
        self.config_for(name)
            .has_one
            .entry(rel.to_string())
            .or_insert(template)
    }

    pub fn has_many_for(&mut self, name: &str, rel: &str) -> &mut ActionMap {
        let template = self.defaults.has_many.clone();
        self.config_for(name)
            .has_many
            .entry(rel.to_string())
            .or_insert(template)
    }

    /// Mutates the entry of `action` under `target`, creating parents as needed.
    pub fn declare(
        &mut self,
        target: Target<'_>,
        action: Action,
        opts: ActionOptions,
    ) -> Result<(), ConfigError> {
        if action.scope() != target.scope() {
            return Err(ConfigError::WrongScope {
                action,
                scope: target.scope(),
            });
        }
        opts.check(action)?;
        let map = match target {
            Target::Resource(name) => &mut self.config_for(name).resource,
            Target::HasOne(name, rel) => self.has_one_for(name, rel),
            Target::HasMany(name, rel) => self.has_many_for(name, rel),
        };
        opts.apply(map.entry(action).or_default());
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ResourceConfig)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn freeze(self) -> FrozenConfig {
        FrozenConfig {
            resources: self.resources,
        }
    }
}

/// Read-only configuration shared by every request.
///
/// There is no way to declare on it:
///
/// ```compile_fail
/// use jsonapi_sdk::config::{Action, ActionOptions, ConfigTree, Target};
/// let frozen = ConfigTree::new().freeze();
/// frozen.declare(Target::Resource("posts"), Action::Show, ActionOptions::default());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrozenConfig {
    resources: BTreeMap<String, ResourceConfig>,
}

impl FrozenConfig {
    pub fn resource(&self, name: &str) -> Result<&ResourceConfig, ConfigError> {
        self.resources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownResource(name.to_string()))
    }

    /// Configuration of `action` under `target`.
    pub fn lookup(&self, target: Target<'_>, action: Action) -> Result<&ActionConfig, ConfigError> {
        let unknown_rel = |name: &str, rel: &str| ConfigError::UnknownRelationship {
            resource: name.to_string(),
            relationship: rel.to_string(),
        };
        let entry = match target {
            Target::Resource(name) => self.resource(name)?.action(action),
            Target::HasOne(name, rel) => {
                let res = self.resource(name)?;
                res.has_one.get(rel).ok_or_else(|| unknown_rel(name, rel))?.get(&action)
            }
            Target::HasMany(name, rel) => {
                let res = self.resource(name)?;
                res.has_many.get(rel).ok_or_else(|| unknown_rel(name, rel))?.get(&action)
            }
        };
        entry.ok_or(ConfigError::WrongScope {
            action,
            scope: target.scope(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleSet;

    #[test]
    fn entries_copy_defaults_at_creation() {
        let mut tree = ConfigTree::new();
        tree.set_default(Scope::Resource, Action::Show, ActionOptions::default().roles(["user"]))
            .unwrap();
        tree.config_for("posts");
        tree.set_default(Scope::Resource, Action::Show, ActionOptions::default().roles(["admin"]))
            .unwrap();
        tree.config_for("tags");

        let frozen = tree.freeze();
        let posts = frozen.lookup(Target::Resource("posts"), Action::Show).unwrap();
        let tags = frozen.lookup(Target::Resource("tags"), Action::Show).unwrap();
        assert!(posts.roles.contains("user"));
        assert!(!posts.roles.contains("admin"));
        assert!(tags.roles.contains("admin"));
    }

    #[test]
    fn declare_rejects_wrong_family() {
        let mut tree = ConfigTree::new();
        let err = tree
            .declare(Target::HasOne("posts", "author"), Action::Merge, ActionOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::WrongScope { .. }));
    }

    #[test]
    fn declare_updates_in_place() {
        let mut tree = ConfigTree::new();
        tree.declare(
            Target::HasMany("posts", "tags"),
            Action::Merge,
            ActionOptions::default().roles(["owner"]).sideload_on([Action::Create]),
        )
        .unwrap();
        tree.declare(
            Target::HasMany("posts", "tags"),
            Action::Merge,
            ActionOptions::default().sideload_on([Action::Create, Action::Update]),
        )
        .unwrap();

        let frozen = tree.freeze();
        let merge = frozen.lookup(Target::HasMany("posts", "tags"), Action::Merge).unwrap();
        assert!(merge.roles.contains("owner"));
        assert_eq!(merge.sideload_on.len(), 2);
    }

    #[test]
    fn frozen_lookups_do_not_vivify() {
        let mut tree = ConfigTree::new();
        tree.config_for("posts");
        let frozen = tree.freeze();

        assert!(matches!(
            frozen.lookup(Target::Resource("ghosts"), Action::Show),
            Err(ConfigError::UnknownResource(_))
        ));
        assert!(matches!(
            frozen.lookup(Target::HasMany("posts", "ghosts"), Action::Fetch),
            Err(ConfigError::UnknownRelationship { .. })
        ));
        assert!(!frozen.contains("ghosts"));
        assert_eq!(
            frozen.lookup(Target::Resource("posts"), Action::Index).unwrap().roles,
            RoleSet::new()
        );
    }
}
