//! Action vocabulary and per-action access configuration.

use crate::error::ConfigError;
use crate::roles::RoleSet;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Which family of routes an action belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Resource,
    HasOne,
    HasMany,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Resource => "resource",
            Scope::HasOne => "has_one",
            Scope::HasMany => "has_many",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Index,
    Show,
    ShowMany,
    Create,
    Update,
    Destroy,
    Pluck,
    Prune,
    Graft,
    Fetch,
    Clear,
    Replace,
    Merge,
    Subtract,
}

impl Action {
    pub const ALL: [Action; 14] = [
        Action::Index,
        Action::Show,
        Action::ShowMany,
        Action::Create,
        Action::Update,
        Action::Destroy,
        Action::Pluck,
        Action::Prune,
        Action::Graft,
        Action::Fetch,
        Action::Clear,
        Action::Replace,
        Action::Merge,
        Action::Subtract,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Index => "index",
            Action::Show => "show",
            Action::ShowMany => "show_many",
            Action::Create => "create",
            Action::Update => "update",
            Action::Destroy => "destroy",
            Action::Pluck => "pluck",
            Action::Prune => "prune",
            Action::Graft => "graft",
            Action::Fetch => "fetch",
            Action::Clear => "clear",
            Action::Replace => "replace",
            Action::Merge => "merge",
            Action::Subtract => "subtract",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Action::Index
            | Action::Show
            | Action::ShowMany
            | Action::Create
            | Action::Update
            | Action::Destroy => Scope::Resource,
            Action::Pluck | Action::Prune | Action::Graft => Scope::HasOne,
            Action::Fetch | Action::Clear | Action::Replace | Action::Merge | Action::Subtract => {
                Scope::HasMany
            }
        }
    }

    /// Actions of one route family.
    pub fn in_scope(scope: Scope) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| a.scope() == scope)
    }

    /// Number of positional values a helper returns before the options hash.
    /// `create` returns `(id, resource)`; everything else a single value.
    pub fn arity(self) -> usize {
        match self {
            Action::Create => 2,
            _ => 1,
        }
    }

    /// Actions whose single value is a collection of models.
    pub fn returns_collection(self) -> bool {
        matches!(self, Action::Index | Action::ShowMany | Action::Fetch)
    }

    /// Relationship writes that may run as part of a parent create/update.
    pub fn sideloadable(self) -> bool {
        matches!(
            self,
            Action::Prune | Action::Graft | Action::Clear | Action::Replace | Action::Merge
        )
    }

    /// Collection reads that accept `filter_by` / `sort_by` whitelists.
    pub fn filterable(self) -> bool {
        matches!(self, Action::Index | Action::Fetch)
    }

    /// Conflict errors are only translated for these unless settings say otherwise.
    pub fn default_conflict_actions() -> BTreeSet<Action> {
        [
            Action::Create,
            Action::Update,
            Action::Graft,
            Action::Merge,
            Action::Replace,
        ]
        .into_iter()
        .collect()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| ConfigError::UnknownAction(s.to_string()))
    }
}

/// Access configuration of one (resource, action) or (resource, relationship, action).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionConfig {
    pub roles: RoleSet,
    /// Parent actions (`create` / `update`) under which this relationship write is allowed
    /// without the caller holding `roles`.
    pub sideload_on: BTreeSet<Action>,
    pub filter_by: BTreeSet<String>,
    pub sort_by: BTreeSet<String>,
}

/// Options given to a declaration; unset fields leave the entry untouched.
#[derive(Clone, Debug, Default)]
pub struct ActionOptions {
    pub roles: Option<RoleSet>,
    pub sideload_on: Option<BTreeSet<Action>>,
    pub filter_by: Option<BTreeSet<String>>,
    pub sort_by: Option<BTreeSet<String>>,
}

impl ActionOptions {
    pub fn roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<crate::roles::Role>,
    {
        self.roles = Some(roles.into_iter().collect());
        self
    }

    pub fn sideload_on(mut self, parents: impl IntoIterator<Item = Action>) -> Self {
        self.sideload_on = Some(parents.into_iter().collect());
        self
    }

    pub fn filter_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_by = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort_by = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Checks the options against what `action` accepts.
    pub fn check(&self, action: Action) -> Result<(), ConfigError> {
        if let Some(parents) = &self.sideload_on {
            if !action.sideloadable() {
                return Err(ConfigError::UnsupportedOption {
                    action,
                    option: "sideload_on",
                });
            }
            if let Some(bad) = parents
                .iter()
                .find(|p| !matches!(p, Action::Create | Action::Update))
            {
                return Err(ConfigError::Validation(format!(
                    "sideload_on for `{}` names `{}`; only create and update can sideload",
                    action, bad
                )));
            }
        }
        if self.filter_by.is_some() && !action.filterable() {
            return Err(ConfigError::UnsupportedOption {
                action,
                option: "filter_by",
            });
        }
        if self.sort_by.is_some() && !action.filterable() {
            return Err(ConfigError::UnsupportedOption {
                action,
                option: "sort_by",
            });
        }
        Ok(())
    }

    pub(crate) fn apply(self, entry: &mut ActionConfig) {
        if let Some(roles) = self.roles {
            entry.roles = roles;
        }
        if let Some(parents) = self.sideload_on {
            entry.sideload_on = parents;
        }
        if let Some(fields) = self.filter_by {
            entry.filter_by = fields;
        }
        if let Some(fields) = self.sort_by {
            entry.sort_by = fields;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_parse_back() {
        for a in Action::ALL {
            assert_eq!(a.name().parse::<Action>().unwrap(), a);
        }
        assert!(matches!("explode".parse::<Action>(), Err(ConfigError::UnknownAction(_))));
    }

    #[test]
    fn scopes_partition_the_actions() {
        assert_eq!(Action::in_scope(Scope::Resource).count(), 6);
        assert_eq!(Action::in_scope(Scope::HasOne).count(), 3);
        assert_eq!(Action::in_scope(Scope::HasMany).count(), 5);
    }

    #[test]
    fn options_rejected_where_unsupported() {
        let opts = ActionOptions::default().sideload_on([Action::Create]);
        assert!(opts.check(Action::Merge).is_ok());
        assert!(opts.check(Action::Subtract).is_err());

        let opts = ActionOptions::default().sideload_on([Action::Destroy]);
        assert!(opts.check(Action::Graft).is_err());

        let opts = ActionOptions::default().filter_by(["title"]);
        assert!(opts.check(Action::Index).is_ok());
        assert!(opts.check(Action::Show).is_err());
    }
}
