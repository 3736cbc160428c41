//! Roles and the authorization predicate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque role token, e.g. `superuser` or `owner`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Role(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role(s.to_string())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role(s)
    }
}

/// Unordered, duplicate-free set of roles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        RoleSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r.as_str() == role)
    }

    pub fn insert(&mut self, role: impl Into<Role>) -> bool {
        self.0.insert(role.into())
    }

    pub fn extend<I, R>(&mut self, roles: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.0.extend(roles.into_iter().map(Into::into));
    }

    pub fn intersects(&self, other: &RoleSet) -> bool {
        self.0.intersection(&other.0).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.0.iter()
    }
}

impl<R: Into<Role>> FromIterator<R> for RoleSet {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        RoleSet(iter.into_iter().map(Into::into).collect())
    }
}

/// `required` is satisfied by `caller` when it is empty or the two sets share a role.
pub fn authorized(required: &RoleSet, caller: &RoleSet) -> bool {
    required.is_empty() || required.intersects(caller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(names: &[&str]) -> RoleSet {
        names.iter().copied().collect()
    }

    #[test]
    fn empty_requirement_admits_anyone() {
        assert!(authorized(&RoleSet::new(), &RoleSet::new()));
        assert!(authorized(&RoleSet::new(), &set(&["user"])));
    }

    #[test]
    fn requirement_needs_a_shared_role() {
        let required = set(&["superuser", "owner"]);
        assert!(authorized(&required, &set(&["owner"])));
        assert!(!authorized(&required, &set(&["logged_in"])));
        assert!(!authorized(&required, &RoleSet::new()));
    }

    #[test]
    fn duplicates_collapse() {
        let roles = set(&["a", "a", "b"]);
        assert_eq!(roles.len(), 2);
    }

    proptest! {
        #[test]
        fn authorized_iff_empty_or_intersecting(
            required in proptest::collection::btree_set("[a-e]", 0..4),
            caller in proptest::collection::btree_set("[a-e]", 0..4),
        ) {
            let r: RoleSet = required.iter().cloned().collect();
            let c: RoleSet = caller.iter().cloned().collect();
            let expected = required.is_empty() || required.intersection(&caller).next().is_some();
            prop_assert_eq!(authorized(&r, &c), expected);
        }
    }
}
