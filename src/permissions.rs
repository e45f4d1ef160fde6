//! Permission descriptors and scope resolution.
//!
//! A permission is a stable identifier mapped to the provider-specific OAuth
//! scopes it needs. Operations name the permissions they require and the
//! [`PermissionSet`] translates between the two vocabularies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Permission {
    pub fn new<I, S>(identifier: &str, name: &str, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            description: String::new(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Immutable lookup structure over a provider's permissions.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    by_id: HashMap<String, Permission>,
}

impl PermissionSet {
    pub fn new<I>(permissions: I) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        let by_id = permissions
            .into_iter()
            .map(|permission| (permission.identifier.clone(), permission))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, identifier: &str) -> Option<&Permission> {
        self.by_id.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Union of the scopes of the given permissions.
    pub fn required_scopes<'a, I>(&self, permissions: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a Permission>,
    {
        permissions
            .into_iter()
            .flat_map(|permission| permission.scopes.iter().cloned())
            .collect()
    }

    /// Union of the scopes of the permissions named by `ids`. Unknown ids are skipped.
    pub fn required_scopes_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> BTreeSet<String> {
        self.required_scopes(ids.iter().filter_map(|id| self.get(id.as_ref())))
    }

    /// Report whether `authorized_scopes` cover every permission in `required`,
    /// and which ones they do not.
    ///
    /// A permission is missing when any of its scopes is absent. The result is
    /// ordered by identifier and contains each permission at most once.
    pub fn check_missing<'a, I>(
        &self,
        required: I,
        authorized_scopes: &[String],
    ) -> (bool, Vec<Permission>)
    where
        I: IntoIterator<Item = &'a Permission>,
    {
        let authorized: BTreeSet<&str> = authorized_scopes.iter().map(String::as_str).collect();
        let missing: BTreeMap<&str, &Permission> = required
            .into_iter()
            .filter(|permission| {
                permission
                    .scopes
                    .iter()
                    .any(|scope| !authorized.contains(scope.as_str()))
            })
            .map(|permission| (permission.identifier.as_str(), permission))
            .collect();

        let missing: Vec<Permission> = missing.into_values().cloned().collect();
        (missing.is_empty(), missing)
    }

    /// Same as [`check_missing`](Self::check_missing) but keyed by permission id.
    ///
    /// Unknown ids count as missing since nothing can satisfy them.
    pub fn check_missing_by_ids<S: AsRef<str>>(
        &self,
        required_ids: &[S],
        authorized_scopes: &[String],
    ) -> (bool, BTreeSet<String>) {
        let authorized: BTreeSet<&str> = authorized_scopes.iter().map(String::as_str).collect();
        let missing: BTreeSet<String> = required_ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| match self.get(id) {
                Some(permission) => permission
                    .scopes
                    .iter()
                    .any(|scope| !authorized.contains(scope.as_str())),
                None => true,
            })
            .map(str::to_string)
            .collect();
        (missing.is_empty(), missing)
    }

    /// Permissions sharing at least one scope with `scopes`.
    pub fn permission_ids_from_scopes(&self, scopes: &[String]) -> BTreeSet<String> {
        let granted: BTreeSet<&str> = scopes.iter().map(String::as_str).collect();
        self.by_id
            .values()
            .filter(|permission| {
                permission
                    .scopes
                    .iter()
                    .any(|scope| granted.contains(scope.as_str()))
            })
            .map(|permission| permission.identifier.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> PermissionSet {
        PermissionSet::new(vec![
            Permission::new("read_records", "Read records", ["data.records:read"]),
            Permission::new(
                "write_records",
                "Write records",
                ["data.records:read", "data.records:write"],
            ),
            Permission::new("read_schema", "Read schema", ["schema.bases:read"]),
        ])
    }

    #[test]
    fn test_required_scopes_union() {
        let set = sample_set();
        let scopes = set.required_scopes_by_ids(&["read_records", "write_records", "unknown"]);
        assert_eq!(
            scopes.into_iter().collect::<Vec<_>>(),
            vec!["data.records:read", "data.records:write"]
        );
    }

    #[test]
    fn test_check_missing_reports_uncovered_permissions() {
        let set = sample_set();
        let required: Vec<&Permission> = ["write_records", "read_records"]
            .iter()
            .filter_map(|id| set.get(id))
            .collect();

        let authorized = vec!["data.records:read".to_string()];
        let (all_present, missing) = set.check_missing(required.clone(), &authorized);
        assert!(!all_present);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].identifier, "write_records");

        let full = vec![
            "data.records:read".to_string(),
            "data.records:write".to_string(),
        ];
        let (all_present, missing) = set.check_missing(required, &full);
        assert!(all_present);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_check_missing_is_order_independent_and_deduplicated() {
        let set = sample_set();
        let a = set.get("read_schema").unwrap();
        let b = set.get("write_records").unwrap();

        let (_, first) = set.check_missing(vec![a, b, a], &[]);
        let (_, second) = set.check_missing(vec![b, a], &[]);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_check_missing_by_ids_treats_unknown_as_missing() {
        let set = sample_set();
        let (all_present, missing) = set.check_missing_by_ids(
            &["read_records", "does_not_exist"],
            &["data.records:read".to_string()],
        );
        assert!(!all_present);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["does_not_exist"]);
    }

    #[test]
    fn test_permission_ids_from_scopes() {
        let set = sample_set();
        let ids = set.permission_ids_from_scopes(&["data.records:write".to_string()]);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["write_records"]);

        let ids = set.permission_ids_from_scopes(&["data.records:read".to_string()]);
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["read_records", "write_records"]
        );

        assert!(set.permission_ids_from_scopes(&[]).is_empty());
    }
}
