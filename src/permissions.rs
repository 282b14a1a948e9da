//! Derives the set of permission tags a request requires, from its method, id presence, and
//! payload shape.

use std::collections::BTreeSet;

/// An HTTP method as consumed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Find, count, or index-of.
    Get,
    /// Create, or update-by-id if an id is present.
    Post,
    /// Update, single or bulk.
    Put,
    /// Remove.
    Delete,
}

/// A single permission tag. These are the vocabulary an external permission verifier resolves
/// against session/role policy; this crate never interprets them itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// `querying multiple objects`
    QueryMulti,
    /// `querying an object by id`
    QueryById,
    /// `creating an object`
    Create,
    /// `creating multiple objects`
    CreateMulti,
    /// `updating an object by id`
    UpdateById,
    /// `updating multiple objects`
    UpdateMulti,
    /// `deleting an object by id`
    DeleteById,
    /// `deleting multiple objects`
    DeleteMulti,
}

impl Permission {
    /// The human-readable tag used when talking to an external permission verifier.
    pub fn tag(&self) -> &'static str {
        match self {
            Permission::QueryMulti => "querying multiple objects",
            Permission::QueryById => "querying an object by id",
            Permission::Create => "creating an object",
            Permission::CreateMulti => "creating multiple objects",
            Permission::UpdateById => "updating an object by id",
            Permission::UpdateMulti => "updating multiple objects",
            Permission::DeleteById => "deleting an object by id",
            Permission::DeleteMulti => "deleting multiple objects",
        }
    }
}

/// Which permissions are required for a request shaped by `method`, whether an id was resolved,
/// and whether the body is a JSON array (bulk) rather than a single object.
pub fn required_permissions(
    method: Method,
    id_present: bool,
    body_is_sequence: bool,
) -> BTreeSet<Permission> {
    use Permission::*;

    match (method, id_present, body_is_sequence) {
        (Method::Get, true, _) => [QueryById].into(),
        (Method::Get, false, _) => [QueryMulti].into(),
        (Method::Post, _, true) => [CreateMulti].into(),
        (Method::Post, true, false) => [UpdateById, QueryById].into(),
        (Method::Post, false, false) => [Create].into(),
        (Method::Put, true, _) => [UpdateById, QueryById].into(),
        (Method::Put, false, _) => [QueryMulti, UpdateMulti].into(),
        (Method::Delete, true, _) => [DeleteById].into(),
        (Method::Delete, false, _) => [DeleteMulti].into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_by_id() {
        let perms = required_permissions(Method::Get, true, false);
        assert_eq!(perms, [Permission::QueryById].into());
    }

    #[test]
    fn post_bulk_create() {
        let perms = required_permissions(Method::Post, false, true);
        assert_eq!(perms, [Permission::CreateMulti].into());
    }

    #[test]
    fn put_bulk_update() {
        let perms = required_permissions(Method::Put, false, false);
        assert_eq!(perms, [Permission::QueryMulti, Permission::UpdateMulti].into());
    }

    #[test]
    fn delete_by_id() {
        let perms = required_permissions(Method::Delete, true, false);
        assert_eq!(perms, [Permission::DeleteById].into());
    }
}
