//! Store adapters
//!
//! Both adapters implement [`PolicyStore`](crate::policy::PolicyStore),
//! [`PermissionStore`](crate::permission::PermissionStore) and
//! [`UserDirectory`](crate::principal::UserDirectory) over the same tables.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryStore, ResourcePolicy, RolePolicy, Snapshot, UserPolicy, UserRole};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Whether a `(resource_type, resource_id)` binding applies to a resource.
///
/// `type:id` matches exactly; an id of `*` matches every id of the type and
/// the bare type name.
pub fn resource_binding_matches(resource_type: &str, resource_id: &str, resource: &str) -> bool {
    let Some(rest) = resource.strip_prefix(resource_type) else {
        return false;
    };

    match rest.strip_prefix(':') {
        Some(id) => resource_id == "*" || resource_id == id,
        None => rest.is_empty() && resource_id == "*",
    }
}
