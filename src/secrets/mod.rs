//! Secret keepers for ghost.
//!
//! This module provides the uniform keeper contract and every keeper that
//! ships with ghost:
//!
//! - **Leaf backends**: in-memory sealed store, plaintext file store,
//!   OS keyring, interactive prompt
//! - **Middleware**: location router, first-match fallback sequence,
//!   acceptance/lifetime policy, read-through cache
//!
//! ## Architecture
//!
//! ```text
//! +--------------------+
//! |  Keeper (trait)    |
//! +--------------------+
//!     ^           ^
//!     |           |
//! +--------+  +-----------------------------+
//! | leaves |  | middleware                  |
//! | memory |  | router / seq / policy /     |
//! | low    |  | cache  (wrap Arc<dyn        |
//! | keyring|  | Keeper> children)           |
//! | human  |  +-----------------------------+
//! +--------+
//! ```
//!
//! Middleware is composed from configuration by [`crate::keeper::BuildEnv`];
//! each keeper module registers a plugin with the registry in
//! [`crate::plugin`].

mod error;
mod keeper;
mod types;

pub mod cache;
pub mod human;
pub mod keyring;
pub mod low;
pub mod memory;
pub mod policy;
pub mod router;
pub mod seq;

pub use error::{SecretError, SecretResult};
pub use keeper::{collect_all, collect_location, Keeper};
pub use types::Secret;

/// Generate a lexicographically sortable id: millisecond timestamp plus a
/// per-store counter, both fixed-width hex.
pub(crate) fn sortable_id(counter: u64) -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0);
    format!("{:012x}{:06x}", millis, counter & 0xffffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sortable_ids_order_by_counter() {
        let a = sortable_id(1);
        let b = sortable_id(2);
        assert!(a < b);
        assert_eq!(a.len(), 18);
    }
}
