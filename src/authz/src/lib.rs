//! # Realm Authorization Core
//!
//! Multi-tenant authorization for realm-scoped users.
//!
//! ## Features
//!
//! - **Principal resolution** from Ed25519-signed bearer credentials
//! - **IAM-style policies** with wildcard patterns and typed conditions
//! - **Explicit-deny supremacy** over every allow
//! - **Permission records** with expiry, `*` actions and read-fallback
//! - **Async-first design** using Tokio runtime, with cancellation
//!
//! ## Example
//!
//! ```rust
//! use realm_authz::{DecisionEngine, EngineConfig, InMemoryStore, Principal};
//! use realm_authz::permission::{PermissionLevel, PermissionRecord};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryStore::new());
//!     store.insert_permission(
//!         PermissionRecord::for_user("perm-1", "u1", "R1", "posts", PermissionLevel::Readwrite)
//!             .with_actions(["read", "update"]),
//!     );
//!
//!     let engine = DecisionEngine::new(EngineConfig::default(), store.clone(), store);
//!     let principal = Principal {
//!         user_id: "u1".into(),
//!         realm_id: "R1".into(),
//!         username: "alice".into(),
//!         email: "alice@example.com".into(),
//!         roles: vec![],
//!     };
//!
//!     let decision = engine
//!         .check(Some(&principal), "update", "posts", &principal.context())
//!         .await?;
//!
//!     if decision.allowed {
//!         println!("Access granted: {}", decision.reason);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod permission;
pub mod policy;
pub mod principal;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AuthzConfig;
pub use context::ContextBuilder;
pub use engine::{Decision, DecisionEngine, DecisionSource, EngineConfig, Evaluation};
pub use error::{AuthzError, PrincipalError, Result, StoreError};
pub use permission::{PermissionLevel, PermissionRecord, PermissionStore};
pub use policy::{Effect, Policy, PolicyStore, Statement};
pub use principal::{Principal, PrincipalResolver, ResolverConfig, UserDirectory};
pub use store::InMemoryStore;
pub use types::{AccessRequest, Context, Requirement};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
