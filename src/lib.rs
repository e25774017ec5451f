//! # Ghost - A Personal Secret-Management Toolkit
//!
//! Ghost unifies heterogeneous credential stores — encrypted in-memory
//! stores, plaintext files, the OS keyring, interactive prompts — behind
//! a single keeper interface, and composes them with middleware for
//! routing, fallback, policy, and caching. A long-lived agent exposes the
//! composed keeper over a per-user IPC socket so multiple client
//! invocations share one session.
//!
//! ## Core Concepts
//!
//! - **Secret**: an immutable credential record with setter-returns-new
//!   semantics
//! - **Keeper**: the seven-operation contract every backend and
//!   middleware satisfies
//! - **Plugin registry**: maps configuration `type` strings to builders
//!   and validators
//! - **Builder**: turns named configuration entries into a live keeper
//!   graph, resolving embedded secret references on the way
//! - **Sync**: keyed replication of secrets between two keepers
//! - **Agent**: the long-running process serving the composed keeper over
//!   a UNIX socket
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CLI / RPC client                     │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Builder (config → keepers)               │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!            ┌────────────────┼────────────────┐
//!            ▼                ▼                ▼
//!     ┌────────────┐  ┌──────────────┐  ┌─────────────┐
//!     │ middleware │  │ leaf backends│  │  RPC server │
//!     │ router seq │  │ memory low   │  │  (agent)    │
//!     │ policy     │  │ keyring human│  │             │
//!     │ cache      │  │              │  │             │
//!     └────────────┘  └──────────────┘  └─────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use ghost::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     ghost::plugin::install_builtin();
//!
//!     let config = Arc::new(Config::load(None)?);
//!     let mut env = BuildEnv::new(config.clone());
//!     let keeper = env.build("main").await?;
//!
//!     let stored = keeper
//!         .set_secret(Secret::new("github", "alice", "hunter2"))
//!         .await?;
//!     println!("stored as {}", stored.id());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod keeper;
pub mod plugin;
pub mod rpc;
pub mod secrets;

/// Convenient re-exports of the most commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::keeper::sync::{Sync, SyncOptions};
    pub use crate::keeper::{check_config, BuildEnv};
    pub use crate::plugin::{BuildError, ValidationError};
    pub use crate::rpc::RpcKeeper;
    pub use crate::secrets::{Keeper, Secret, SecretError, SecretResult};
}
