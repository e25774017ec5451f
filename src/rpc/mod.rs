//! Framed RPC for the keeper contract.
//!
//! The agent exposes the composed keeper over a per-user UNIX-domain
//! socket. Frames are length-prefixed JSON messages: point operations are
//! unary, list operations stream one frame per element and finish with an
//! end-of-stream frame. Authentication is the 0600 file mode on the
//! socket; there is no TLS and the socket never leaves the machine.

pub mod client;
pub mod proto;
pub mod server;

pub use client::RpcKeeper;
pub use proto::ServiceInfo;

use std::path::PathBuf;

/// Base name for the per-user socket and pidfile.
pub const SERVICE_NAME: &str = "ghost.keeper";

/// The per-user socket path: `${TMPDIR}/ghost.keeper.<uid>`.
pub fn socket_path() -> PathBuf {
    let uid = nix::unistd::getuid();
    std::env::temp_dir().join(format!("{}.{}", SERVICE_NAME, uid))
}

/// The per-user pidfile path: `${TMPDIR}/ghost.keeper.<uid>.run`.
pub fn pidfile_path() -> PathBuf {
    let uid = nix::unistd::getuid();
    std::env::temp_dir().join(format!("{}.{}.run", SERVICE_NAME, uid))
}
