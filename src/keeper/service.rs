//! Agent lifecycle: pidfile, socket, signals, status, recovery.
//!
//! The agent binds the per-user socket, writes its pid, and serves the
//! composed keeper until signaled. `HUP` asks for a graceful stop that
//! drains in-flight requests, `INT` and `QUIT` cancel them, and a third
//! signal of any kind stops the process hard. Status checking probes the
//! pidfile, the process, and the socket in order, with a distinct error
//! for each step so recovery can branch on what actually went wrong.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::rpc::proto::ServiceInfo;
use crate::rpc::{self, server, RpcKeeper};
use crate::secrets::policy::PolicyKeeper;
use crate::secrets::Keeper;

/// How urgently the agent should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopImmediacy {
    /// Finish in-flight requests first (`SIGHUP`).
    Graceful,
    /// Cancel in-flight requests (`SIGQUIT`).
    Quick,
    /// Kill the process (`SIGKILL`).
    Now,
}

/// Errors from agent lifecycle operations. Status checking fails with a
/// distinct kind per verification step.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The pidfile does not exist; the agent is presumably not running.
    #[error("no pidfile at {0:?}; the ghost agent does not appear to be running")]
    NoPidfile(PathBuf),

    /// The pidfile exists but does not hold a pid.
    #[error("unreadable pidfile at {0:?}")]
    BadPidfile(PathBuf),

    /// The recorded process is gone.
    #[error("no process with pid {0}")]
    NoProcess(i32),

    /// The recorded process could not be probed.
    #[error("unable to verify process {pid}: {message}")]
    ProcessCheckFailed {
        /// The recorded pid
        pid: i32,
        /// Why the probe failed
        message: String,
    },

    /// The process is alive but the socket did not answer.
    #[error("service unresponsive: {0}")]
    Unresponsive(String),

    /// A healthy agent is already serving.
    #[error("the ghost agent is already running (pid {0})")]
    AlreadyRunning(i32),

    /// Sending a signal failed.
    #[error("failed to signal pid {pid}: {message}")]
    SignalFailed {
        /// The target pid
        pid: i32,
        /// The kernel's complaint
        message: String,
    },

    /// Filesystem or socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where the agent's socket and pidfile live. Defaults to the per-user
/// paths in the system temp directory.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    /// The UNIX socket the agent serves on.
    pub socket: PathBuf,
    /// The pidfile recording the agent's process id.
    pub pidfile: PathBuf,
}

impl Default for ServicePaths {
    fn default() -> Self {
        Self {
            socket: rpc::socket_path(),
            pidfile: rpc::pidfile_path(),
        }
    }
}

/// A configured agent, ready to run.
pub struct Agent {
    /// The composed keeper to serve.
    pub keeper: Arc<dyn Keeper>,
    /// Name of the keeper, reported by `get_service_info`.
    pub keeper_name: String,
    /// Policy keepers to enforce periodically, by name.
    pub policies: Vec<(String, Arc<PolicyKeeper>)>,
    /// Period of the enforcement workers.
    pub enforcement_period: Duration,
    /// Socket and pidfile locations.
    pub paths: ServicePaths,
}

impl Agent {
    /// Bind the socket, write the pidfile, and serve until signaled.
    ///
    /// Refuses to start while a healthy agent is answering on the socket;
    /// stale files left by a crashed agent are cleaned up first.
    pub async fn run(self) -> Result<(), ServiceError> {
        // Refuse to start over a healthy agent; anything else is stale
        // state from a crash, which recovery clears.
        recover_at(&self.paths).await?;
        remove_if_present(&self.paths.socket)?;

        let listener = UnixListener::bind(&self.paths.socket)?;
        restrict_mode(&self.paths.socket)?;
        std::fs::write(&self.paths.pidfile, format!("{}", std::process::id()))?;
        restrict_mode(&self.paths.pidfile)?;

        let info = ServiceInfo {
            pid: std::process::id() as i32,
            keeper: self.keeper_name.clone(),
            enforcement_period: (!self.policies.is_empty()).then_some(self.enforcement_period),
            enforced_policies: self.policies.iter().map(|(name, _)| name.clone()).collect(),
        };

        let graceful = CancellationToken::new();
        let quick = CancellationToken::new();

        let mut hup = signal(SignalKind::hangup())?;
        let mut int = signal(SignalKind::interrupt())?;
        let mut quit = signal(SignalKind::quit())?;
        {
            let graceful = graceful.clone();
            let quick = quick.clone();
            tokio::spawn(async move {
                let mut received = 0u32;
                loop {
                    let is_hup = tokio::select! {
                        _ = hup.recv() => true,
                        _ = int.recv() => false,
                        _ = quit.recv() => false,
                    };
                    received += 1;
                    if received >= 3 {
                        tracing::error!("third signal received, stopping hard");
                        std::process::exit(130);
                    }
                    if is_hup {
                        tracing::info!("hangup received, stopping gracefully");
                        graceful.cancel();
                    } else {
                        tracing::info!("interrupt received, stopping now");
                        quick.cancel();
                    }
                }
            });
        }

        let worker_stop = CancellationToken::new();
        let mut workers = JoinSet::new();
        for (name, policy) in &self.policies {
            workers.spawn(enforcement_worker(
                name.clone(),
                policy.clone(),
                self.enforcement_period,
                worker_stop.clone(),
            ));
        }

        tracing::info!(
            socket = %self.paths.socket.display(),
            keeper = %self.keeper_name,
            policies = self.policies.len(),
            "ghost agent serving"
        );
        let served = server::serve(listener, self.keeper, info, graceful, quick).await;

        worker_stop.cancel();
        while workers.join_next().await.is_some() {}

        let _ = std::fs::remove_file(&self.paths.socket);
        let _ = std::fs::remove_file(&self.paths.pidfile);
        served?;
        Ok(())
    }
}

/// One periodic enforcement loop for one policy keeper. Each sweep is
/// bounded to a second less than the period so a slow backend cannot back
/// sweeps up behind each other.
async fn enforcement_worker(
    name: String,
    policy: Arc<PolicyKeeper>,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut budget = period.saturating_sub(Duration::from_secs(1));
    if budget.is_zero() {
        budget = period;
    }

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                match tokio::time::timeout(budget, policy.enforce_globally()).await {
                    Ok(Ok(deleted)) if deleted > 0 => {
                        tracing::info!(policy = %name, deleted, "policy enforcement sweep finished");
                    }
                    Ok(Ok(_)) => {
                        tracing::debug!(policy = %name, "policy enforcement sweep finished");
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(policy = %name, error = %err, "policy enforcement sweep failed");
                    }
                    Err(_) => {
                        tracing::warn!(policy = %name, "policy enforcement sweep timed out");
                    }
                }
            }
        }
    }
}

fn restrict_mode(path: &std::path::Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn read_pidfile(paths: &ServicePaths) -> Result<i32, ServiceError> {
    let data = match std::fs::read_to_string(&paths.pidfile) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServiceError::NoPidfile(paths.pidfile.clone()));
        }
        Err(err) => return Err(err.into()),
    };
    data.trim()
        .parse()
        .map_err(|_| ServiceError::BadPidfile(paths.pidfile.clone()))
}

fn probe_process(pid: i32) -> Result<(), ServiceError> {
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Err(ServiceError::NoProcess(pid)),
        Err(err) => Err(ServiceError::ProcessCheckFailed {
            pid,
            message: err.to_string(),
        }),
    }
}

/// Check whether the agent is healthy: pidfile, then process, then a
/// `get_service_info` call over the socket.
pub async fn status() -> Result<ServiceInfo, ServiceError> {
    status_at(&ServicePaths::default()).await
}

/// [`status`] against explicit paths.
pub async fn status_at(paths: &ServicePaths) -> Result<ServiceInfo, ServiceError> {
    let pid = read_pidfile(paths)?;
    probe_process(pid)?;

    let client = RpcKeeper::new(&paths.socket);
    client
        .service_info()
        .await
        .map_err(|err| ServiceError::Unresponsive(err.to_string()))
}

/// Signal the running agent to stop.
pub fn stop(immediacy: StopImmediacy) -> Result<(), ServiceError> {
    stop_at(&ServicePaths::default(), immediacy)
}

/// [`stop`] against explicit paths.
pub fn stop_at(paths: &ServicePaths, immediacy: StopImmediacy) -> Result<(), ServiceError> {
    let pid = read_pidfile(paths)?;
    let sig = match immediacy {
        StopImmediacy::Graceful => nix::sys::signal::Signal::SIGHUP,
        StopImmediacy::Quick => nix::sys::signal::Signal::SIGQUIT,
        StopImmediacy::Now => nix::sys::signal::Signal::SIGKILL,
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig).map_err(|err| {
        ServiceError::SignalFailed {
            pid,
            message: err.to_string(),
        }
    })
}

/// Clean up after a crashed or stuck agent, branching on what the status
/// check reports.
pub async fn recover() -> Result<(), ServiceError> {
    recover_at(&ServicePaths::default()).await
}

/// [`recover`] against explicit paths.
pub async fn recover_at(paths: &ServicePaths) -> Result<(), ServiceError> {
    match status_at(paths).await {
        Ok(info) => Err(ServiceError::AlreadyRunning(info.pid)),
        Err(ServiceError::NoPidfile(_)) => {
            remove_if_present(&paths.socket)?;
            Ok(())
        }
        Err(ServiceError::NoProcess(_)) => {
            remove_if_present(&paths.pidfile)?;
            Ok(())
        }
        Err(ServiceError::BadPidfile(_)) => {
            remove_if_present(&paths.pidfile)?;
            remove_if_present(&paths.socket)?;
            Ok(())
        }
        Err(ServiceError::Unresponsive(_)) | Err(ServiceError::ProcessCheckFailed { .. }) => {
            // The process is stuck: kill it, then clear its droppings.
            if let Ok(pid) = read_pidfile(paths) {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
            remove_if_present(&paths.pidfile)?;
            remove_if_present(&paths.socket)?;
            Ok(())
        }
        Err(other) => Err(other),
    }
}

fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(dir: &std::path::Path) -> ServicePaths {
        ServicePaths {
            socket: dir.join("ghost.sock"),
            pidfile: dir.join("ghost.pid"),
        }
    }

    #[tokio::test]
    async fn test_status_without_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let err = status_at(&paths_in(dir.path())).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoPidfile(_)));
    }

    #[tokio::test]
    async fn test_status_with_garbage_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        std::fs::write(&paths.pidfile, "not a pid").unwrap();
        let err = status_at(&paths).await.unwrap_err();
        assert!(matches!(err, ServiceError::BadPidfile(_)));
    }

    #[tokio::test]
    async fn test_status_with_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        // A reaped child leaves a pid nothing owns.
        let mut spawned = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = spawned.id() as i32;
        spawned.wait().unwrap();

        std::fs::write(&paths.pidfile, dead_pid.to_string()).unwrap();
        let err = status_at(&paths).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoProcess(_)));
    }

    #[tokio::test]
    async fn test_recover_removes_stale_state() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let mut spawned = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = spawned.id() as i32;
        spawned.wait().unwrap();

        std::fs::write(&paths.pidfile, dead_pid.to_string()).unwrap();
        std::fs::write(&paths.socket, "").unwrap();

        recover_at(&paths).await.unwrap();
        assert!(!paths.pidfile.exists());

        // With the pidfile gone, a second pass clears the socket.
        recover_at(&paths).await.unwrap();
        assert!(!paths.socket.exists());

        let err = status_at(&paths).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoPidfile(_)));
    }

    #[tokio::test]
    async fn test_stop_without_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let err = stop_at(&paths_in(dir.path()), StopImmediacy::Graceful).unwrap_err();
        assert!(matches!(err, ServiceError::NoPidfile(_)));
    }
}
