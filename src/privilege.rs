//! Privilege gate
//!
//! Elevation is an explicit capability passed to the repository, not a
//! process-wide global. Tests inject fixed contexts; the binary uses the
//! system probe. The probe result is cached per context until `refresh`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
#[cfg(windows)]
use tracing::warn;

use crate::commands::PowerShell;
use crate::model::Scope;
use crate::normalizer::{ErrorKind, OperationResult};
use crate::runner::{CommandOutcome, CommandRunner};

const UNCHECKED: u8 = 0;
const NOT_ELEVATED: u8 = 1;
const ELEVATED: u8 = 2;

/// Message returned when a system-wide change is attempted without elevation
pub const ELEVATION_REQUIRED: &str =
    "Admin privileges are required to manage system-wide VPN profiles. Run as Administrator.";

/// Source of truth for the elevation state of the current process
#[async_trait]
pub trait ElevationProbe: Send + Sync {
    async fn is_elevated(&self) -> bool;
}

/// Probe for the real process
///
/// Windows asks PowerShell whether the current principal holds the
/// Administrators role. Unix hosts check for effective UID 0.
pub struct SystemElevationProbe {
    #[cfg_attr(not(windows), allow(dead_code))]
    runner: Arc<dyn CommandRunner>,
    #[cfg_attr(not(windows), allow(dead_code))]
    powershell: PowerShell,
    #[cfg_attr(not(windows), allow(dead_code))]
    timeout: Duration,
}

impl SystemElevationProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, powershell: PowerShell, timeout: Duration) -> Self {
        Self {
            runner,
            powershell,
            timeout,
        }
    }
}

#[async_trait]
impl ElevationProbe for SystemElevationProbe {
    #[cfg(windows)]
    async fn is_elevated(&self) -> bool {
        let line = self.powershell.elevation_query();
        match self.runner.run(&line.program, &line.args, self.timeout).await {
            CommandOutcome::Completed(output) if output.success() => {
                crate::normalizer::parse_bool(&output.stdout).unwrap_or_else(|| {
                    warn!("Unexpected elevation query output, assuming not elevated");
                    false
                })
            }
            outcome => {
                warn!("Elevation query failed ({:?}), assuming not elevated", outcome_kind(&outcome));
                false
            }
        }
    }

    #[cfg(not(windows))]
    async fn is_elevated(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn outcome_kind(outcome: &CommandOutcome) -> &'static str {
    match outcome {
        CommandOutcome::Completed(_) => "non-zero exit",
        CommandOutcome::TimedOut { .. } => "timeout",
        CommandOutcome::SpawnFailed(_) => "spawn failure",
    }
}

/// Probe with a predetermined answer
#[derive(Debug, Clone, Copy)]
pub struct FixedElevation(pub bool);

#[async_trait]
impl ElevationProbe for FixedElevation {
    async fn is_elevated(&self) -> bool {
        self.0
    }
}

/// Elevation capability handed to the repository
#[derive(Clone)]
pub struct PrivilegeContext {
    probe: Arc<dyn ElevationProbe>,
    state: Arc<AtomicU8>,
}

impl PrivilegeContext {
    pub fn new(probe: Arc<dyn ElevationProbe>) -> Self {
        Self {
            probe,
            state: Arc::new(AtomicU8::new(UNCHECKED)),
        }
    }

    /// Context that always reports an elevated process
    pub fn elevated() -> Self {
        Self::new(Arc::new(FixedElevation(true)))
    }

    /// Context that always reports a non-elevated process
    pub fn not_elevated() -> Self {
        Self::new(Arc::new(FixedElevation(false)))
    }

    /// Cached elevation state, probing on first use
    pub async fn check_elevated(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            ELEVATED => true,
            NOT_ELEVATED => false,
            _ => self.refresh().await,
        }
    }

    /// Probe again, replacing the cached value
    pub async fn refresh(&self) -> bool {
        let elevated = self.probe.is_elevated().await;
        self.state
            .store(if elevated { ELEVATED } else { NOT_ELEVATED }, Ordering::Release);
        info!("Process elevation: {}", if elevated { "elevated" } else { "not elevated" });
        elevated
    }

    /// Cached value without probing
    pub fn cached(&self) -> Option<bool> {
        match self.state.load(Ordering::Acquire) {
            ELEVATED => Some(true),
            NOT_ELEVATED => Some(false),
            _ => None,
        }
    }

    /// Gate a non-read operation on `scope`
    ///
    /// Returns the failure to report when the operation must not proceed.
    /// User-scope operations always pass without probing.
    pub async fn require_for(&self, scope: Scope, action: &str) -> Option<OperationResult> {
        if !scope.is_all_users() {
            return None;
        }
        if self.check_elevated().await {
            return None;
        }

        debug!("Rejecting system-wide {} without elevation", action);
        Some(OperationResult::failure(
            ErrorKind::InsufficientPrivilege,
            ELEVATION_REQUIRED,
            String::new(),
        ))
    }
}

impl std::fmt::Debug for PrivilegeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeContext")
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts probes and flips its answer on demand
    struct CountingProbe {
        calls: AtomicUsize,
        answer: AtomicU8,
    }

    #[async_trait]
    impl ElevationProbe for CountingProbe {
        async fn is_elevated(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.load(Ordering::SeqCst) == 1
        }
    }

    #[tokio::test]
    async fn test_probe_is_cached_until_refresh() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            answer: AtomicU8::new(0),
        });
        let ctx = PrivilegeContext::new(probe.clone());

        assert_eq!(ctx.cached(), None);
        assert!(!ctx.check_elevated().await);
        assert!(!ctx.check_elevated().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        probe.answer.store(1, Ordering::SeqCst);
        assert!(!ctx.check_elevated().await);
        assert!(ctx.refresh().await);
        assert!(ctx.check_elevated().await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_user_scope_never_probes() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            answer: AtomicU8::new(0),
        });
        let ctx = PrivilegeContext::new(probe.clone());

        assert!(ctx.require_for(Scope::User, "delete").await.is_none());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_users_rejected_without_elevation() {
        let result = tokio_test::block_on(PrivilegeContext::not_elevated().require_for(Scope::AllUsers, "create"))
            .expect("rejected");
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientPrivilege));
        assert!(result.message.contains("Run as Administrator"));

        let allowed = tokio_test::block_on(PrivilegeContext::elevated().require_for(Scope::AllUsers, "create"));
        assert!(allowed.is_none());
    }
}
