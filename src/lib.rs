//! vpnctl - Windows VPN Profile Management Library
//!
//! Async management core for native Windows VPN profiles, built on the
//! PowerShell VPN cmdlets and the legacy `rasdial` utility:
//! - Scope-aware profile identity (per-user and all-users stores)
//! - Command execution with hidden windows and timeouts
//! - Normalization of command output into typed results
//! - Explicit privilege context for system-wide changes
//! - Background status polling with change notifications
//!
//! The OS configuration store is the only source of truth; nothing here
//! persists profile state.

pub mod error;
pub mod config;
pub mod validation;
pub mod redaction;
pub mod model;
pub mod runner;
pub mod commands;
pub mod normalizer;
pub mod privilege;
pub mod repository;
pub mod poller;
pub mod dispatcher;

// Re-export commonly used types
pub use error::{VpnctlError, VpnctlResult};
pub use config::VpnctlConfig;
pub use model::{
    filter_profiles, sort_profiles, ConnectionStatus, ProfileKey, ProfileSpec, Scope, TunnelType,
    VpnProfile,
};
pub use runner::{CommandOutcome, CommandOutput, CommandRunner, SystemRunner};
pub use commands::{CommandLine, Phonebooks, PowerShell, Rasdial};
pub use normalizer::{ErrorKind, OperationResult};
pub use privilege::{ElevationProbe, FixedElevation, PrivilegeContext, SystemElevationProbe};
pub use repository::{ProfileListing, ProfileRepository};
pub use poller::{
    diff_snapshots, PollEvent, PollerHandle, PollingCoordinator, ProfileChange, RefreshSequence,
    SnapshotGate,
};
pub use dispatcher::{Completion, DispatchEvent, OperationDispatcher, Request, Ticket};
