//! Profile repository
//!
//! Scope-aware CRUD, status and dial orchestration over the command runner.
//! The repository holds no profile state of its own: every listing is fetched
//! fresh from the OS, and mutations are reported as issued, never patched into
//! a local copy.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commands::{CommandLine, PowerShell, Rasdial};
use crate::config::VpnctlConfig;
use crate::error::VpnctlError;
use crate::model::{sort_profiles, ConnectionStatus, ProfileKey, ProfileSpec, Scope, VpnProfile};
use crate::normalizer::{
    add_credential_hint, normalize_operation, not_found, parse_profiles, parse_status, query_failure,
    ErrorKind, OperationResult,
};
use crate::privilege::PrivilegeContext;
use crate::runner::{CommandOutcome, CommandRunner};
use crate::validation::{validate_profile_name, validate_profile_spec};

/// Result of listing one or both scopes
///
/// A failed scope never hides the profiles of the other one; its failure is
/// reported next to them instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileListing {
    /// Profiles of every scope that answered, in listing order
    pub profiles: Vec<VpnProfile>,
    /// Scopes whose query failed
    pub failures: Vec<(Scope, OperationResult)>,
}

impl ProfileListing {
    /// Every requested scope answered
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, scope: Scope) -> bool {
        self.failures.iter().any(|(failed, _)| *failed == scope)
    }

    pub fn get(&self, key: &ProfileKey) -> Option<&VpnProfile> {
        self.profiles
            .iter()
            .find(|p| p.scope == key.scope && p.name == key.name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    query: Duration,
    command: Duration,
    dial: Duration,
    wait_poll: Duration,
    wait_max: Duration,
}

/// Profile repository over both OS stores
#[derive(Clone)]
pub struct ProfileRepository {
    runner: Arc<dyn CommandRunner>,
    privilege: PrivilegeContext,
    powershell: PowerShell,
    rasdial: Rasdial,
    timeouts: Timeouts,
}

impl ProfileRepository {
    pub fn new(runner: Arc<dyn CommandRunner>, privilege: PrivilegeContext, config: &VpnctlConfig) -> Self {
        Self {
            runner,
            privilege,
            powershell: PowerShell::new(config.runner.powershell.clone()),
            rasdial: Rasdial::new(config.runner.rasdial.clone(), config.phonebook.resolve()),
            timeouts: Timeouts {
                query: config.runner.query_timeout(),
                command: config.runner.command_timeout(),
                dial: config.runner.dial_timeout(),
                wait_poll: config.dial.wait_poll_interval(),
                wait_max: config.dial.wait_max(),
            },
        }
    }

    pub fn privilege(&self) -> &PrivilegeContext {
        &self.privilege
    }

    async fn run(&self, line: &CommandLine, timeout: Duration) -> CommandOutcome {
        self.runner.run(&line.program, &line.args, timeout).await
    }

    /// List the user scope and, when requested, the system scope
    ///
    /// One query per scope, run concurrently. Results are tagged with the
    /// scope they came from and concatenated, never merged by name.
    pub async fn list_profiles(&self, include_all_users: bool) -> ProfileListing {
        let scopes: Vec<Scope> = Scope::ALL
            .iter()
            .copied()
            .filter(|scope| include_all_users || !scope.is_all_users())
            .collect();

        let results = join_all(scopes.iter().map(|scope| self.query_scope(*scope))).await;

        let mut listing = ProfileListing::default();
        for (scope, result) in scopes.into_iter().zip(results) {
            match result {
                Ok(profiles) => listing.profiles.extend(profiles),
                Err(failure) => {
                    warn!("Listing {} profiles failed: {}", scope, failure.message);
                    listing.failures.push((scope, failure));
                }
            }
        }
        sort_profiles(&mut listing.profiles);

        debug!(
            "Listed {} profiles ({} scope failures)",
            listing.profiles.len(),
            listing.failures.len()
        );
        listing
    }

    async fn query_scope(&self, scope: Scope) -> Result<Vec<VpnProfile>, OperationResult> {
        let outcome = self.run(&self.powershell.list_profiles(scope), self.timeouts.query).await;
        let what = format!("Listing {} profiles", scope.label());

        match &outcome {
            CommandOutcome::Completed(output) if output.success() => parse_profiles(&output.stdout, scope)
                .map_err(|e| {
                    OperationResult::failure(ErrorKind::Unknown, format!("{} returned unreadable output.", what), e.to_string())
                }),
            _ => Err(query_failure(&outcome, &what)),
        }
    }

    /// Look up the current definition of `(name, scope)`
    ///
    /// Only the requested scope is queried; a same-named profile in the other
    /// scope never satisfies the lookup.
    pub async fn find_profile(&self, name: &str, scope: Scope) -> Result<VpnProfile, OperationResult> {
        let key = checked_key(name, scope)?;
        self.query_scope(scope)
            .await?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(&key.name))
            .ok_or_else(|| not_found(&key))
    }

    /// Create a profile in `scope`
    ///
    /// Existence is not pre-checked; a duplicate is reported by the OS and
    /// classified as `AlreadyExists`. Success means the command was accepted,
    /// callers re-list to confirm.
    pub async fn create_profile(&self, spec: &ProfileSpec, scope: Scope) -> OperationResult {
        let spec = trimmed(spec);
        if let Err(e) = validate_profile_spec(&spec) {
            return local_failure(e);
        }
        let key = ProfileKey::new(spec.name.clone(), scope);
        if let Some(rejected) = self.privilege.require_for(scope, "create").await {
            return rejected;
        }

        info!("Creating VPN profile {}", key);
        let outcome = self.run(&self.powershell.create_profile(&spec, scope), self.timeouts.command).await;
        normalize_operation(outcome, &format!("Created VPN profile {}.", key))
    }

    /// Update the mutable fields of `(name, scope)`
    ///
    /// `spec.name` is ignored: identity never changes through an update.
    pub async fn update_profile(&self, name: &str, scope: Scope, spec: &ProfileSpec) -> OperationResult {
        let key = ProfileKey::new(name.trim(), scope);
        let mut spec = trimmed(spec);
        spec.name = key.name.clone();
        if let Err(e) = validate_profile_spec(&spec) {
            return local_failure(e);
        }
        if let Some(rejected) = self.privilege.require_for(scope, "update").await {
            return rejected;
        }

        info!("Updating VPN profile {}", key);
        let outcome = self.run(&self.powershell.update_profile(&key, &spec), self.timeouts.command).await;
        normalize_operation(outcome, &format!("Updated VPN profile {}.", key))
    }

    pub async fn delete_profile(&self, name: &str, scope: Scope) -> OperationResult {
        let key = match checked_key(name, scope) {
            Ok(key) => key,
            Err(rejected) => return rejected,
        };
        if let Some(rejected) = self.privilege.require_for(scope, "delete").await {
            return rejected;
        }

        info!("Deleting VPN profile {}", key);
        let outcome = self.run(&self.powershell.delete_profile(&key), self.timeouts.command).await;
        normalize_operation(outcome, &format!("Deleted VPN profile {}.", key))
    }

    /// Dial `(name, scope)` with the credentials saved for the entry
    pub async fn connect(&self, name: &str, scope: Scope) -> OperationResult {
        let key = match checked_key(name, scope) {
            Ok(key) => key,
            Err(rejected) => return rejected,
        };
        let line = match self.rasdial.connect(&key) {
            Some(line) => line,
            None => return unknown_phonebook(&key),
        };

        info!("Connecting {}", key);
        let outcome = self.run(&line, self.timeouts.dial).await;
        dial_result(outcome, &format!("Connected {}.", key))
    }

    /// Hang up `(name, scope)` and report the status observed afterwards
    pub async fn disconnect(&self, name: &str, scope: Scope) -> OperationResult {
        let key = match checked_key(name, scope) {
            Ok(key) => key,
            Err(rejected) => return rejected,
        };
        let line = match self.rasdial.disconnect(&key) {
            Some(line) => line,
            None => return unknown_phonebook(&key),
        };

        info!("Disconnecting {}", key);
        let outcome = self.run(&line, self.timeouts.dial).await;
        let result = normalize_operation(outcome, &format!("Disconnected {}.", key));
        if !result.success {
            return result;
        }

        let status = self.status_of(&key).await;
        result.with_status(status)
    }

    /// Dial, then poll the status until the profile reports `Connected`
    pub async fn connect_and_wait(&self, name: &str, scope: Scope) -> OperationResult {
        let dialed = self.connect(name, scope).await;
        if !dialed.success {
            return dialed;
        }

        let key = ProfileKey::new(name.trim(), scope);
        let deadline = Instant::now() + self.timeouts.wait_max;
        let mut status = self.status_of(&key).await;

        while !status.is_connected() {
            if Instant::now() >= deadline {
                let message = add_credential_hint(
                    &format!(
                        "Timed out after {}s waiting for {} to connect.",
                        self.timeouts.wait_max.as_secs(),
                        key
                    ),
                    &dialed.details,
                );
                return OperationResult::failure(ErrorKind::Timeout, message, dialed.details).with_status(status);
            }
            tokio::time::sleep(self.timeouts.wait_poll).await;
            status = self.status_of(&key).await;
        }

        OperationResult::ok(format!("Connected {}.", key), dialed.details).with_status(status)
    }

    /// Current status of `(name, scope)`
    ///
    /// Any failure, including a profile that vanished mid-transition, yields
    /// `Unknown` rather than an error.
    pub async fn get_status(&self, name: &str, scope: Scope) -> ConnectionStatus {
        match checked_key(name, scope) {
            Ok(key) => self.status_of(&key).await,
            Err(_) => ConnectionStatus::Unknown,
        }
    }

    async fn status_of(&self, key: &ProfileKey) -> ConnectionStatus {
        let outcome = self.run(&self.powershell.profile_status(key), self.timeouts.query).await;
        match outcome {
            CommandOutcome::Completed(output) if output.success() => {
                parse_status(&output.stdout).unwrap_or_else(|e| {
                    debug!("Unreadable status for {}: {}", key, e);
                    ConnectionStatus::Unknown
                })
            }
            _ => {
                debug!("Status query for {} did not complete", key);
                ConnectionStatus::Unknown
            }
        }
    }
}

impl std::fmt::Debug for ProfileRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRepository")
            .field("privilege", &self.privilege)
            .field("phonebooks", self.rasdial.phonebooks())
            .finish()
    }
}

fn trimmed(spec: &ProfileSpec) -> ProfileSpec {
    ProfileSpec::new(spec.name.trim(), spec.server_address.trim(), spec.tunnel_type.clone())
}

fn checked_key(name: &str, scope: Scope) -> Result<ProfileKey, OperationResult> {
    validate_profile_name(name).map_err(local_failure)?;
    Ok(ProfileKey::new(name.trim(), scope))
}

fn local_failure(error: VpnctlError) -> OperationResult {
    let message = match error {
        VpnctlError::InvalidParameter(message) => message,
        other => other.to_string(),
    };
    OperationResult::failure(ErrorKind::LocalValidation, message, String::new())
}

/// A dial that times out is usually waiting on credentials that were never saved
fn dial_result(outcome: CommandOutcome, success_message: &str) -> OperationResult {
    let mut result = normalize_operation(outcome, success_message);
    if result.is_kind(ErrorKind::Timeout) {
        result.message = add_credential_hint(&result.message, &result.details);
    }
    result
}

fn unknown_phonebook(key: &ProfileKey) -> OperationResult {
    warn!("No phonebook location for the {} scope", key.scope.label());
    OperationResult::failure(
        ErrorKind::LocalValidation,
        format!(
            "Cannot dial {}: the {} phonebook location is unknown.",
            key,
            key.scope.label()
        ),
        String::new(),
    )
}
