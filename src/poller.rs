//! Polling coordinator
//!
//! Periodically re-lists the profile stores on a background task, diffs the
//! result against the previous snapshot by `(name, scope)` and sends only the
//! changed entries to the consumer over a channel. The loop is stopped
//! cooperatively through a watch channel and never outlives its handle.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{VpnctlError, VpnctlResult};
use crate::model::{ProfileKey, Scope, VpnProfile};
use crate::normalizer::OperationResult;
use crate::repository::{ProfileListing, ProfileRepository};

/// Buffered poll events before the loop waits for the consumer
const EVENT_BUFFER: usize = 32;

/// Profiles of one refresh keyed by identity
pub type Snapshot = BTreeMap<ProfileKey, VpnProfile>;

pub fn snapshot(profiles: &[VpnProfile]) -> Snapshot {
    profiles.iter().map(|p| (p.key(), p.clone())).collect()
}

/// One entry that differs between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChange {
    Added(VpnProfile),
    Removed(VpnProfile),
    Updated { before: VpnProfile, after: VpnProfile },
}

impl ProfileChange {
    pub fn key(&self) -> ProfileKey {
        match self {
            ProfileChange::Added(p) | ProfileChange::Removed(p) => p.key(),
            ProfileChange::Updated { after, .. } => after.key(),
        }
    }
}

/// Entries of `next` that differ from `previous`, in key order
pub fn diff_snapshots(previous: &Snapshot, next: &Snapshot) -> Vec<ProfileChange> {
    let mut changes = Vec::new();

    for (key, after) in next {
        match previous.get(key) {
            None => changes.push(ProfileChange::Added(after.clone())),
            Some(before) if before != after => changes.push(ProfileChange::Updated {
                before: before.clone(),
                after: after.clone(),
            }),
            Some(_) => {}
        }
    }

    for (key, before) in previous {
        if !next.contains_key(key) {
            changes.push(ProfileChange::Removed(before.clone()));
        }
    }

    changes.sort_by(|a, b| a.key().cmp(&b.key()));
    changes
}

/// Monotonic sequence shared by every producer of listings
///
/// Polling ticks and user-triggered refreshes draw from the same sequence so
/// a consumer can tell which result is the newest.
#[derive(Debug, Clone, Default)]
pub struct RefreshSequence(Arc<AtomicU64>);

impl RefreshSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, starting at 1
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consumer-side filter that applies only the most recent result
#[derive(Debug, Clone, Default)]
pub struct SnapshotGate {
    last_applied: Option<u64>,
}

impl SnapshotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is newer than everything applied so far
    pub fn accept(&mut self, seq: u64) -> bool {
        match self.last_applied {
            Some(last) if seq <= last => {
                debug!("Discarding stale result {} (last applied {})", seq, last);
                false
            }
            _ => {
                self.last_applied = Some(seq);
                true
            }
        }
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }
}

/// Notification sent by the polling loop
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// Some profiles differ from the previous tick
    Changed {
        seq: u64,
        at: DateTime<Utc>,
        changes: Vec<ProfileChange>,
    },
    /// A scope that answered before stopped answering
    ScopeFailed {
        seq: u64,
        scope: Scope,
        failure: OperationResult,
    },
}

impl PollEvent {
    pub fn seq(&self) -> u64 {
        match self {
            PollEvent::Changed { seq, .. } | PollEvent::ScopeFailed { seq, .. } => *seq,
        }
    }
}

/// Diff state carried from one tick to the next
#[derive(Debug, Default)]
struct PollState {
    snapshot: Snapshot,
    failing: BTreeSet<Scope>,
}

impl PollState {
    /// Fold a listing into the state, returning the events it produces
    ///
    /// Entries of a scope whose query failed are carried over unchanged, so a
    /// transient failure does not show up as every profile being removed.
    fn apply(&mut self, seq: u64, listing: ProfileListing) -> Vec<PollEvent> {
        let mut events = Vec::new();
        let mut next = snapshot(&listing.profiles);

        let failed: BTreeSet<Scope> = listing.failures.iter().map(|(scope, _)| *scope).collect();
        for (key, profile) in &self.snapshot {
            if failed.contains(&key.scope) {
                next.insert(key.clone(), profile.clone());
            }
        }

        for (scope, failure) in listing.failures {
            if !self.failing.contains(&scope) {
                events.push(PollEvent::ScopeFailed { seq, scope, failure });
            }
        }
        self.failing = failed;

        let changes = diff_snapshots(&self.snapshot, &next);
        self.snapshot = next;
        if !changes.is_empty() {
            events.push(PollEvent::Changed {
                seq,
                at: Utc::now(),
                changes,
            });
        }
        events
    }
}

/// Periodic refresh of the profile table
pub struct PollingCoordinator {
    repository: ProfileRepository,
    interval: Duration,
    sequence: RefreshSequence,
}

impl PollingCoordinator {
    pub fn new(repository: ProfileRepository, interval: Duration) -> Self {
        Self {
            repository,
            interval,
            sequence: RefreshSequence::new(),
        }
    }

    /// Share a sequence with other refresh producers
    pub fn with_sequence(mut self, sequence: RefreshSequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> &RefreshSequence {
        &self.sequence
    }

    /// Spawn the polling loop
    ///
    /// The first tick runs immediately and reports every existing profile as
    /// added. Must be called from within a tokio runtime.
    pub fn start(self, include_all_users: bool) -> VpnctlResult<(PollerHandle, mpsc::Receiver<PollEvent>)> {
        if self.interval.is_zero() {
            return Err(VpnctlError::InvalidParameter(
                "Polling interval must be greater than zero".to_string(),
            ));
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (visibility_tx, visibility_rx) = watch::channel(include_all_users);

        info!("Starting profile polling every {:?}", self.interval);
        let task = tokio::spawn(self.run(event_tx, shutdown_rx, visibility_rx));

        Ok((
            PollerHandle {
                shutdown: shutdown_tx,
                visibility: visibility_tx,
                task: Some(task),
            },
            event_rx,
        ))
    }

    async fn run(
        self,
        events: mpsc::Sender<PollEvent>,
        mut shutdown: watch::Receiver<bool>,
        visibility: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = PollState::default();

        'poll: loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let include_all_users = *visibility.borrow();
            let seq = self.sequence.next();
            let listing = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                listing = self.repository.list_profiles(include_all_users) => listing,
            };

            // A consumer that stops reading must not keep the loop from stopping
            for event in state.apply(seq, listing) {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break 'poll,
                    sent = events.send(event) => {
                        if sent.is_err() {
                            debug!("Poll event receiver dropped, stopping");
                            return;
                        }
                    }
                }
            }
        }

        info!("Profile polling stopped");
    }
}

/// Owner of a running polling loop
///
/// Dropping the handle signals the loop to stop.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    visibility: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Toggle system-wide profiles from the next tick on
    pub fn set_include_all_users(&self, include: bool) {
        self.visibility.send_replace(include);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for it to finish
    pub async fn stop(mut self) -> VpnctlResult<()> {
        self.shutdown.send_replace(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| VpnctlError::ServiceError(format!("Polling task failed: {}", e))),
            None => Ok(()),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionStatus, TunnelType};
    use crate::normalizer::ErrorKind;

    fn profile(name: &str, scope: Scope, status: ConnectionStatus) -> VpnProfile {
        VpnProfile {
            name: name.to_string(),
            scope,
            server_address: "vpn.example.com".to_string(),
            tunnel_type: TunnelType::Automatic,
            authentication_method: "Unknown".to_string(),
            connection_status: status,
        }
    }

    #[test]
    fn test_status_change_is_single_update() {
        let before = snapshot(&[
            profile("A", Scope::User, ConnectionStatus::Disconnected),
            profile("B", Scope::User, ConnectionStatus::Disconnected),
        ]);
        let after = snapshot(&[
            profile("A", Scope::User, ConnectionStatus::Connected),
            profile("B", Scope::User, ConnectionStatus::Disconnected),
        ]);

        let changes = diff_snapshots(&before, &after);
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            ProfileChange::Updated { before, after } => {
                assert_eq!(before.connection_status, ConnectionStatus::Disconnected);
                assert_eq!(after.connection_status, ConnectionStatus::Connected);
                assert_eq!(after.name, "A");
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn test_same_name_in_both_scopes_diffs_independently() {
        let before = snapshot(&[
            profile("X", Scope::User, ConnectionStatus::Disconnected),
            profile("X", Scope::AllUsers, ConnectionStatus::Disconnected),
        ]);
        let after = snapshot(&[profile("X", Scope::AllUsers, ConnectionStatus::Disconnected)]);

        let changes = diff_snapshots(&before, &after);
        assert_eq!(
            changes,
            vec![ProfileChange::Removed(profile("X", Scope::User, ConnectionStatus::Disconnected))]
        );
    }

    #[test]
    fn test_unchanged_snapshot_has_no_changes() {
        let snap = snapshot(&[profile("A", Scope::User, ConnectionStatus::Connected)]);
        assert!(diff_snapshots(&snap, &snap.clone()).is_empty());
    }

    #[test]
    fn test_failed_scope_is_carried_over() {
        let mut state = PollState::default();
        let first = ProfileListing {
            profiles: vec![
                profile("Home", Scope::User, ConnectionStatus::Disconnected),
                profile("Corp", Scope::AllUsers, ConnectionStatus::Connected),
            ],
            failures: Vec::new(),
        };
        assert_eq!(state.apply(1, first).len(), 1);

        let failure = OperationResult::failure(ErrorKind::Timeout, "Listing System profiles timed out after 10s.", "");
        let second = ProfileListing {
            profiles: vec![profile("Home", Scope::User, ConnectionStatus::Disconnected)],
            failures: vec![(Scope::AllUsers, failure.clone())],
        };
        let events = state.apply(2, second.clone());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PollEvent::ScopeFailed { scope: Scope::AllUsers, .. }));

        // Still failing: no repeated notification, no removal
        assert!(state.apply(3, second).is_empty());
        assert!(state.snapshot.contains_key(&ProfileKey::new("Corp", Scope::AllUsers)));
    }

    #[test]
    fn test_gate_accepts_only_newer() {
        let sequence = RefreshSequence::new();
        let older = sequence.next();
        let newer = sequence.next();

        let mut gate = SnapshotGate::new();
        assert!(gate.accept(newer));
        assert!(!gate.accept(older));
        assert!(!gate.accept(newer));
        assert_eq!(gate.last_applied(), Some(newer));
        assert_eq!(sequence.current(), 2);
    }
}
