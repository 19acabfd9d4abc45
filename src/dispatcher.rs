//! Operation dispatcher
//!
//! Runs repository operations on the tokio runtime so the caller never waits
//! on an external process. At most `max_concurrent` operations run at once;
//! completions are delivered as [`DispatchEvent`]s over a channel. Operations
//! on the same profile are not serialized.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::model::{ConnectionStatus, ProfileSpec, Scope};
use crate::normalizer::{ErrorKind, OperationResult};
use crate::poller::RefreshSequence;
use crate::repository::{ProfileListing, ProfileRepository};

/// Work accepted by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List { include_all_users: bool },
    Create { spec: ProfileSpec, scope: Scope },
    Update { name: String, scope: Scope, spec: ProfileSpec },
    Delete { name: String, scope: Scope },
    Connect { name: String, scope: Scope, wait: bool },
    Disconnect { name: String, scope: Scope },
    Status { name: String, scope: Scope },
}

impl Request {
    fn action(&self) -> &'static str {
        match self {
            Request::List { .. } => "list",
            Request::Create { .. } => "create",
            Request::Update { .. } => "update",
            Request::Delete { .. } => "delete",
            Request::Connect { .. } => "connect",
            Request::Disconnect { .. } => "disconnect",
            Request::Status { .. } => "status",
        }
    }
}

/// Handle identifying a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Listing stamped with its refresh sequence number
    Listing { seq: u64, listing: ProfileListing },
    Operation(OperationResult),
    Status(ConnectionStatus),
}

#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub ticket: Ticket,
    pub request: Request,
    pub completion: Completion,
    pub finished_at: DateTime<Utc>,
}

/// Bounded executor for repository operations
pub struct OperationDispatcher {
    repository: ProfileRepository,
    permits: Arc<Semaphore>,
    sequence: RefreshSequence,
    events: mpsc::UnboundedSender<DispatchEvent>,
    next_ticket: AtomicU64,
}

impl OperationDispatcher {
    /// `sequence` should be the one the poller draws from, so listings from
    /// both sources are ordered against each other.
    pub fn new(
        repository: ProfileRepository,
        max_concurrent: usize,
        sequence: RefreshSequence,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            repository,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sequence,
            events,
            next_ticket: AtomicU64::new(1),
        };
        (dispatcher, receiver)
    }

    /// Queue `request` and return immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: Request) -> Ticket {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::SeqCst));
        // Listings are stamped at submission so a later request always wins
        let seq = match request {
            Request::List { .. } => Some(self.sequence.next()),
            _ => None,
        };

        let repository = self.repository.clone();
        let permits = self.permits.clone();
        let events = self.events.clone();
        debug!("Dispatching {} as {}", request.action(), ticket);

        tokio::spawn(async move {
            let completion = match permits.acquire_owned().await {
                Ok(_permit) => execute(&repository, &request, seq).await,
                Err(_) => {
                    warn!("Dispatcher closed before {} could run", ticket);
                    Completion::Operation(OperationResult::failure(
                        ErrorKind::Unknown,
                        "The operation was cancelled.",
                        String::new(),
                    ))
                }
            };

            let event = DispatchEvent {
                ticket,
                request,
                completion,
                finished_at: Utc::now(),
            };
            if events.send(event).is_err() {
                debug!("Dispatch receiver dropped before {} completed", ticket);
            }
        });

        ticket
    }

    /// Operations currently allowed to start without waiting
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

async fn execute(repository: &ProfileRepository, request: &Request, seq: Option<u64>) -> Completion {
    match request {
        Request::List { include_all_users } => Completion::Listing {
            seq: seq.unwrap_or_default(),
            listing: repository.list_profiles(*include_all_users).await,
        },
        Request::Create { spec, scope } => Completion::Operation(repository.create_profile(spec, *scope).await),
        Request::Update { name, scope, spec } => {
            Completion::Operation(repository.update_profile(name, *scope, spec).await)
        }
        Request::Delete { name, scope } => Completion::Operation(repository.delete_profile(name, *scope).await),
        Request::Connect { name, scope, wait: true } => {
            Completion::Operation(repository.connect_and_wait(name, *scope).await)
        }
        Request::Connect { name, scope, wait: false } => {
            Completion::Operation(repository.connect(name, *scope).await)
        }
        Request::Disconnect { name, scope } => Completion::Operation(repository.disconnect(name, *scope).await),
        Request::Status { name, scope } => Completion::Status(repository.get_status(name, *scope).await),
    }
}
