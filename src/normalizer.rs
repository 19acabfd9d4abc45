//! Result normalizer
//!
//! Turns raw runner outcomes into typed values: `ConvertTo-Json` output into
//! [`VpnProfile`] records, and mutating command outcomes into a uniform
//! [`OperationResult`] with an [`ErrorKind`] taxonomy tag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{VpnctlError, VpnctlResult};
use crate::model::{ConnectionStatus, ProfileKey, Scope, TunnelType, VpnProfile};
use crate::redaction;
use crate::runner::{CommandOutcome, CommandOutput};
use crate::validation::{sanitize_error_message, truncate_with_marker, MAX_DETAILS_LEN};

/// Default for fields some OS versions omit
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Appended to failures that look credential related
pub const CREDENTIAL_HINT: &str = "Please connect once via Windows VPN settings and save credentials.";

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input, rejected before any command ran
    LocalValidation,
    /// System-wide operation attempted without elevation
    InsufficientPrivilege,
    AlreadyExists,
    NotFound,
    Timeout,
    /// Credentials rejected or missing at dial time
    AuthenticationFailure,
    /// Unrecognized OS error; sanitized details are preserved
    Unknown,
}

impl ErrorKind {
    /// Short actionable hint for the user
    pub fn hint(self) -> &'static str {
        match self {
            ErrorKind::LocalValidation => "Check the profile fields and try again.",
            ErrorKind::InsufficientPrivilege => "Run as Administrator.",
            ErrorKind::AlreadyExists => "Choose a different name or edit the existing profile.",
            ErrorKind::NotFound => "Refresh the profile list.",
            ErrorKind::Timeout => "The command did not finish in time. Try again.",
            ErrorKind::AuthenticationFailure => CREDENTIAL_HINT,
            ErrorKind::Unknown => "See details for the full error output.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::LocalValidation => "LocalValidation",
            ErrorKind::InsufficientPrivilege => "InsufficientPrivilege",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::AuthenticationFailure => "AuthenticationFailure",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Uniform result of a mutating or dial operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// Short user-facing message
    pub message: String,
    /// Scrubbed stdout+stderr, available on demand
    pub details: String,
    pub error_kind: Option<ErrorKind>,
    /// Connection status after the operation, when known
    pub status: Option<ConnectionStatus>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: clean_details(&details.into()),
            error_kind: None,
            status: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: false,
            message: sanitize_error_message(&redaction::scrub(&message.into())),
            details: clean_details(&details.into()),
            error_kind: Some(kind),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.error_kind == Some(kind)
    }

    /// Message followed by the kind's hint, for primary display
    pub fn display_message(&self) -> String {
        match self.error_kind {
            Some(kind) if !self.message.contains(kind.hint()) => format!("{} {}", self.message, kind.hint()),
            _ => self.message.clone(),
        }
    }
}

fn clean_details(details: &str) -> String {
    truncate_with_marker(redaction::scrub(details.trim()).trim(), MAX_DETAILS_LEN)
}

/// A single property read from loosely typed command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Present with a usable textual value
    Present(String),
    /// Missing, null, or empty
    Absent,
    /// Present but of an unexpected shape; kept as raw JSON text
    Raw(String),
}

impl FieldValue {
    /// Read `key` from a JSON object without assuming its type
    pub fn read(entry: &Map<String, Value>, key: &str) -> Self {
        match entry.get(key) {
            None | Some(Value::Null) => FieldValue::Absent,
            Some(Value::String(s)) if s.trim().is_empty() => FieldValue::Absent,
            Some(Value::String(s)) => FieldValue::Present(s.trim().to_string()),
            Some(Value::Number(n)) => FieldValue::Present(n.to_string()),
            Some(Value::Bool(b)) => FieldValue::Present(b.to_string()),
            Some(Value::Array(items)) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                if parts.is_empty() {
                    if items.is_empty() {
                        FieldValue::Absent
                    } else {
                        FieldValue::Raw(Value::Array(items.clone()).to_string())
                    }
                } else {
                    FieldValue::Present(parts.join(", "))
                }
            }
            Some(other) => FieldValue::Raw(other.to_string()),
        }
    }

    /// Textual value, falling back to `default` only when absent
    pub fn or(self, default: &str) -> String {
        match self {
            FieldValue::Present(value) | FieldValue::Raw(value) => value,
            FieldValue::Absent => default.to_string(),
        }
    }
}

/// Split `ConvertTo-Json` output into its objects
///
/// PowerShell emits nothing for an empty pipeline, a bare object for a single
/// result, and an array otherwise.
pub fn json_entries(stdout: &str) -> VpnctlResult<Vec<Map<String, Value>>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Value = serde_json::from_str(trimmed)
        .map_err(|e| VpnctlError::Parse(format!("Failed to parse PowerShell output: {}", e)))?;

    match parsed {
        Value::Null => Ok(Vec::new()),
        Value::Object(entry) => Ok(vec![entry]),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(entry) => Some(entry),
                other => {
                    warn!("Skipping non-object entry in PowerShell output: {}", other);
                    None
                }
            })
            .collect()),
        other => Err(VpnctlError::Parse(format!(
            "Unexpected PowerShell output shape: {}",
            other
        ))),
    }
}

/// Convert one list query's output into profiles tagged with `scope`
pub fn parse_profiles(stdout: &str, scope: Scope) -> VpnctlResult<Vec<VpnProfile>> {
    let mut profiles = Vec::new();

    for entry in json_entries(stdout)? {
        let name = match FieldValue::read(&entry, "Name") {
            FieldValue::Present(name) => name,
            other => {
                // Without a name there is no identity to address the profile by
                warn!("Skipping {} profile without a usable name: {:?}", scope, other);
                continue;
            }
        };

        let tunnel_type = match FieldValue::read(&entry, "TunnelType") {
            FieldValue::Present(raw) | FieldValue::Raw(raw) => raw.parse().unwrap_or_default(),
            FieldValue::Absent => TunnelType::Automatic,
        };

        let connection_status = match FieldValue::read(&entry, "ConnectionStatus") {
            FieldValue::Present(raw) => ConnectionStatus::parse(&raw),
            _ => ConnectionStatus::Unknown,
        };

        profiles.push(VpnProfile {
            name,
            scope,
            server_address: FieldValue::read(&entry, "ServerAddress").or(""),
            tunnel_type,
            authentication_method: FieldValue::read(&entry, "AuthenticationMethod").or(UNKNOWN_FIELD),
            connection_status,
        });
    }

    debug!("Parsed {} {} profiles", profiles.len(), scope);
    Ok(profiles)
}

/// Convert a single-profile status query into a status
pub fn parse_status(stdout: &str) -> VpnctlResult<ConnectionStatus> {
    let entries = json_entries(stdout)?;
    Ok(entries
        .first()
        .map(|entry| match FieldValue::read(entry, "ConnectionStatus") {
            FieldValue::Present(raw) => ConnectionStatus::parse(&raw),
            _ => ConnectionStatus::Unknown,
        })
        .unwrap_or(ConnectionStatus::Unknown))
}

/// Parse the `True`/`False` printed by the elevation query
pub fn parse_bool(stdout: &str) -> Option<bool> {
    match stdout.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Classify failure text into an error kind
///
/// Authentication patterns are checked before privilege patterns: rasdial's
/// credential errors also say "access was denied".
pub fn classify_failure(text: &str, exit_code: Option<i32>) -> ErrorKind {
    // rasdial exits with the RAS error code
    match exit_code {
        Some(691) | Some(703) | Some(718) | Some(812) | Some(919) => return ErrorKind::AuthenticationFailure,
        Some(623) => return ErrorKind::NotFound,
        _ => {}
    }

    let lower = text.to_lowercase();
    let any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if any(&[
        "error 691",
        "error 703",
        "error 812",
        "user name or password",
        "user name and/or password",
        "username or password",
        "credentials",
        "authentication failed",
    ]) {
        ErrorKind::AuthenticationFailure
    } else if any(&["already exists", "error_already_exists", "0x800700b7"]) {
        ErrorKind::AlreadyExists
    } else if any(&[
        "was not found",
        "cannot be found",
        "could not find the phone book entry",
        "error_not_found",
        "objectnotfound",
        "error 623",
    ]) {
        ErrorKind::NotFound
    } else if any(&[
        "access is denied",
        "error_access_denied",
        "0x80070005",
        "requires elevation",
        "administrator privileges",
    ]) {
        ErrorKind::InsufficientPrivilege
    } else if any(&["timed out", "timeout expired"]) {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}

/// Does stderr carry an error this module recognizes?
fn recognized_error(stderr: &str) -> Option<ErrorKind> {
    if stderr.trim().is_empty() {
        return None;
    }
    match classify_failure(stderr, None) {
        ErrorKind::Unknown => None,
        kind => Some(kind),
    }
}

/// Append the credential hint when the failure looks credential related
pub fn add_credential_hint(message: &str, details: &str) -> String {
    let text = message.trim();
    let combined = format!("{}\n{}", message, details).to_lowercase();
    let looks_like_credentials = ["credential", "password", "username", "user name", "timed out"]
        .iter()
        .any(|p| combined.contains(p));

    if looks_like_credentials && !text.contains(CREDENTIAL_HINT) {
        format!("{} {}", text, CREDENTIAL_HINT)
    } else {
        text.to_string()
    }
}

/// First meaningful line of failure output, used as the short message
fn first_line(output: &CommandOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("The command returned an error.")
        .to_string()
}

/// Normalize a mutating command outcome
///
/// Success requires exit code 0 and no recognized error on stderr.
pub fn normalize_operation(outcome: CommandOutcome, success_message: &str) -> OperationResult {
    match outcome {
        CommandOutcome::Completed(output) => {
            let details = output.combined();
            let recognized = recognized_error(&output.stderr);

            if output.success() && recognized.is_none() {
                return OperationResult::ok(success_message, details);
            }

            let kind = recognized.unwrap_or_else(|| classify_failure(&details, output.exit_code));
            let mut message = first_line(&output);
            if kind == ErrorKind::AuthenticationFailure || kind == ErrorKind::Timeout {
                message = add_credential_hint(&message, &details);
            }
            OperationResult::failure(kind, message, details)
        }
        CommandOutcome::TimedOut { after } => OperationResult::failure(
            ErrorKind::Timeout,
            format!("The command timed out after {}s.", after.as_secs_f32()),
            String::new(),
        ),
        CommandOutcome::SpawnFailed(reason) => {
            OperationResult::failure(ErrorKind::Unknown, "The command could not be started.", reason)
        }
    }
}

/// Failure result for a query that did not complete, naming the target
pub fn query_failure(outcome: &CommandOutcome, what: &str) -> OperationResult {
    match outcome {
        CommandOutcome::Completed(output) => {
            let details = output.combined();
            OperationResult::failure(
                classify_failure(&details, output.exit_code),
                format!("{} failed: {}", what, first_line(output)),
                details,
            )
        }
        CommandOutcome::TimedOut { after } => OperationResult::failure(
            ErrorKind::Timeout,
            format!("{} timed out after {}s.", what, after.as_secs_f32()),
            String::new(),
        ),
        CommandOutcome::SpawnFailed(reason) => OperationResult::failure(
            ErrorKind::Unknown,
            format!("{} could not be started.", what),
            reason.clone(),
        ),
    }
}

/// Failure for a key that is ambiguous or missing, worded with the scope
pub fn not_found(key: &ProfileKey) -> OperationResult {
    OperationResult::failure(
        ErrorKind::NotFound,
        format!("VPN profile '{}' was not found in the {} scope.", key.name, key.scope.label()),
        String::new(),
    )
}
