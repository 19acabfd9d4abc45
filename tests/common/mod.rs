//! In-memory stand-in for the OS VPN stores
//!
//! Interprets the PowerShell scripts and rasdial command lines produced by
//! the crate against two independent phonebooks, answering the way the real
//! tools do (`ConvertTo-Json` shapes, cmdlet error text, RAS exit codes).

#![allow(dead_code)]

use async_trait::async_trait;
use libvpnctl::{
    CommandOutcome, CommandOutput, CommandRunner, ConnectionStatus, PrivilegeContext, ProfileRepository, Scope,
    VpnctlConfig,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER_PHONEBOOK: &str = "C:/Users/tester/AppData/Roaming/Microsoft/Network/Connections/Pbk/rasphone.pbk";
pub const SYSTEM_PHONEBOOK: &str = "C:/ProgramData/Microsoft/Network/Connections/Pbk/rasphone.pbk";

const PREAMBLE: &str = "$ErrorActionPreference='Stop'; ";

#[derive(Debug, Clone)]
pub struct Entry {
    pub server: String,
    pub tunnel: String,
    pub status: ConnectionStatus,
}

#[derive(Debug, Default)]
struct Stores {
    user: BTreeMap<String, Entry>,
    system: BTreeMap<String, Entry>,
}

impl Stores {
    fn scope(&mut self, scope: Scope) -> &mut BTreeMap<String, Entry> {
        match scope {
            Scope::User => &mut self.user,
            Scope::AllUsers => &mut self.system,
        }
    }
}

/// A recorded runner invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Default)]
pub struct FakeOs {
    stores: Mutex<Stores>,
    invocations: Mutex<Vec<Invocation>>,
    elevated: bool,
}

impl FakeOs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn elevated() -> Arc<Self> {
        Arc::new(Self {
            elevated: true,
            ..Self::default()
        })
    }

    pub fn insert(&self, name: &str, scope: Scope, server: &str) {
        self.stores.lock().unwrap().scope(scope).insert(
            name.to_string(),
            Entry {
                server: server.to_string(),
                tunnel: "Automatic".to_string(),
                status: ConnectionStatus::Disconnected,
            },
        );
    }

    pub fn set_status(&self, name: &str, scope: Scope, status: ConnectionStatus) {
        if let Some(entry) = self.stores.lock().unwrap().scope(scope).get_mut(name) {
            entry.status = status;
        }
    }

    pub fn entry(&self, name: &str, scope: Scope) -> Option<Entry> {
        self.stores.lock().unwrap().scope(scope).get(name).cloned()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn clear_invocations(&self) {
        self.invocations.lock().unwrap().clear();
    }

    fn powershell(&self, script: &str) -> CommandOutput {
        let script = script.strip_prefix(PREAMBLE).unwrap_or(script);
        let scope = Scope::from_all_users(script.contains(" -AllUserConnection"));
        let name = quoted_after(script, "-Name");
        let mut stores = self.stores.lock().unwrap();
        let store = stores.scope(scope);

        if script.contains("IsInRole") {
            return ok(if self.elevated { "True\r\n" } else { "False\r\n" });
        }

        if script.starts_with("Get-VpnConnection") {
            return match name {
                Some(name) => match store.get(&name) {
                    Some(entry) => ok(&render(vec![json!({ "ConnectionStatus": entry.status.to_string() })])),
                    None => not_found("Get-VpnConnection", &name),
                },
                None => ok(&render(
                    store
                        .iter()
                        .map(|(name, entry)| {
                            json!({
                                "Name": name,
                                "ServerAddress": entry.server,
                                "TunnelType": entry.tunnel,
                                "AuthenticationMethod": ["MsChapv2"],
                                "ConnectionStatus": entry.status.to_string(),
                            })
                        })
                        .collect(),
                )),
            };
        }

        let name = match name {
            Some(name) => name,
            None => return failed("A parameter cannot be found that matches parameter name.", 1),
        };
        let server = quoted_after(script, "-ServerAddress").unwrap_or_default();
        let tunnel = quoted_after(script, "-TunnelType").unwrap_or_else(|| "Automatic".to_string());

        if script.starts_with("Add-VpnConnection") {
            if store.contains_key(&name) {
                return failed(
                    &format!(
                        "Add-VpnConnection : A VPN connection with the name '{}' already exists. : The object already exists.",
                        name
                    ),
                    1,
                );
            }
            store.insert(
                name,
                Entry {
                    server,
                    tunnel,
                    status: ConnectionStatus::Disconnected,
                },
            );
            ok("")
        } else if script.starts_with("Set-VpnConnection") {
            match store.get_mut(&name) {
                Some(entry) => {
                    entry.server = server;
                    entry.tunnel = tunnel;
                    ok("")
                }
                None => not_found("Set-VpnConnection", &name),
            }
        } else if script.starts_with("Remove-VpnConnection") {
            match store.remove(&name) {
                Some(_) => ok(""),
                None => not_found("Remove-VpnConnection", &name),
            }
        } else {
            failed("The term is not recognized as the name of a cmdlet.", 1)
        }
    }

    fn rasdial(&self, args: &[String]) -> CommandOutput {
        let name = args.first().cloned().unwrap_or_default();
        let scope = match args.get(1).and_then(|a| a.strip_prefix("/PHONEBOOK:")) {
            Some(USER_PHONEBOOK) => Scope::User,
            Some(SYSTEM_PHONEBOOK) => Scope::AllUsers,
            _ => return failed("Remote Access error 623 - The system could not find the phone book entry for this connection.", 623),
        };
        let disconnect = args.iter().any(|a| a == "/DISCONNECT");

        let mut stores = self.stores.lock().unwrap();
        match stores.scope(scope).get_mut(&name) {
            Some(entry) => {
                entry.status = if disconnect {
                    ConnectionStatus::Disconnected
                } else {
                    ConnectionStatus::Connected
                };
                ok("Command completed successfully.")
            }
            None => failed(
                "Remote Access error 623 - The system could not find the phone book entry for this connection.",
                623,
            ),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeOs {
    async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> CommandOutcome {
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let output = match program {
            "powershell.exe" => self.powershell(args.last().map(String::as_str).unwrap_or_default()),
            "rasdial.exe" => self.rasdial(args),
            other => return CommandOutcome::SpawnFailed(format!("Failed to start {}: not found", other)),
        };
        CommandOutcome::Completed(output)
    }
}

/// Read a single-quoted PowerShell literal following `flag`
fn quoted_after(script: &str, flag: &str) -> Option<String> {
    let marker = format!("{} '", flag);
    let start = script.find(&marker)? + marker.len();
    let mut value = String::new();
    let mut chars = script[start..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                value.push('\'');
            } else {
                return Some(value);
            }
        } else {
            value.push(c);
        }
    }
    None
}

/// Mimic `ConvertTo-Json`: nothing, a bare object, or an array
fn render(mut items: Vec<Value>) -> String {
    match items.len() {
        0 => String::new(),
        1 => serde_json::to_string_pretty(&items.remove(0)).unwrap(),
        _ => serde_json::to_string_pretty(&Value::Array(items)).unwrap(),
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

fn failed(stderr: &str, code: i32) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
    }
}

fn not_found(cmdlet: &str, name: &str) -> CommandOutput {
    failed(
        &format!(
            "{} : VPN connection {} was not found. : The system could not find the phone book entry for this connection.",
            cmdlet, name
        ),
        1,
    )
}

pub fn test_config() -> VpnctlConfig {
    let mut config = VpnctlConfig::default();
    config.phonebook.user = Some(PathBuf::from(USER_PHONEBOOK));
    config.phonebook.all_users = Some(PathBuf::from(SYSTEM_PHONEBOOK));
    config.dial.wait_poll_interval_ms = 10;
    config.dial.wait_max_secs = 1;
    config
}

pub fn repository(os: &Arc<FakeOs>, privilege: PrivilegeContext) -> ProfileRepository {
    ProfileRepository::new(os.clone(), privilege, &test_config())
}
