//! OS command surface
//!
//! Builders for the PowerShell VPN cmdlets and the legacy `rasdial` utility.
//! Every builder takes the full `(name, scope)` identity, so a command can
//! never be issued against the wrong phonebook.

use std::env;
use std::path::{Path, PathBuf};

use crate::model::{ProfileKey, ProfileSpec, Scope};
use crate::validation::ps_quote;

/// Properties selected by list queries
const LIST_PROPERTIES: &str = "Name,ServerAddress,TunnelType,AuthenticationMethod,ConnectionStatus";

/// Phonebook path relative to the APPDATA / PROGRAMDATA directory
const PHONEBOOK_SUBPATH: [&str; 5] = ["Microsoft", "Network", "Connections", "Pbk", "rasphone.pbk"];

/// A fully assembled command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

/// PowerShell script builder
#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Wrap a script so the first error stops it with a non-zero exit
    pub fn command(&self, script: &str) -> CommandLine {
        CommandLine {
            program: self.program.clone(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-Command".to_string(),
                format!("$ErrorActionPreference='Stop'; {}", script),
            ],
        }
    }

    /// Same as [`PowerShell::command`], converting the pipeline result to JSON
    pub fn json_query(&self, script: &str) -> CommandLine {
        self.command(&format!("{} | ConvertTo-Json -Depth 4", script))
    }

    /// All profiles of one scope
    pub fn list_profiles(&self, scope: Scope) -> CommandLine {
        self.json_query(&format!(
            "Get-VpnConnection{} | Select-Object {}",
            scope_flag(scope),
            LIST_PROPERTIES
        ))
    }

    /// Connection status of a single profile
    pub fn profile_status(&self, key: &ProfileKey) -> CommandLine {
        self.json_query(&format!(
            "Get-VpnConnection -Name {}{} | Select-Object ConnectionStatus",
            ps_quote(&key.name),
            scope_flag(key.scope)
        ))
    }

    pub fn create_profile(&self, spec: &ProfileSpec, scope: Scope) -> CommandLine {
        self.command(&format!(
            "Add-VpnConnection -Name {} -ServerAddress {} -TunnelType {}{}",
            ps_quote(&spec.name),
            ps_quote(spec.server_address.trim()),
            ps_quote(spec.tunnel_type.as_str()),
            scope_flag(scope)
        ))
    }

    /// Update the mutable fields of an existing profile. Identity is taken
    /// from `key`, never from `spec`.
    pub fn update_profile(&self, key: &ProfileKey, spec: &ProfileSpec) -> CommandLine {
        self.command(&format!(
            "Set-VpnConnection -Name {} -ServerAddress {} -TunnelType {} -Force{}",
            ps_quote(&key.name),
            ps_quote(spec.server_address.trim()),
            ps_quote(spec.tunnel_type.as_str()),
            scope_flag(key.scope)
        ))
    }

    pub fn delete_profile(&self, key: &ProfileKey) -> CommandLine {
        self.command(&format!(
            "Remove-VpnConnection -Name {} -Force{}",
            ps_quote(&key.name),
            scope_flag(key.scope)
        ))
    }

    /// Is the current principal in the Administrators role?
    pub fn elevation_query(&self) -> CommandLine {
        self.command(
            "([Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent())\
             .IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)",
        )
    }
}

fn scope_flag(scope: Scope) -> &'static str {
    match scope {
        Scope::User => "",
        Scope::AllUsers => " -AllUserConnection",
    }
}

/// Phonebook files backing the two scopes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phonebooks {
    pub user: Option<PathBuf>,
    pub all_users: Option<PathBuf>,
}

impl Phonebooks {
    /// Resolve the default locations from `APPDATA` and `PROGRAMDATA`
    pub fn from_env() -> Self {
        Self {
            user: env::var_os("APPDATA").map(|dir| phonebook_in(Path::new(&dir))),
            all_users: env::var_os("PROGRAMDATA").map(|dir| phonebook_in(Path::new(&dir))),
        }
    }

    /// Explicit paths win over the environment
    pub fn with_overrides(mut self, user: Option<PathBuf>, all_users: Option<PathBuf>) -> Self {
        if user.is_some() {
            self.user = user;
        }
        if all_users.is_some() {
            self.all_users = all_users;
        }
        self
    }

    pub fn for_scope(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::User => self.user.as_deref(),
            Scope::AllUsers => self.all_users.as_deref(),
        }
    }
}

fn phonebook_in(base: &Path) -> PathBuf {
    PHONEBOOK_SUBPATH.iter().fold(base.to_path_buf(), |path, part| path.join(part))
}

/// `rasdial` command builder
#[derive(Debug, Clone)]
pub struct Rasdial {
    program: String,
    phonebooks: Phonebooks,
}

impl Rasdial {
    pub fn new(program: impl Into<String>, phonebooks: Phonebooks) -> Self {
        Self {
            program: program.into(),
            phonebooks,
        }
    }

    pub fn phonebooks(&self) -> &Phonebooks {
        &self.phonebooks
    }

    /// Dial using the credentials saved with the entry.
    /// `None` when the scope's phonebook location is unknown.
    pub fn connect(&self, key: &ProfileKey) -> Option<CommandLine> {
        self.dial(key, false)
    }

    pub fn disconnect(&self, key: &ProfileKey) -> Option<CommandLine> {
        self.dial(key, true)
    }

    fn dial(&self, key: &ProfileKey, disconnect: bool) -> Option<CommandLine> {
        let phonebook = self.phonebooks.for_scope(key.scope)?;
        let mut args = vec![key.name.clone(), format!("/PHONEBOOK:{}", phonebook.display())];
        if disconnect {
            args.push("/DISCONNECT".to_string());
        }
        Some(CommandLine {
            program: self.program.clone(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TunnelType;

    fn script(line: &CommandLine) -> &str {
        line.args.last().map(String::as_str).unwrap_or_default()
    }

    #[test]
    fn test_list_queries_per_scope() {
        let ps = PowerShell::new("powershell.exe");

        let user = ps.list_profiles(Scope::User);
        assert_eq!(user.program, "powershell.exe");
        assert_eq!(&user.args[..5], &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"]);
        assert_eq!(
            script(&user),
            "$ErrorActionPreference='Stop'; Get-VpnConnection | Select-Object \
             Name,ServerAddress,TunnelType,AuthenticationMethod,ConnectionStatus | ConvertTo-Json -Depth 4"
        );

        let system = ps.list_profiles(Scope::AllUsers);
        assert!(script(&system).contains("Get-VpnConnection -AllUserConnection | Select-Object"));
    }

    #[test]
    fn test_create_update_delete_scripts() {
        let ps = PowerShell::new("powershell.exe");
        let spec = ProfileSpec::new("Bob's VPN", " vpn.example.com ", TunnelType::Sstp);

        let create = ps.create_profile(&spec, Scope::AllUsers);
        assert!(script(&create).ends_with(
            "Add-VpnConnection -Name 'Bob''s VPN' -ServerAddress 'vpn.example.com' -TunnelType 'Sstp' -AllUserConnection"
        ));

        let key = ProfileKey::new("Office", Scope::User);
        let update = ps.update_profile(&key, &spec);
        assert!(script(&update).ends_with(
            "Set-VpnConnection -Name 'Office' -ServerAddress 'vpn.example.com' -TunnelType 'Sstp' -Force"
        ));

        let delete = ps.delete_profile(&ProfileKey::new("Office", Scope::AllUsers));
        assert!(script(&delete).ends_with("Remove-VpnConnection -Name 'Office' -Force -AllUserConnection"));
    }

    #[test]
    fn test_status_query_names_scope() {
        let ps = PowerShell::new("powershell.exe");
        let line = ps.profile_status(&ProfileKey::new("VPN-A", Scope::AllUsers));
        assert!(script(&line).contains("Get-VpnConnection -Name 'VPN-A' -AllUserConnection | Select-Object ConnectionStatus"));
    }

    #[test]
    fn test_rasdial_uses_scope_phonebook() {
        let phonebooks = Phonebooks {
            user: Some(PathBuf::from("C:/Users/me/pbk/rasphone.pbk")),
            all_users: Some(PathBuf::from("C:/ProgramData/pbk/rasphone.pbk")),
        };
        let rasdial = Rasdial::new("rasdial.exe", phonebooks);

        let user = rasdial.connect(&ProfileKey::new("VPN-A", Scope::User)).unwrap();
        assert_eq!(user.args, vec!["VPN-A", "/PHONEBOOK:C:/Users/me/pbk/rasphone.pbk"]);

        let system = rasdial.disconnect(&ProfileKey::new("VPN-A", Scope::AllUsers)).unwrap();
        assert_eq!(
            system.args,
            vec!["VPN-A", "/PHONEBOOK:C:/ProgramData/pbk/rasphone.pbk", "/DISCONNECT"]
        );
    }

    #[test]
    fn test_rasdial_without_phonebook_refuses() {
        let rasdial = Rasdial::new("rasdial.exe", Phonebooks::default());
        assert!(rasdial.connect(&ProfileKey::new("VPN-A", Scope::User)).is_none());
    }

    #[test]
    fn test_phonebook_overrides() {
        let books = Phonebooks::default().with_overrides(Some(PathBuf::from("u.pbk")), None);
        assert_eq!(books.for_scope(Scope::User), Some(Path::new("u.pbk")));
        assert_eq!(books.for_scope(Scope::AllUsers), None);
    }
}
