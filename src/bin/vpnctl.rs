//! VPN Profile Control CLI (vpnctl)
//!
//! Command-line front end for the profile management core. Lists, creates,
//! updates, deletes and dials native Windows VPN profiles in either the
//! per-user or the all-users store.
//!
//! # Usage
//!
//! ```bash
//! # List per-user and system-wide profiles
//! vpnctl list --all-users
//!
//! # Create a system-wide profile (requires an elevated prompt)
//! vpnctl create Office --server vpn.example.com --tunnel Ikev2 --all-users
//!
//! # Dial and wait until connected
//! vpnctl connect Office --all-users --wait
//!
//! # Print status changes until Ctrl+C
//! vpnctl watch --all-users
//! ```

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use libvpnctl::{
    filter_profiles, CommandRunner, OperationResult, PollEvent, PollingCoordinator, PowerShell,
    PrivilegeContext, ProfileChange, ProfileRepository, ProfileSpec, Scope, SystemElevationProbe,
    SystemRunner, VpnProfile, VpnctlConfig,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// VPN Profile Control
#[derive(Parser, Debug)]
#[command(name = "vpnctl")]
#[command(author = "vpnctl contributors")]
#[command(version)]
#[command(about = "Manage native Windows VPN profiles for the current user and all users", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging and show failure details
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List VPN profiles
    List {
        /// Include system-wide profiles
        #[arg(short, long)]
        all_users: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Only show profiles whose name or server contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show the connection status of one profile
    Status {
        name: String,
        #[arg(short, long)]
        all_users: bool,
    },
    /// Create a VPN profile
    Create {
        name: String,
        /// Server host name or address
        #[arg(short, long)]
        server: String,
        /// Tunnel type (Automatic, Pptp, L2tp, Sstp, Ikev2)
        #[arg(short, long, default_value = "Automatic")]
        tunnel: String,
        #[arg(short, long)]
        all_users: bool,
    },
    /// Change the server or tunnel type of a profile
    Update {
        name: String,
        #[arg(short, long)]
        server: String,
        /// Tunnel type; the profile keeps its current one when omitted
        #[arg(short, long)]
        tunnel: Option<String>,
        #[arg(short, long)]
        all_users: bool,
    },
    /// Remove a VPN profile
    Delete {
        name: String,
        #[arg(short, long)]
        all_users: bool,
    },
    /// Dial a VPN profile with its saved credentials
    Connect {
        name: String,
        #[arg(short, long)]
        all_users: bool,
        /// Wait until the connection is established
        #[arg(short, long)]
        wait: bool,
    },
    /// Hang up a VPN profile
    Disconnect {
        name: String,
        #[arg(short, long)]
        all_users: bool,
    },
    /// Print profile changes until interrupted
    Watch {
        #[arg(short, long)]
        all_users: bool,
        /// Seconds between refreshes (overrides the configuration)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Report whether this process is elevated
    Elevation,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli);

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        "debug"
    } else {
        &cli.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vpnctl={},libvpnctl={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = VpnctlConfig::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!("Using configuration: {:?}", config);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let probe = SystemElevationProbe::new(
        runner.clone(),
        PowerShell::new(config.runner.powershell.clone()),
        config.runner.query_timeout(),
    );
    let privilege = PrivilegeContext::new(Arc::new(probe));
    let repository = ProfileRepository::new(runner, privilege.clone(), &config);

    let code = match cli.command {
        Commands::List {
            all_users,
            json,
            filter,
        } => {
            let listing = repository.list_profiles(all_users).await;
            for (scope, failure) in &listing.failures {
                eprintln!("Warning: {} profiles unavailable: {}", scope.label(), failure.display_message());
                print_details(failure, cli.verbose);
            }

            let shown: Vec<&VpnProfile> = match &filter {
                Some(query) => filter_profiles(&listing.profiles, query),
                None => listing.profiles.iter().collect(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                print_profiles(&shown);
            }

            let requested = if all_users { Scope::ALL.len() } else { 1 };
            if listing.failures.len() == requested {
                1
            } else {
                0
            }
        }
        Commands::Status { name, all_users } => {
            let status = repository.get_status(&name, Scope::from_all_users(all_users)).await;
            println!("{}", status);
            0
        }
        Commands::Create {
            name,
            server,
            tunnel,
            all_users,
        } => {
            let spec = ProfileSpec::new(name, server, tunnel.parse().unwrap_or_default());
            report(repository.create_profile(&spec, Scope::from_all_users(all_users)).await, cli.verbose)
        }
        Commands::Update {
            name,
            server,
            tunnel,
            all_users,
        } => {
            let scope = Scope::from_all_users(all_users);
            let tunnel = match tunnel {
                Some(tunnel) => Ok(tunnel.parse().unwrap_or_default()),
                None => repository.find_profile(&name, scope).await.map(|p| p.tunnel_type),
            };
            match tunnel {
                Ok(tunnel) => {
                    let spec = ProfileSpec::new(name.clone(), server, tunnel);
                    report(repository.update_profile(&name, scope, &spec).await, cli.verbose)
                }
                Err(failure) => report(failure, cli.verbose),
            }
        }
        Commands::Delete { name, all_users } => report(
            repository.delete_profile(&name, Scope::from_all_users(all_users)).await,
            cli.verbose,
        ),
        Commands::Connect {
            name,
            all_users,
            wait,
        } => {
            let scope = Scope::from_all_users(all_users);
            let result = if wait {
                repository.connect_and_wait(&name, scope).await
            } else {
                repository.connect(&name, scope).await
            };
            report(result, cli.verbose)
        }
        Commands::Disconnect { name, all_users } => report(
            repository.disconnect(&name, Scope::from_all_users(all_users)).await,
            cli.verbose,
        ),
        Commands::Watch { all_users, interval } => {
            let interval = match interval {
                Some(secs) => Duration::from_secs(secs),
                None => config.polling.interval(),
            };
            watch(repository, interval, all_users || config.polling.include_all_users).await?;
            0
        }
        Commands::Elevation => {
            if privilege.refresh().await {
                println!("elevated");
            } else {
                println!("not elevated");
            }
            0
        }
    };

    Ok(code)
}

/// Print an operation result, returning the exit code
fn report(result: OperationResult, verbose: bool) -> i32 {
    if result.success {
        match result.status {
            Some(status) => println!("{} Status: {}", result.message, status),
            None => println!("{}", result.message),
        }
        0
    } else {
        eprintln!("Error: {}", result.display_message());
        print_details(&result, verbose);
        1
    }
}

fn print_details(result: &OperationResult, verbose: bool) {
    if verbose && !result.details.is_empty() {
        eprintln!("Details:\n{}", result.details);
    }
}

fn print_profiles(profiles: &[&VpnProfile]) {
    if profiles.is_empty() {
        println!("No VPN profiles found.");
        return;
    }

    let name_width = profiles.iter().map(|p| p.name.len()).max().unwrap_or(0).max(4);
    let server_width = profiles
        .iter()
        .map(|p| p.server_address.len())
        .max()
        .unwrap_or(0)
        .max(6);

    println!(
        "{:<name_width$}  {:<6}  {:<server_width$}  {:<9}  {:<14}  STATUS",
        "NAME",
        "SCOPE",
        "SERVER",
        "TUNNEL",
        "AUTH",
        name_width = name_width,
        server_width = server_width
    );
    for p in profiles {
        println!(
            "{:<name_width$}  {:<6}  {:<server_width$}  {:<9}  {:<14}  {}",
            p.name,
            p.scope.label(),
            p.server_address,
            p.tunnel_type.as_str(),
            p.authentication_method,
            p.connection_status,
            name_width = name_width,
            server_width = server_width
        );
    }
}

/// Run the polling coordinator until Ctrl+C
async fn watch(repository: ProfileRepository, interval: Duration, include_all_users: bool) -> anyhow::Result<()> {
    let (handle, mut events) = PollingCoordinator::new(repository, interval).start(include_all_users)?;
    println!("Watching VPN profiles every {}s. Press Ctrl+C to exit.", interval.as_secs());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, stopping");
                break;
            }
        }
    }

    handle.stop().await?;
    Ok(())
}

fn print_event(event: &PollEvent) {
    match event {
        PollEvent::Changed { at, changes, .. } => {
            let time = at.with_timezone(&Local).format("%H:%M:%S");
            for change in changes {
                match change {
                    ProfileChange::Added(p) => {
                        println!("[{}] + {}: {}", time, p.key(), p.connection_status)
                    }
                    ProfileChange::Removed(p) => println!("[{}] - {}", time, p.key()),
                    ProfileChange::Updated { before, after } => {
                        println!("[{}] ~ {}: {}", time, after.key(), describe_update(before, after))
                    }
                }
            }
        }
        PollEvent::ScopeFailed { scope, failure, .. } => {
            eprintln!("Warning: {} profiles unavailable: {}", scope.label(), failure.display_message());
        }
    }
}

fn describe_update(before: &VpnProfile, after: &VpnProfile) -> String {
    let mut parts = Vec::new();
    if before.connection_status != after.connection_status {
        parts.push(format!("{} -> {}", before.connection_status, after.connection_status));
    }
    if before.server_address != after.server_address {
        parts.push(format!("server {} -> {}", before.server_address, after.server_address));
    }
    if before.tunnel_type != after.tunnel_type {
        parts.push(format!("tunnel {} -> {}", before.tunnel_type, after.tunnel_type));
    }
    if before.authentication_method != after.authentication_method {
        parts.push(format!("authentication {}", after.authentication_method));
    }
    parts.join(", ")
}
