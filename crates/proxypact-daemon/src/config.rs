//! CLI argument parsing and config file support.
//!
//! The daemon can be configured via CLI flags, a JSON config file, or
//! a combination of both (CLI overrides config file).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CLI arguments (manual parsing, no clap dependency)
// ---------------------------------------------------------------------------

/// Parsed command-line arguments.
pub struct CliArgs {
    pub data_dir: Option<PathBuf>,
    pub user_id: Option<String>,
    pub resource: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub monitor_interval_secs: Option<u64>,
    pub config_path: Option<PathBuf>,
}

impl CliArgs {
    /// Parses CLI arguments from `std::env::args`.
    pub fn parse_from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut cli = Self {
            data_dir: None,
            user_id: None,
            resource: None,
            display_name: None,
            description: None,
            monitor_interval_secs: None,
            config_path: None,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    i += 1;
                    cli.data_dir = args.get(i).map(PathBuf::from);
                }
                "--user" => {
                    i += 1;
                    cli.user_id = args.get(i).cloned();
                }
                "--resource" => {
                    i += 1;
                    cli.resource = args.get(i).cloned();
                }
                "--name" => {
                    i += 1;
                    cli.display_name = args.get(i).cloned();
                }
                "--description" => {
                    i += 1;
                    cli.description = args.get(i).cloned();
                }
                "--monitor-interval" => {
                    i += 1;
                    cli.monitor_interval_secs = args.get(i).and_then(|s| s.parse().ok());
                }
                "--config" => {
                    i += 1;
                    cli.config_path = args.get(i).map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("unknown argument: {other}");
                    eprintln!("use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        cli
    }
}

// ---------------------------------------------------------------------------
// Config file (JSON)
// ---------------------------------------------------------------------------

/// JSON config file format.
///
/// Example `daemon.json`:
/// ```json
/// {
///   "data_dir": "/var/lib/proxypact",
///   "user_id": "alice@example.com",
///   "resource": "pact",
///   "display_name": "Alice",
///   "description": "home server",
///   "monitor_interval_secs": 60
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfigFile {
    pub data_dir: Option<String>,
    pub user_id: Option<String>,
    pub resource: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub monitor_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults applied)
// ---------------------------------------------------------------------------

/// Fully resolved daemon configuration with all defaults applied.
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    /// Our identity on the social network. Required — the daemon
    /// refuses to start without one.
    pub user_id: Option<String>,
    /// Resource suffix forming our client id: `<user_id>/<resource>`.
    pub resource: String,
    pub display_name: Option<String>,
    pub description: String,
    pub monitor_interval_secs: u64,
}

impl DaemonConfig {
    /// Builds config purely from CLI args with defaults.
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            data_dir: cli.data_dir.clone().unwrap_or_else(default_data_dir),
            user_id: cli.user_id.clone(),
            resource: cli.resource.clone().unwrap_or_else(|| "pact".into()),
            display_name: cli.display_name.clone(),
            description: cli
                .description
                .clone()
                .unwrap_or_else(default_description),
            monitor_interval_secs: cli.monitor_interval_secs.unwrap_or(60),
        }
    }

    /// Loads config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {e}"))?;

        let file: DaemonConfigFile = serde_json::from_str(&text)
            .map_err(|e| format!("invalid config JSON: {e}"))?;

        Ok(Self {
            data_dir: file
                .data_dir
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            user_id: file.user_id,
            resource: file.resource.unwrap_or_else(|| "pact".into()),
            display_name: file.display_name,
            description: file.description.unwrap_or_else(default_description),
            monitor_interval_secs: file.monitor_interval_secs.unwrap_or(60),
        })
    }

    /// Merges CLI overrides onto a config-file base.
    pub fn merge_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref dir) = cli.data_dir {
            self.data_dir = dir.clone();
        }
        if cli.user_id.is_some() {
            self.user_id = cli.user_id.clone();
        }
        if let Some(ref resource) = cli.resource {
            self.resource = resource.clone();
        }
        if cli.display_name.is_some() {
            self.display_name = cli.display_name.clone();
        }
        if let Some(ref description) = cli.description {
            self.description = description.clone();
        }
        if let Some(secs) = cli.monitor_interval_secs {
            self.monitor_interval_secs = secs;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Platform-specific default data directory.
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        if let Some(home) = dirs::home_dir() {
            return home.join(".proxypact");
        }
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("Proxypact");
    }
    PathBuf::from("proxypact-data")
}

/// Default device label when the operator set none.
fn default_description() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "proxypact device".into())
}

fn print_help() {
    println!(
        r#"proxypact-daemon - headless consent/presence core with a stdio transport

USAGE:
    proxypact-daemon --user <USER_ID> [OPTIONS]

OPTIONS:
    --user <USER_ID>          Our identity on the social network (required)
    --resource <NAME>         Client id suffix, forming <user>/<resource> (default: pact)
    --name <NAME>             Our display name sent in handshakes
    --description <TEXT>      Device label sent in handshakes (default: $HOSTNAME)
    --data-dir <PATH>         Data directory (default: platform-specific)
    --monitor-interval <SECS> Handshake recovery sweep interval (default: 60)
    --config <PATH>           Load settings from JSON config file
    -h, --help                Show this help

TRANSPORT:
    Inbound events are line-delimited JSON on stdin, one object per
    line, tagged with "event": "presence" | "profile" | "message".
    Outbound envelopes are written as JSON lines on stdout.

EXAMPLES:
    # Run against a local adapter piping a chat network in and out
    chat-adapter | proxypact-daemon --user alice@example.com | chat-adapter --send

    # Use config file
    proxypact-daemon --config /etc/proxypact/daemon.json

ENVIRONMENT:
    RUST_LOG                  Log level filter (default: info); logs go to stderr
"#
    );
}
