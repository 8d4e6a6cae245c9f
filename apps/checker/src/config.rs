use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs};

use chainprobe::{Credentials, ProbeConfig, Severity, SeverityPolicy, token::DEFAULT_PREFIX};
use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

/// Checks that a Matrix message sent by one account reaches another
#[derive(Debug, Parser)]
#[command(
    name = "check_matrix_chain",
    version,
    about,
    long_about = None,
    after_help = "Every option can also be set through its CHAIN_CHECK_* environment variable \
                  or a --config TOML file. The command line wins."
)]
pub struct Cli {
    /// Sending Matrix homeserver
    #[arg(long, env = "CHAIN_CHECK_SENDING_HOMESERVER")]
    pub sending_homeserver: Option<String>,

    /// Sending Matrix username
    #[arg(long, env = "CHAIN_CHECK_SENDING_USERNAME")]
    pub sending_username: Option<String>,

    /// Sending Matrix password
    #[arg(long, env = "CHAIN_CHECK_SENDING_PASSWORD", hide_env_values = true)]
    pub sending_password: Option<String>,

    /// Receiving Matrix homeserver
    #[arg(long, env = "CHAIN_CHECK_RECEIVING_HOMESERVER")]
    pub receiving_homeserver: Option<String>,

    /// Receiving Matrix username
    #[arg(long, env = "CHAIN_CHECK_RECEIVING_USERNAME")]
    pub receiving_username: Option<String>,

    /// Receiving Matrix password
    #[arg(long, env = "CHAIN_CHECK_RECEIVING_PASSWORD", hide_env_values = true)]
    pub receiving_password: Option<String>,

    /// ID of the Matrix room
    #[arg(long, env = "CHAIN_CHECK_ROOM_ID")]
    pub room_id: Option<String>,

    /// Seconds to wait for the message before failing [default: 10]
    #[arg(long, env = "CHAIN_CHECK_TIMEOUT", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Text put in front of the probe token [default: chainTestText]
    #[arg(long, env = "CHAIN_CHECK_MESSAGE_PREFIX")]
    pub message_prefix: Option<String>,

    /// Severity when the message does not arrive in time [default: critical]
    #[arg(long)]
    pub timeout_severity: Option<Severity>,

    /// Severity for login and send failures [default: unknown]
    #[arg(long)]
    pub failure_severity: Option<Severity>,

    /// Severity for mark-read and sync failures while waiting [default: unknown]
    #[arg(long)]
    pub runtime_failure_severity: Option<Severity>,

    /// TOML file with any of the options above
    #[arg(long, short = 'c', env = "CHAIN_CHECK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Optional file layer below the command line
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub sending: AccountSection,
    pub receiving: AccountSection,
    pub room_id: Option<String>,
    pub timeout: Option<u64>,
    pub message_prefix: Option<String>,
    pub severity: SeveritySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountSection {
    pub homeserver: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeveritySection {
    pub timeout: Option<Severity>,
    pub setup_failure: Option<Severity>,
    pub runtime_failure: Option<Severity>,
}

impl FileConfig {
    /// Read and parse a config file
    ///
    /// ```toml
    /// room_id = "!abc:example.org"
    /// timeout = 15
    ///
    /// [sending]
    /// homeserver = "matrix.example.org"
    /// username = "probe-a"
    /// password = "..."
    /// ```
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}

/// Merge command line and config file into a probe configuration.
///
/// Fails without touching the network when anything required is missing.
pub fn resolve(cli: Cli) -> Result<ProbeConfig, ConfigError> {
    let file = match &cli.config {
        Some(path) => FileConfig::from_path(path)?,
        None => FileConfig::default(),
    };

    let mut missing = Vec::new();
    let mut required = |flag: &'static str, from_cli: Option<String>, from_file: Option<String>| {
        match from_cli.or(from_file).filter(|value| !value.trim().is_empty()) {
            Some(value) => value,
            None => {
                missing.push(flag);
                String::new()
            }
        }
    };

    let sender = Credentials::new(
        required("--sending-homeserver", cli.sending_homeserver, file.sending.homeserver),
        required("--sending-username", cli.sending_username, file.sending.username),
        required("--sending-password", cli.sending_password, file.sending.password),
    );
    let receiver = Credentials::new(
        required("--receiving-homeserver", cli.receiving_homeserver, file.receiving.homeserver),
        required("--receiving-username", cli.receiving_username, file.receiving.username),
        required("--receiving-password", cli.receiving_password, file.receiving.password),
    );
    let room_id = required("--room-id", cli.room_id, file.room_id);

    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let timeout = cli.timeout.or(file.timeout).unwrap_or(chainprobe::DEFAULT_TIMEOUT_SECONDS);
    if timeout == 0 {
        return Err(ConfigError::InvalidTimeout);
    }

    let defaults = SeverityPolicy::default();
    let policy = SeverityPolicy {
        setup_failure: cli
            .failure_severity
            .or(file.severity.setup_failure)
            .unwrap_or(defaults.setup_failure),
        timeout: cli.timeout_severity.or(file.severity.timeout).unwrap_or(defaults.timeout),
        runtime_failure: cli
            .runtime_failure_severity
            .or(file.severity.runtime_failure)
            .unwrap_or(defaults.runtime_failure),
    };

    Ok(ProbeConfig {
        sender,
        receiver,
        room_id,
        timeout: Duration::from_secs(timeout),
        message_prefix: cli
            .message_prefix
            .or(file.message_prefix)
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        policy,
    })
}

/// Printable view of the effective configuration, passwords masked
pub struct Summary<'a>(pub &'a ProbeConfig);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let config = self.0;

        writeln!(f, "Effective Probe Configuration:")?;
        for (title, account) in [("Sending", &config.sender), ("Receiving", &config.receiver)] {
            write_title_1(f, title)?;
            write_1(f, "Homeserver", &account.homeserver)?;
            write_1(f, "Username", &account.username)?;
            write_1(f, "Password", &"********")?;
        }
        write_title_1(f, "Probe")?;
        write_1(f, "Room", &config.room_id)?;
        write_1(f, "Timeout", &format!("{:?}", config.timeout))?;
        write_1(f, "Message Prefix", &config.message_prefix)?;
        write_title_1(f, "Severities")?;
        write_1(f, "Setup Failure", &config.policy.setup_failure)?;
        write_1(f, "Timeout", &config.policy.timeout)?;
        write_1(f, "Runtime Failure", &config.policy.runtime_failure)?;

        Ok(())
    }
}
