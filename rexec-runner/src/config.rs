//! Runner configuration
//!
//! Defines how the runner reaches the remote host, where job files live
//! there, which user the job runs as, and how often it polls the host and
//! forwards updates to the engine.

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::controller::ControllerSettings;
use crate::session::SshTarget;

/// How commands are run as the effective user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserMethod {
    /// Commands run as the ssh user
    #[default]
    Direct,
    Sudo {
        user: String,
    },
    Dzdo {
        user: String,
    },
}

impl UserMethod {
    /// Picks the method for running as `effective_user`
    ///
    /// No prefix is needed when the effective user is unset or is the ssh
    /// user itself.
    pub fn resolve(
        method: &str,
        effective_user: Option<String>,
        ssh_user: &str,
    ) -> anyhow::Result<Self> {
        let user = match effective_user {
            Some(user) if !user.is_empty() && user != ssh_user => user,
            _ => return Ok(UserMethod::Direct),
        };

        match method {
            "sudo" => Ok(UserMethod::Sudo { user }),
            "dzdo" => Ok(UserMethod::Dzdo { user }),
            other => anyhow::bail!("unknown effective user method: {}", other),
        }
    }

    pub fn effective_user(&self) -> Option<&str> {
        match self {
            UserMethod::Direct => None,
            UserMethod::Sudo { user } | UserMethod::Dzdo { user } => Some(user),
        }
    }

    /// Prefix prepended to commands that must run as the effective user
    pub fn cli_command_prefix(&self) -> String {
        match self {
            UserMethod::Direct => String::new(),
            UserMethod::Sudo { user } => format!("sudo -n -u {} ", crate::shell::quote(user)),
            UserMethod::Dzdo { user } => format!("dzdo -u {} ", crate::shell::quote(user)),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote host the job runs on
    pub remote_host: String,

    pub ssh_user: String,

    pub ssh_port: u16,

    /// Private key passed to ssh with `-i`
    pub ssh_identity_file: Option<PathBuf>,

    pub ssh_connect_timeout: Duration,

    /// Directory on the remote host holding per-job working directories
    pub remote_working_dir: String,

    /// Address the remote control script pushes updates to
    pub callback_host: String,

    /// Local address the callback ingress listens on
    pub callback_listen_addr: SocketAddr,

    /// Whether a job's working directory is removed once it finished
    pub cleanup_working_dirs: bool,

    pub user_method: UserMethod,

    /// How often to poll the remote host for job status
    pub refresh_interval: Duration,

    /// Engine base URL (e.g., "http://localhost:8080")
    pub engine_url: String,

    /// How often to forward buffered updates to the engine
    pub update_send_interval: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(remote_host: String, engine_url: String) -> Self {
        Self {
            remote_host,
            ssh_user: "root".to_string(),
            ssh_port: 22,
            ssh_identity_file: None,
            ssh_connect_timeout: Duration::from_secs(10),
            remote_working_dir: "/var/tmp".to_string(),
            callback_host: "http://localhost:8000".to_string(),
            callback_listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cleanup_working_dirs: true,
            user_method: UserMethod::Direct,
            refresh_interval: Duration::from_secs(60),
            engine_url,
            update_send_interval: Duration::from_secs(5),
        }
    }

    /// Loads configuration from environment variables, see [`Config::load`]
    ///
    /// Expected environment variables:
    /// - REMOTE_HOST (required)
    /// - SSH_USER (optional, default: root)
    /// - SSH_PORT (optional, default: 22)
    /// - SSH_IDENTITY_FILE (optional)
    /// - SSH_CONNECT_TIMEOUT (optional, seconds, default: 10)
    /// - REMOTE_WORKING_DIR (optional, default: /var/tmp)
    /// - CALLBACK_HOST (optional, default: http://localhost:8000)
    /// - CALLBACK_LISTEN_ADDR (optional, default: 0.0.0.0:8000)
    /// - CLEANUP_WORKING_DIRS (optional, default: true)
    /// - EFFECTIVE_USER (optional)
    /// - EFFECTIVE_USER_METHOD (optional, sudo or dzdo, default: sudo)
    /// - REFRESH_INTERVAL (optional, seconds, default: 60)
    /// - ENGINE_URL (optional, default: http://localhost:8080)
    /// - UPDATE_SEND_INTERVAL (optional, seconds, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from variables read through `lookup`
    ///
    /// A variable that is set but cannot be parsed is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let remote_host = lookup("REMOTE_HOST")
            .ok_or_else(|| anyhow::anyhow!("REMOTE_HOST environment variable not set"))?;

        let engine_url =
            lookup("ENGINE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());

        let mut config = Self::new(remote_host, engine_url);

        if let Some(user) = lookup("SSH_USER") {
            config.ssh_user = user;
        }

        if let Some(port) = parsed::<u16>(&lookup, "SSH_PORT")? {
            config.ssh_port = port;
        }

        config.ssh_identity_file = lookup("SSH_IDENTITY_FILE").map(PathBuf::from);

        if let Some(secs) = parsed::<u64>(&lookup, "SSH_CONNECT_TIMEOUT")? {
            config.ssh_connect_timeout = Duration::from_secs(secs);
        }

        if let Some(dir) = lookup("REMOTE_WORKING_DIR") {
            config.remote_working_dir = dir;
        }

        if let Some(host) = lookup("CALLBACK_HOST") {
            config.callback_host = host;
        }

        if let Some(addr) = parsed::<SocketAddr>(&lookup, "CALLBACK_LISTEN_ADDR")? {
            config.callback_listen_addr = addr;
        }

        if let Some(cleanup) = parsed::<bool>(&lookup, "CLEANUP_WORKING_DIRS")? {
            config.cleanup_working_dirs = cleanup;
        }

        let method = lookup("EFFECTIVE_USER_METHOD").unwrap_or_else(|| "sudo".to_string());
        config.user_method =
            UserMethod::resolve(&method, lookup("EFFECTIVE_USER"), &config.ssh_user)?;

        if let Some(secs) = parsed::<u64>(&lookup, "REFRESH_INTERVAL")? {
            config.refresh_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parsed::<u64>(&lookup, "UPDATE_SEND_INTERVAL")? {
            config.update_send_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Loads and validates the configuration
    ///
    /// Defaults are used only when REMOTE_HOST is unset; any other problem
    /// with the environment is returned.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = if lookup("REMOTE_HOST").is_none() {
            info!("REMOTE_HOST not set, using default configuration");
            Self::default()
        } else {
            Self::from_lookup(lookup).context("Invalid configuration in environment")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote_host.is_empty() {
            anyhow::bail!("remote_host cannot be empty");
        }

        if self.ssh_user.is_empty() {
            anyhow::bail!("ssh_user cannot be empty");
        }

        if self.remote_working_dir.is_empty() {
            anyhow::bail!("remote_working_dir cannot be empty");
        }

        if !self.engine_url.starts_with("http://") && !self.engine_url.starts_with("https://") {
            anyhow::bail!("engine_url must start with http:// or https://");
        }

        if self.refresh_interval.as_secs() == 0 {
            anyhow::bail!("refresh_interval must be greater than 0");
        }

        if self.update_send_interval.as_secs() == 0 {
            anyhow::bail!("update_send_interval must be greater than 0");
        }

        Ok(())
    }

    pub fn ssh_target(&self) -> SshTarget {
        SshTarget {
            host: self.remote_host.clone(),
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity_file: self.ssh_identity_file.clone(),
            connect_timeout: self.ssh_connect_timeout,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            remote_working_dir: self.remote_working_dir.clone(),
            cleanup_working_dirs: self.cleanup_working_dirs,
            user_method: self.user_method.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("localhost".to_string(), "http://localhost:8080".to_string())
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", name, value))
        })
        .transpose()
}
