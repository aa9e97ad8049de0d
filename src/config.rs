//! Service configuration read from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{RedeployError, Result};

pub const DEFAULT_PROJECTS_DIR: &str = "./projects";
pub const DEFAULT_HOST_PROJECTS_ROOT: &str = "/srv/projects";
pub const DEFAULT_SIGNAL_DIR: &str = "/signal-to-host";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
/// Default request body cap (5MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// How an inbound request is mapped to a project directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// `Host` header against `DOMAIN_NAME` / `DOMAIN_ALIASES`, served on `POST /webhook`
    Host,
    /// Path segment against the last segment of `WEBHOOK_URL`, served on `POST /webhook/{id}`
    PathToken,
    /// Path segment against the project directory name, served on `POST /webhook/{id}`
    ProjectName,
}

impl FromStr for MatchStrategy {
    type Err = RedeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(MatchStrategy::Host),
            "path-token" | "path_token" => Ok(MatchStrategy::PathToken),
            "project-name" | "project_name" => Ok(MatchStrategy::ProjectName),
            other => Err(RedeployError::ConfigError(format!(
                "Unknown PROJECT_MATCHING '{}': expected host, path-token or project-name",
                other
            ))),
        }
    }
}

/// What to do with a push whose `ref` is missing or not `refs/heads/<branch>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    /// Answer 400
    Reject,
    /// Answer 200 with `status=ignored`
    Ignore,
}

impl FromStr for RefPolicy {
    type Err = RedeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(RefPolicy::Reject),
            "ignore" => Ok(RefPolicy::Ignore),
            other => Err(RedeployError::ConfigError(format!(
                "Unknown UNPARSEABLE_REF_POLICY '{}': expected reject or ignore",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Container-local root scanned for `<name>/.env`
    pub projects_dir: PathBuf,
    /// Host-side equivalent of `projects_dir`, used for the default `REPO_LOCATION`
    pub host_projects_root: PathBuf,
    pub signal_dir: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub match_strategy: MatchStrategy,
    pub ref_policy: RefPolicy,
    pub max_body_bytes: usize,
    pub log_dir: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset and empty variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                RedeployError::ConfigError(format!("Invalid PORT '{}': {}", raw, e))
            })?,
            None => DEFAULT_PORT,
        };

        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                RedeployError::ConfigError(format!("Invalid MAX_BODY_BYTES '{}': {}", raw, e))
            })?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let match_strategy = match get("PROJECT_MATCHING") {
            Some(raw) => raw.parse()?,
            None => MatchStrategy::Host,
        };

        let ref_policy = match get("UNPARSEABLE_REF_POLICY") {
            Some(raw) => raw.parse()?,
            None => RefPolicy::Reject,
        };

        Ok(Self {
            projects_dir: get("WEBHOOK_PROJECTS_DIR")
                .unwrap_or_else(|| DEFAULT_PROJECTS_DIR.to_string())
                .into(),
            host_projects_root: get("HOST_PROJECTS_ROOT")
                .unwrap_or_else(|| DEFAULT_HOST_PROJECTS_ROOT.to_string())
                .into(),
            signal_dir: get("SIGNAL_TO_HOST_DIR")
                .unwrap_or_else(|| DEFAULT_SIGNAL_DIR.to_string())
                .into(),
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port,
            match_strategy,
            ref_policy,
            max_body_bytes,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        addr.parse().map_err(|e| {
            RedeployError::ConfigError(format!("Invalid listen address '{}': {}", addr, e))
        })
    }
}
