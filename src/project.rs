//! Project discovery and request-to-project resolution
//!
//! Every project lives in its own directory under the projects root and is
//! described by a `.env` file in that directory. The directory tree is
//! re-scanned on every call to [`ProjectRegistry::resolve`]; nothing is cached.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::MatchStrategy;
use crate::error::{RedeployError, Result};

/// Name of the per-project configuration file
pub const PROJECT_ENV_FILE: &str = ".env";

const DEFAULT_TARGET_BRANCH: &str = "main";

/// Raw key/value contents of one project's `.env` file.
#[derive(Debug, Clone)]
pub struct ProjectEntry {
    pub name: String,
    pub values: HashMap<String, String>,
}

impl ProjectEntry {
    pub fn new(name: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Returns the trimmed value for `key`, treating empty values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Lower-cased `DOMAIN_NAME`
    pub fn domain_name(&self) -> Option<String> {
        self.get("DOMAIN_NAME").map(str::to_lowercase)
    }

    /// `DOMAIN_ALIASES` split on commas and whitespace, lower-cased.
    pub fn domain_aliases(&self) -> BTreeSet<String> {
        self.get("DOMAIN_ALIASES")
            .map(|aliases| {
                aliases
                    .replace(',', " ")
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Last non-empty `/` separated segment of `WEBHOOK_URL`.
    pub fn webhook_path_token(&self) -> Option<String> {
        self.get("WEBHOOK_URL")
            .and_then(|url| url.split('/').filter(|s| !s.is_empty()).next_back())
            .map(str::to_string)
    }
}

/// Typed settings of a configured project
#[derive(Clone)]
pub struct Project {
    pub name: String,
    pub domain_name: Option<String>,
    pub domain_aliases: BTreeSet<String>,
    pub webhook_path_token: Option<String>,
    pub payload_secret: String,
    pub repo_location: String,
    pub target_branch: String,
    pub restart_required_default: bool,
    pub restart_trigger_token: Option<String>,
    pub ci_pipeline_location: Option<String>,
    pub custom_redeploy_script_location: Option<String>,
}

impl Project {
    /// Builds a project from its `.env` contents.
    ///
    /// Fails with [`RedeployError::MissingSecret`] when `PAYLOAD_SIGNATURE` is
    /// absent. When neither `REPO_LOCATION` nor `CUSTOM_REPO_LOCATION` is set
    /// the repository is assumed at `<host_projects_root>/<name>`.
    pub fn from_entry(entry: &ProjectEntry, host_projects_root: &Path) -> Result<Self> {
        let payload_secret = entry
            .get("PAYLOAD_SIGNATURE")
            .ok_or_else(|| RedeployError::MissingSecret {
                project: entry.name.clone(),
            })?
            .to_string();

        let repo_location = entry
            .get("REPO_LOCATION")
            .or_else(|| entry.get("CUSTOM_REPO_LOCATION"))
            .map(str::to_string)
            .unwrap_or_else(|| {
                host_projects_root
                    .join(&entry.name)
                    .to_string_lossy()
                    .into_owned()
            });

        Ok(Self {
            name: entry.name.clone(),
            domain_name: entry.domain_name(),
            domain_aliases: entry.domain_aliases(),
            webhook_path_token: entry.webhook_path_token(),
            payload_secret,
            repo_location,
            target_branch: entry
                .get("TARGET_BRANCH")
                .unwrap_or(DEFAULT_TARGET_BRANCH)
                .to_string(),
            restart_required_default: entry
                .get("DOCKER_COMPOSE_RESTART_REQUIRED")
                .map(parse_flag)
                .unwrap_or(false),
            restart_trigger_token: entry
                .get("COMMIT_DOCKER_COMPOSE_RESTART_TRIGGER")
                .map(str::to_string),
            ci_pipeline_location: entry.get("CI_PIPELINE_LOCATION").map(str::to_string),
            custom_redeploy_script_location: entry
                .get("CUSTOM_REDEPLOY_SCRIPT_LOCATION")
                .map(str::to_string),
        })
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("domain_name", &self.domain_name)
            .field("domain_aliases", &self.domain_aliases)
            .field("webhook_path_token", &self.webhook_path_token)
            .field("payload_secret", &"<redacted>")
            .field("repo_location", &self.repo_location)
            .field("target_branch", &self.target_branch)
            .field("restart_required_default", &self.restart_required_default)
            .field("restart_trigger_token", &self.restart_trigger_token)
            .field("ci_pipeline_location", &self.ci_pipeline_location)
            .field(
                "custom_redeploy_script_location",
                &self.custom_redeploy_script_location,
            )
            .finish()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1"
    )
}

/// Strategy deciding whether a project answers to a request identifier.
pub trait ProjectMatcher: Send + Sync {
    /// Canonical form of the raw request identifier.
    fn normalize(&self, identifier: &str) -> Result<String>;

    /// Whether `entry` answers to an already normalized identifier.
    fn matches(&self, entry: &ProjectEntry, identifier: &str) -> bool;

    /// Error returned when no project matches.
    fn not_found(&self, identifier: &str) -> RedeployError;
}

/// Matches the `Host` header against `DOMAIN_NAME` and `DOMAIN_ALIASES`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMatcher;

impl ProjectMatcher for HostMatcher {
    fn normalize(&self, identifier: &str) -> Result<String> {
        let host = strip_port(identifier.trim()).to_lowercase();
        if host.is_empty() {
            return Err(RedeployError::MissingHost);
        }
        Ok(host)
    }

    fn matches(&self, entry: &ProjectEntry, host: &str) -> bool {
        // projects without a DOMAIN_NAME are never routed by host
        let Some(domain) = entry.domain_name() else {
            return false;
        };
        domain == host || entry.domain_aliases().contains(host)
    }

    fn not_found(&self, identifier: &str) -> RedeployError {
        RedeployError::UnroutedDomain {
            host: identifier.to_string(),
        }
    }
}

/// Drops a trailing `:port`. Bracketed IPv6 literals keep their brackets.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Matches a URL path segment against the last segment of `WEBHOOK_URL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathTokenMatcher;

impl ProjectMatcher for PathTokenMatcher {
    fn normalize(&self, identifier: &str) -> Result<String> {
        Ok(identifier.trim().to_string())
    }

    fn matches(&self, entry: &ProjectEntry, token: &str) -> bool {
        !token.is_empty() && entry.webhook_path_token().as_deref() == Some(token)
    }

    fn not_found(&self, identifier: &str) -> RedeployError {
        RedeployError::UnknownProject {
            identifier: identifier.to_string(),
        }
    }
}

/// Matches a URL path segment against the project directory name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectNameMatcher;

impl ProjectMatcher for ProjectNameMatcher {
    fn normalize(&self, identifier: &str) -> Result<String> {
        Ok(identifier.trim().to_string())
    }

    fn matches(&self, entry: &ProjectEntry, name: &str) -> bool {
        !name.is_empty() && entry.name == name
    }

    fn not_found(&self, identifier: &str) -> RedeployError {
        RedeployError::UnknownProject {
            identifier: identifier.to_string(),
        }
    }
}

pub fn matcher_for(strategy: MatchStrategy) -> Box<dyn ProjectMatcher> {
    match strategy {
        MatchStrategy::Host => Box::new(HostMatcher),
        MatchStrategy::PathToken => Box::new(PathTokenMatcher),
        MatchStrategy::ProjectName => Box::new(ProjectNameMatcher),
    }
}

/// Resolves requests to projects by scanning `<projects_dir>/*/.env`.
pub struct ProjectRegistry {
    projects_dir: PathBuf,
    host_projects_root: PathBuf,
    matcher: Box<dyn ProjectMatcher>,
}

impl ProjectRegistry {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        host_projects_root: impl Into<PathBuf>,
        strategy: MatchStrategy,
    ) -> Self {
        Self::with_matcher(projects_dir, host_projects_root, matcher_for(strategy))
    }

    pub fn with_matcher(
        projects_dir: impl Into<PathBuf>,
        host_projects_root: impl Into<PathBuf>,
        matcher: Box<dyn ProjectMatcher>,
    ) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            host_projects_root: host_projects_root.into(),
            matcher,
        }
    }

    /// Reads every project directory that carries a `.env` file, in name order.
    ///
    /// Files that cannot be read or parsed are skipped with a warning so one
    /// broken project cannot take the others down.
    pub fn scan(&self) -> Result<Vec<ProjectEntry>> {
        let read_dir = fs::read_dir(&self.projects_dir).map_err(|source| {
            RedeployError::ProjectScan {
                path: self.projects_dir.clone(),
                source,
            }
        })?;

        let mut dirs: Vec<(String, PathBuf)> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                Some((name, entry.path()))
            })
            .collect();
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(dirs.len());
        for (name, dir) in dirs {
            let env_path = dir.join(PROJECT_ENV_FILE);
            if !env_path.is_file() {
                continue;
            }
            match read_env_file(&env_path) {
                Ok(values) => entries.push(ProjectEntry::new(name, values)),
                Err(e) => warn!("Skipping project '{}': {}", name, e),
            }
        }
        Ok(entries)
    }

    /// Finds the project answering to `identifier` (a host or a path segment,
    /// depending on the active strategy).
    pub fn resolve(&self, identifier: &str) -> Result<Project> {
        let identifier = self.matcher.normalize(identifier)?;
        let entry = self
            .scan()?
            .into_iter()
            .find(|entry| self.matcher.matches(entry, &identifier))
            .ok_or_else(|| self.matcher.not_found(&identifier))?;
        debug!("Identifier '{}' resolved to project '{}'", identifier, entry.name);
        Project::from_entry(&entry, &self.host_projects_root)
    }
}

/// Parses a project `.env` file with every value taken literally.
///
/// `$` never expands to another variable, so secrets and paths containing it
/// are loaded exactly as written.
fn read_env_file(path: &Path) -> std::result::Result<HashMap<String, String>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    dotenv::from_read_iter(Cursor::new(escape_substitutions(&raw)))
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

/// Escapes each `$` that dotenv would read as the start of a substitution.
fn escape_substitutions(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        match line.split_once('=') {
            Some((key, value)) if !line.trim_start().starts_with('#') => {
                out.push_str(key);
                out.push('=');
                out.push_str(&escape_value(value));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut strong_quote = false;
    let mut weak_quote = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            escaped = false;
        } else if strong_quote {
            strong_quote = c != '\'';
        } else if c == '\\' {
            escaped = true;
        } else if c == '$' {
            out.push('\\');
        } else if weak_quote {
            weak_quote = c != '"';
        } else if c == '\'' {
            strong_quote = true;
        } else if c == '"' {
            weak_quote = true;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project(root: &Path, name: &str, env: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PROJECT_ENV_FILE), env).unwrap();
    }

    fn fixture() -> TempDir {
        let root = TempDir::new().unwrap();
        write_project(
            root.path(),
            "demo",
            "PAYLOAD_SIGNATURE=s3cr3t\n\
             DOMAIN_NAME=Demo.Example.com\n\
             DOMAIN_ALIASES=\"www.demo.example.com, old.example.com\"\n\
             WEBHOOK_URL=https://hooks.example.com/webhook/tok-demo\n",
        );
        write_project(
            root.path(),
            "shop",
            "PAYLOAD_SIGNATURE=shh\n\
             DOMAIN_NAME=shop.example.com\n\
             REPO_LOCATION=/opt/shop\n\
             TARGET_BRANCH=release\n\
             DOCKER_COMPOSE_RESTART_REQUIRED=YES\n\
             COMMIT_DOCKER_COMPOSE_RESTART_TRIGGER=[restart]\n\
             CI_PIPELINE_LOCATION=/opt/shop/ci.sh\n",
        );
        write_project(root.path(), "nosecret", "DOMAIN_NAME=nosecret.example.com\n");
        write_project(root.path(), "anonymous", "PAYLOAD_SIGNATURE=x\n");
        fs::create_dir_all(root.path().join("no-env")).unwrap();
        fs::write(root.path().join("stray-file"), "not a project").unwrap();
        root
    }

    fn registry(root: &TempDir, strategy: MatchStrategy) -> ProjectRegistry {
        ProjectRegistry::new(root.path(), "/srv/projects", strategy)
    }

    #[test]
    fn scan_lists_only_directories_with_env() {
        let root = fixture();
        let names: Vec<_> = registry(&root, MatchStrategy::Host)
            .scan()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["anonymous", "demo", "nosecret", "shop"]);
    }

    #[test]
    fn host_matching_is_case_insensitive_and_ignores_port() {
        let root = fixture();
        let registry = registry(&root, MatchStrategy::Host);
        assert_eq!(registry.resolve("demo.example.com").unwrap().name, "demo");
        assert_eq!(registry.resolve("DEMO.example.com:8443").unwrap().name, "demo");
        assert_eq!(registry.resolve("old.example.com").unwrap().name, "demo");
        assert_eq!(registry.resolve("www.demo.example.com").unwrap().name, "demo");
    }

    #[test]
    fn unknown_host_is_unrouted() {
        let root = fixture();
        let err = registry(&root, MatchStrategy::Host)
            .resolve("evil.example.com")
            .unwrap_err();
        assert!(matches!(err, RedeployError::UnroutedDomain { .. }));
    }

    #[test]
    fn aliases_alone_do_not_route_by_host() {
        let root = fixture();
        write_project(
            root.path(),
            "aliasonly",
            "PAYLOAD_SIGNATURE=x\nDOMAIN_ALIASES=foo.example.com\n",
        );
        let err = registry(&root, MatchStrategy::Host)
            .resolve("foo.example.com")
            .unwrap_err();
        assert!(matches!(err, RedeployError::UnroutedDomain { ref host } if host == "foo.example.com"));
    }

    #[test]
    fn bracketed_ipv6_host_keeps_its_address() {
        let root = fixture();
        write_project(root.path(), "local", "PAYLOAD_SIGNATURE=x\nDOMAIN_NAME=[::1]\n");
        let registry = registry(&root, MatchStrategy::Host);
        assert_eq!(registry.resolve("[::1]:5000").unwrap().name, "local");
        assert_eq!(registry.resolve("[::1]").unwrap().name, "local");
    }

    #[test]
    fn port_is_only_stripped_when_numeric() {
        assert_eq!(strip_port("demo.example.com:8443"), "demo.example.com");
        assert_eq!(strip_port("demo.example.com:"), "demo.example.com");
        assert_eq!(strip_port("demo.example.com"), "demo.example.com");
        assert_eq!(strip_port("demo:example"), "demo:example");
        assert_eq!(strip_port("[fe80::1]:80"), "[fe80::1]");
    }

    #[test]
    fn empty_host_is_rejected() {
        let root = fixture();
        let err = registry(&root, MatchStrategy::Host).resolve(":5000").unwrap_err();
        assert!(matches!(err, RedeployError::MissingHost));
    }

    #[test]
    fn path_token_matches_last_url_segment() {
        let root = fixture();
        let registry = registry(&root, MatchStrategy::PathToken);
        assert_eq!(registry.resolve("tok-demo").unwrap().name, "demo");
        // the directory name is not an identity under this strategy
        let err = registry.resolve("demo").unwrap_err();
        assert!(matches!(err, RedeployError::UnknownProject { .. }));
    }

    #[test]
    fn project_without_webhook_url_has_no_path_token() {
        let root = fixture();
        let registry = registry(&root, MatchStrategy::PathToken);
        // "anonymous" carries a secret but no WEBHOOK_URL
        for identifier in ["anonymous", ""] {
            let err = registry.resolve(identifier).unwrap_err();
            assert!(matches!(err, RedeployError::UnknownProject { .. }));
        }
    }

    #[test]
    fn project_name_matches_directory() {
        let root = fixture();
        let registry = registry(&root, MatchStrategy::ProjectName);
        assert_eq!(registry.resolve("shop").unwrap().name, "shop");
        let err = registry.resolve("no-env").unwrap_err();
        assert!(matches!(err, RedeployError::UnknownProject { .. }));
    }

    #[test]
    fn missing_secret_is_a_configuration_error() {
        let root = fixture();
        let err = registry(&root, MatchStrategy::Host)
            .resolve("nosecret.example.com")
            .unwrap_err();
        assert!(matches!(err, RedeployError::MissingSecret { ref project } if project == "nosecret"));
    }

    #[test]
    fn defaults_are_applied() {
        let root = fixture();
        let project = registry(&root, MatchStrategy::Host)
            .resolve("demo.example.com")
            .unwrap();
        assert_eq!(project.repo_location, "/srv/projects/demo");
        assert_eq!(project.target_branch, "main");
        assert!(!project.restart_required_default);
        assert!(project.restart_trigger_token.is_none());
        assert!(project.ci_pipeline_location.is_none());
        assert_eq!(project.webhook_path_token.as_deref(), Some("tok-demo"));
        assert!(project.domain_aliases.contains("old.example.com"));
    }

    #[test]
    fn repo_location_never_defaults_to_scan_root() {
        let root = fixture();
        let project = registry(&root, MatchStrategy::ProjectName)
            .resolve("anonymous")
            .unwrap();
        assert!(!project
            .repo_location
            .starts_with(&*root.path().to_string_lossy()));
    }

    #[test]
    fn explicit_settings_are_read() {
        let root = fixture();
        let project = registry(&root, MatchStrategy::Host)
            .resolve("shop.example.com")
            .unwrap();
        assert_eq!(project.repo_location, "/opt/shop");
        assert_eq!(project.target_branch, "release");
        assert!(project.restart_required_default);
        assert_eq!(project.restart_trigger_token.as_deref(), Some("[restart]"));
        assert_eq!(project.ci_pipeline_location.as_deref(), Some("/opt/shop/ci.sh"));
        assert!(project.custom_redeploy_script_location.is_none());
    }

    #[test]
    fn custom_repo_location_is_a_fallback_key() {
        let values = HashMap::from([
            ("PAYLOAD_SIGNATURE".to_string(), "x".to_string()),
            ("CUSTOM_REPO_LOCATION".to_string(), "/data/app".to_string()),
        ]);
        let project =
            Project::from_entry(&ProjectEntry::new("app", values), Path::new("/srv/projects"))
                .unwrap();
        assert_eq!(project.repo_location, "/data/app");
    }

    #[test]
    fn debug_output_redacts_secret() {
        let values = HashMap::from([("PAYLOAD_SIGNATURE".to_string(), "topsecret".to_string())]);
        let project =
            Project::from_entry(&ProjectEntry::new("app", values), Path::new("/srv")).unwrap();
        assert!(!format!("{:?}", project).contains("topsecret"));
    }

    #[test]
    fn dollar_signs_are_read_literally() {
        let root = fixture();
        write_project(
            root.path(),
            "dollar",
            "PAYLOAD_SIGNATURE=ab$cdXYZ\n\
             DOMAIN_NAME=dollar.example.com\n\
             REPO_LOCATION=\"/srv/$HOME/app\"\n\
             CI_PIPELINE_LOCATION='/opt/$ci.sh'\n\
             CUSTOM_REDEPLOY_SCRIPT_LOCATION=/opt/\\$deploy.sh\n",
        );
        let project = registry(&root, MatchStrategy::Host)
            .resolve("dollar.example.com")
            .unwrap();
        assert_eq!(project.payload_secret, "ab$cdXYZ");
        assert_eq!(project.repo_location, "/srv/$HOME/app");
        assert_eq!(project.ci_pipeline_location.as_deref(), Some("/opt/$ci.sh"));
        assert_eq!(
            project.custom_redeploy_script_location.as_deref(),
            Some("/opt/$deploy.sh")
        );
    }

    #[test]
    fn leading_dollar_secret_is_not_emptied() {
        let root = fixture();
        write_project(
            root.path(),
            "dollar",
            "PAYLOAD_SIGNATURE=$ecret\nDOMAIN_NAME=dollar.example.com\n",
        );
        let project = registry(&root, MatchStrategy::Host)
            .resolve("dollar.example.com")
            .unwrap();
        assert_eq!(project.payload_secret, "$ecret");
    }

    #[test]
    fn escaping_leaves_quotes_and_comments_alone() {
        assert_eq!(escape_value("ab$cd"), "ab\\$cd");
        assert_eq!(escape_value("'ab$cd'"), "'ab$cd'");
        assert_eq!(escape_value("\"ab$cd\""), "\"ab\\$cd\"");
        assert_eq!(escape_value("ab\\$cd"), "ab\\$cd");
        assert_eq!(
            escape_substitutions("# price: $5\nKEY=$v\n"),
            "# price: $5\nKEY=\\$v\n"
        );
    }

    #[test]
    fn missing_projects_dir_is_a_scan_error() {
        let registry = ProjectRegistry::new("/nonexistent/projects", "/srv", MatchStrategy::Host);
        let err = registry.resolve("demo.example.com").unwrap_err();
        assert!(matches!(err, RedeployError::ProjectScan { .. }));
    }
}
