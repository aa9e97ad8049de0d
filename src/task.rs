//! Redeploy task files ("batons") handed to the host-side redeploy agent
//!
//! A task is written to a temporary file inside the signal directory and then
//! renamed to `task_<project>_<timestamp>_<suffix>.baton`. The rename is the
//! only point at which the agent can see the file, so a visible baton is
//! always complete.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RedeployError, Result};
use crate::project::Project;

/// Extension the redeploy agent watches for
pub const TASK_FILE_EXTENSION: &str = "baton";

const TASK_FILE_PREFIX: &str = "task_";
const TEMP_FILE_PREFIX: &str = ".task_";
const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Directives for one redeploy, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeployTask {
    pub project_name: String,
    pub repo_location: String,
    pub restart_required: bool,
    pub ci_pipeline_location: Option<String>,
    pub custom_redeploy_script_location: Option<String>,
}

impl RedeployTask {
    pub fn for_project(project: &Project, restart_required: bool) -> Self {
        Self {
            project_name: project.name.clone(),
            repo_location: project.repo_location.clone(),
            restart_required,
            ci_pipeline_location: project.ci_pipeline_location.clone(),
            custom_redeploy_script_location: project.custom_redeploy_script_location.clone(),
        }
    }

    /// Renders the `KEY=VALUE` lines in canonical order.
    ///
    /// Values are written verbatim; they must not contain newlines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing to a String cannot fail
        let _ = writeln!(out, "REPO_LOCATION={}", self.repo_location);
        let _ = writeln!(
            out,
            "DOCKER_COMPOSE_RESTART_REQUIRED={}",
            if self.restart_required { "YES" } else { "NO" }
        );
        if let Some(ci) = self.ci_pipeline_location.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(out, "CI_PIPELINE_LOCATION={}", ci);
        }
        if let Some(script) = self
            .custom_redeploy_script_location
            .as_deref()
            .filter(|v| !v.is_empty())
        {
            let _ = writeln!(out, "CUSTOM_REDEPLOY_SCRIPT_LOCATION={}", script);
        }
        out
    }
}

/// Builds the final file name for a task.
///
/// The microsecond timestamp orders batons; the random suffix keeps names
/// unique when several writers hit the same microsecond.
pub fn task_file_name(project_name: &str, at: DateTime<Utc>) -> String {
    let random = Uuid::now_v7().simple().to_string();
    format!(
        "{}{}_{}_{}.{}",
        TASK_FILE_PREFIX,
        project_name,
        at.format("%Y%m%d-%H%M%S-%6f"),
        &random[random.len() - 8..],
        TASK_FILE_EXTENSION
    )
}

/// Task identifier reported to callers: the file name without extension.
pub fn task_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Writes tasks into the shared signal directory.
#[derive(Debug, Clone)]
pub struct TaskFileWriter {
    signal_dir: PathBuf,
}

impl TaskFileWriter {
    pub fn new(signal_dir: impl Into<PathBuf>) -> Self {
        Self {
            signal_dir: signal_dir.into(),
        }
    }

    pub fn signal_dir(&self) -> &Path {
        &self.signal_dir
    }

    /// Creates the signal directory and any missing parents.
    pub fn ensure_signal_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.signal_dir)
    }

    /// Atomically publishes `task` and returns the final path.
    pub fn write(&self, task: &RedeployTask) -> Result<PathBuf> {
        let final_path = self
            .signal_dir
            .join(task_file_name(&task.project_name, Utc::now()));
        let task_error = |source: io::Error| RedeployError::TaskWrite {
            project: task.project_name.clone(),
            path: final_path.clone(),
            source,
        };

        self.ensure_signal_dir().map_err(task_error)?;

        // same directory as the final name, so the rename never crosses a mount
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(&self.signal_dir)
            .map_err(task_error)?;
        debug!("Writing task for '{}' via {:?}", task.project_name, temp.path());

        temp.write_all(task.render().as_bytes())
            .map_err(task_error)?;
        temp.flush().map_err(task_error)?;
        temp.as_file().sync_all().map_err(task_error)?;

        // a failed persist drops the temp file, which removes it
        temp.persist_noclobber(&final_path)
            .map_err(|e| task_error(e.error))?;

        info!(
            "Task for project '{}' written to {:?}",
            task.project_name, final_path
        );
        Ok(final_path)
    }
}
