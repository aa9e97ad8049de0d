//! Push event parsing and the proceed/ignore decision

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use crate::config::RefPolicy;
use crate::error::{RedeployError, Result};
use crate::project::Project;
use crate::task::RedeployTask;

/// Header naming the webhook event type
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const PUSH_EVENT: &str = "push";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// The parts of a push payload the filter looks at.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub commits: Option<Vec<Commit>>,
    #[serde(default)]
    pub head_commit: Option<Commit>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub message: Option<String>,
}

impl PushPayload {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Branch named by `ref`, if it has the form `refs/heads/<branch>`.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()?
            .strip_prefix(BRANCH_REF_PREFIX)
            .filter(|branch| !branch.is_empty())
    }

    /// Head commit message followed by every commit message, in payload order.
    pub fn commit_messages(&self) -> impl Iterator<Item = &str> {
        self.head_commit
            .iter()
            .chain(self.commits.iter().flatten())
            .filter_map(|commit| commit.message.as_deref())
    }
}

/// Why an event was acknowledged without writing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NonPushEvent,
    NoBranch,
    NonTargetBranch,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::NonPushEvent => "non-push-event",
            IgnoreReason::NoBranch => "no branch",
            IgnoreReason::NonTargetBranch => "non-target-branch",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed(RedeployTask),
    Ignore(IgnoreReason),
}

/// Returns the ignore reason for an `X-GitHub-Event` value, if any.
///
/// A missing header is not a reason to ignore; only a present, non-push
/// event is.
pub fn filter_event(event_type: Option<&str>) -> Option<IgnoreReason> {
    match event_type {
        Some(event) if event.trim() != PUSH_EVENT => Some(IgnoreReason::NonPushEvent),
        _ => None,
    }
}

/// Whether the compose stack must be restarted for this push.
///
/// Starts from the project default; when that is off and a trigger token is
/// configured, the head-commit message followed by every commit message is
/// joined into one string and searched for the token (case-sensitive,
/// unanchored).
pub fn restart_required(payload: &PushPayload, project: &Project) -> bool {
    if project.restart_required_default {
        return true;
    }
    let Some(token) = project.restart_trigger_token.as_deref() else {
        return false;
    };
    let messages: String = payload.commit_messages().collect();
    messages.contains(token)
}

/// Decides what to do with an already parsed push payload.
pub fn decide_payload(
    payload: &PushPayload,
    project: &Project,
    ref_policy: RefPolicy,
) -> Result<Decision> {
    let Some(branch) = payload.branch() else {
        return match ref_policy {
            RefPolicy::Reject => Err(RedeployError::MissingBranch {
                git_ref: payload.git_ref.clone(),
            }),
            RefPolicy::Ignore => Ok(Decision::Ignore(IgnoreReason::NoBranch)),
        };
    };

    if branch != project.target_branch {
        debug!(
            "Push to '{}' ignored for project '{}' (target '{}')",
            branch, project.name, project.target_branch
        );
        return Ok(Decision::Ignore(IgnoreReason::NonTargetBranch));
    }

    let restart = restart_required(payload, project);
    Ok(Decision::Proceed(RedeployTask::for_project(project, restart)))
}

/// Full filter: event type first, then the JSON body.
///
/// Non-push events are ignored before the body is parsed, so pings and other
/// event shapes never produce a 400.
pub fn decide(
    event_type: Option<&str>,
    body: &[u8],
    project: &Project,
    ref_policy: RefPolicy,
) -> Result<Decision> {
    if let Some(reason) = filter_event(event_type) {
        return Ok(Decision::Ignore(reason));
    }
    let payload = PushPayload::parse(body)?;
    decide_payload(&payload, project, ref_policy)
}
