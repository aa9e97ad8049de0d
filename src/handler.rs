//! Webhook pipeline: resolve project, verify signature, filter, write task

use axum::body::Bytes;
use tracing::{error, info, warn};

use crate::config::{RefPolicy, ServiceConfig};
use crate::error::{RedeployError, Result};
use crate::payload::{self, Decision, IgnoreReason};
use crate::project::ProjectRegistry;
use crate::signature::verify_github_signature;
use crate::task::{TaskFileWriter, task_id};

/// One inbound webhook delivery, as extracted from the HTTP request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Host header or path segment, depending on the matching strategy
    pub route_key: String,
    pub signature: Option<String>,
    pub event_type: Option<String>,
    pub body: Bytes,
}

/// Successful end states of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Queued { project: String, task_id: String },
    Ignored { project: String, reason: IgnoreReason },
}

pub struct WebhookHandler {
    registry: ProjectRegistry,
    writer: TaskFileWriter,
    ref_policy: RefPolicy,
}

impl WebhookHandler {
    pub fn new(registry: ProjectRegistry, writer: TaskFileWriter, ref_policy: RefPolicy) -> Self {
        Self {
            registry,
            writer,
            ref_policy,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            ProjectRegistry::new(
                &config.projects_dir,
                &config.host_projects_root,
                config.match_strategy,
            ),
            TaskFileWriter::new(&config.signal_dir),
            config.ref_policy,
        )
    }

    pub fn writer(&self) -> &TaskFileWriter {
        &self.writer
    }

    /// Runs the pipeline and logs the outcome.
    ///
    /// Blocking: scans the projects directory and writes to the signal
    /// directory.
    pub fn handle(&self, request: &WebhookRequest) -> Result<WebhookOutcome> {
        let result = self.process(request);
        match &result {
            Ok(WebhookOutcome::Queued { project, task_id }) => {
                info!("Queued task {} for project '{}'", task_id, project);
            }
            Ok(WebhookOutcome::Ignored { project, reason }) => {
                info!("Ignored webhook for project '{}': {}", project, reason);
            }
            Err(e) if e.status_code().is_server_error() => {
                error!("Webhook for '{}' failed: {}", request.route_key, e);
            }
            Err(e) => {
                warn!("Webhook for '{}' rejected: {}", request.route_key, e);
            }
        }
        result
    }

    fn process(&self, request: &WebhookRequest) -> Result<WebhookOutcome> {
        // a project without a secret fails here, before any signature check
        let project = self.registry.resolve(&request.route_key)?;

        if !verify_github_signature(
            &project.payload_secret,
            &request.body,
            request.signature.as_deref(),
        ) {
            return Err(RedeployError::InvalidSignature {
                project: project.name,
            });
        }

        let decision = payload::decide(
            request.event_type.as_deref(),
            &request.body,
            &project,
            self.ref_policy,
        )?;

        match decision {
            Decision::Ignore(reason) => Ok(WebhookOutcome::Ignored {
                project: project.name,
                reason,
            }),
            Decision::Proceed(task) => {
                let path = self.writer.write(&task)?;
                Ok(WebhookOutcome::Queued {
                    project: project.name,
                    task_id: task_id(&path),
                })
            }
        }
    }
}
