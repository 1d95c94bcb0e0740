//! Destroy/Teardown engine
//!
//! Deletes a stack and, at the operator's choice, the resources it would
//! otherwise leave behind. Every step that can race an external deletion
//! treats "not found" as done.

use crate::error::{CleanupFailure, LifecycleError, Result};
use crate::prompt::{Prompter, require};
use crate::report::Reporter;
use crate::resources::{BIG_BUCKETS, ResourceEnumerator, is_big_bucket};
use crate::script::write_deletion_script;
use futures_util::future::join_all;
use serde_json::json;
use stackflow_cloud::{CloudError, CloudResource, ControlPlane, ResourceKind, RetryConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COMPANION_SUFFIX: &str = "services";

/// Lifecycle rule installed on big buckets instead of emptying them
pub const EXPIRE_ALL_RULE_ID: &str = "stackflow-expire-all";

/// Lifecycle configuration that expires everything in a bucket within a day
pub fn expire_all_lifecycle() -> serde_json::Value {
    json!({
        "Rules": [{
            "ID": EXPIRE_ALL_RULE_ID,
            "Status": "Enabled",
            "Filter": { "Prefix": "" },
            "Expiration": { "Days": 1 },
            "NoncurrentVersionExpiration": { "NoncurrentDays": 1 },
            "AbortIncompleteMultipartUpload": { "DaysAfterInitiation": 1 }
        }, {
            "ID": format!("{}-markers", EXPIRE_ALL_RULE_ID),
            "Status": "Enabled",
            "Filter": { "Prefix": "" },
            "Expiration": { "ExpiredObjectDeleteMarker": true }
        }]
    })
}

#[derive(Debug, Clone)]
pub struct DestroyOptions {
    pub stack: String,

    /// Where the big-bucket deletion script is written
    pub script_dir: PathBuf,

    /// Credential profile named in the generated script
    pub profile: Option<String>,
    pub companion_suffix: String,

    /// Backoff while the stack is busy with another operation
    pub busy_retry: RetryConfig,
}

impl DestroyOptions {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            script_dir: PathBuf::from("."),
            profile: None,
            companion_suffix: DEFAULT_COMPANION_SUFFIX.to_string(),
            busy_retry: RetryConfig::fixed(6, Duration::from_secs(10)),
        }
    }

    pub fn companion_stack(&self) -> String {
        format!("{}-{}", self.stack, self.companion_suffix)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stack.trim().is_empty() {
            return Err(LifecycleError::InvalidInput(
                "a stack name or id is required".to_string(),
            ));
        }
        if self.companion_suffix.trim().is_empty() {
            return Err(LifecycleError::InvalidInput(
                "companion stack suffix must not be empty".to_string(),
            ));
        }
        if self.busy_retry.max_attempts == 0 {
            return Err(LifecycleError::InvalidInput(
                "stack deletion needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision {
    pub resource: CloudResource,
    pub keep: bool,
}

/// What a teardown did, resource by resource
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub stack: String,

    /// False when the stack was already gone
    pub stack_deleted: bool,
    pub companion_deleted: bool,
    pub deleted: Vec<CloudResource>,

    /// Big buckets left to expire, to be removed by the script
    pub deferred: Vec<CloudResource>,
    pub retained: Vec<CloudResource>,
    pub already_gone: Vec<CloudResource>,
    pub script: Option<PathBuf>,
}

enum Cleanup {
    Done,
    Gone,
}

pub struct DestroyEngine<'a> {
    control_plane: &'a dyn ControlPlane,
    prompter: &'a dyn Prompter,
    reporter: &'a dyn Reporter,
}

impl<'a> DestroyEngine<'a> {
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        prompter: &'a dyn Prompter,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            control_plane,
            prompter,
            reporter,
        }
    }

    pub async fn run(&self, options: &DestroyOptions) -> Result<TeardownReport> {
        options.validate()?;
        let stack = options.stack.as_str();

        require(self.prompter, &format!("Destroy stack {}?", stack))?;
        require(
            self.prompter,
            &format!(
                "This cannot be undone. Really delete {} and the resources you choose?",
                stack
            ),
        )?;

        let candidates = match ResourceEnumerator::new(self.control_plane)
            .teardown_candidates(stack)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) if e.is_not_found() => {
                self.reporter
                    .warn(&format!("Stack {} not found, nothing to enumerate", stack));
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let decisions = self.decide(candidates)?;
        let retain_names = retain_set(&decisions);

        let mut report = TeardownReport {
            stack: stack.to_string(),
            retained: decisions
                .iter()
                .filter(|d| d.keep)
                .map(|d| d.resource.clone())
                .collect(),
            ..TeardownReport::default()
        };

        report.companion_deleted = self.delete_companion(&options.companion_stack()).await;

        match self.control_plane.set_termination_protection(stack, false).await {
            Ok(()) => {
                report.stack_deleted = self.delete_primary(options, &retain_names).await?;
            }
            Err(e) if e.is_not_found() => {
                self.reporter
                    .info(&format!("Stack {} is already gone", stack));
            }
            Err(e) => return Err(e.into()),
        }

        let to_delete: Vec<CloudResource> = decisions
            .into_iter()
            .filter(|d| !d.keep)
            .map(|d| d.resource)
            .collect();
        if to_delete.is_empty() {
            self.reporter.success(&format!("Stack {} destroyed", stack));
            return Ok(report);
        }

        let failures = self.cleanup(options, to_delete, &mut report).await?;
        if !failures.is_empty() {
            return Err(LifecycleError::CleanupFailed { failures });
        }

        self.reporter.success(&format!("Stack {} destroyed", stack));
        Ok(report)
    }

    /// Ask which outliving resources to delete; everything is kept by default
    fn decide(&self, candidates: Vec<CloudResource>) -> Result<Vec<RetentionDecision>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        self.reporter
            .info("These resources are kept when the stack is deleted:");
        for resource in &candidates {
            self.reporter.info(&format!("  - {}", resource));
        }

        if !self
            .prompter
            .confirm("Choose resources to delete one by one?", false)?
        {
            return Ok(candidates
                .into_iter()
                .map(|resource| RetentionDecision {
                    resource,
                    keep: true,
                })
                .collect());
        }

        // buckets first, each group in enumeration order
        let (buckets, others): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|r| r.kind == ResourceKind::Bucket);

        buckets
            .into_iter()
            .chain(others)
            .map(|resource| {
                let delete = self
                    .prompter
                    .confirm(&format!("Delete {}?", resource), false)?;
                Ok(RetentionDecision {
                    resource,
                    keep: !delete,
                })
            })
            .collect()
    }

    /// Best effort; only reports whether a companion stack went away
    async fn delete_companion(&self, companion: &str) -> bool {
        let result = match self.control_plane.delete_stack(companion, &[]).await {
            Ok(operation) => self.control_plane.wait_for_terminal(&operation).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.reporter
                    .info(&format!("Deleted companion stack {}", companion));
                true
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(companion, "No companion stack");
                false
            }
            Err(e) => {
                tracing::warn!(companion, error = %e, "Companion stack deletion failed");
                self.reporter.warn(&format!(
                    "Could not delete companion stack {}: {}",
                    companion, e
                ));
                false
            }
        }
    }

    /// Delete the stack; returns false if it turned out to be gone already
    async fn delete_primary(&self, options: &DestroyOptions, retain: &[String]) -> Result<bool> {
        let stack = options.stack.as_str();
        let retry = &options.busy_retry;
        let mut attempt = 0;

        self.reporter
            .info(&format!("Deleting stack {}, waiting for it to finish...", stack));

        let first_failure = loop {
            let result = match self.control_plane.delete_stack(stack, &[]).await {
                Ok(operation) => self.control_plane.wait_for_terminal(&operation).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(true),
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) if e.is_stack_busy() && attempt + 1 < retry.max_attempts => {
                    tracing::info!(stack, attempt, "Stack busy, retrying deletion");
                    tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e @ CloudError::StackBusy { .. }) => return Err(e.into()),
                Err(e) => break e,
            }
        };

        self.reporter.warn(&format!(
            "Deleting {} failed ({}), retrying while keeping: {}",
            stack,
            first_failure,
            if retain.is_empty() { "nothing".to_string() } else { retain.join(", ") }
        ));

        let operation = self.control_plane.delete_stack(stack, retain).await?;
        match self.control_plane.wait_for_terminal(&operation).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the chosen resources; failures are collected, not fatal to siblings
    async fn cleanup(
        &self,
        options: &DestroyOptions,
        to_delete: Vec<CloudResource>,
        report: &mut TeardownReport,
    ) -> Result<Vec<CleanupFailure>> {
        let (big, small): (Vec<_>, Vec<_>) = to_delete.into_iter().partition(is_big_bucket);
        let lifecycle = expire_all_lifecycle();

        let (small_results, big_results) = tokio::join!(
            join_all(small.iter().map(|r| self.delete_resource(r))),
            join_all(big.iter().map(|r| self.defer_bucket(r, &lifecycle))),
        );

        let mut failures = Vec::new();
        for (resource, result) in small.into_iter().zip(small_results) {
            match result {
                Ok(Cleanup::Done) => report.deleted.push(resource),
                Ok(Cleanup::Gone) => report.already_gone.push(resource),
                Err(e) => failures.push(CleanupFailure {
                    resource,
                    error: e.to_string(),
                }),
            }
        }
        for (resource, result) in big.into_iter().zip(big_results) {
            match result {
                Ok(Cleanup::Done) => report.deferred.push(resource),
                Ok(Cleanup::Gone) => report.already_gone.push(resource),
                Err(e) => failures.push(CleanupFailure {
                    resource,
                    error: e.to_string(),
                }),
            }
        }

        if !report.deferred.is_empty() {
            let buckets: Vec<String> = report
                .deferred
                .iter()
                .map(|r| r.physical_id.clone())
                .collect();
            let path = write_deletion_script(
                &options.script_dir,
                &options.stack,
                &buckets,
                options.profile.as_deref(),
            )?;
            self.reporter.warn(&format!(
                "{} bucket(s) will empty within a day; then run {}",
                buckets.len(),
                path.display()
            ));
            report.script = Some(path);
        }

        for failure in &failures {
            self.reporter.warn(&format!(
                "Failed to delete {}: {}",
                failure.resource, failure.error
            ));
        }
        Ok(failures)
    }

    async fn delete_resource(&self, resource: &CloudResource) -> std::result::Result<Cleanup, CloudError> {
        let id = resource.physical_id.as_str();
        let result = match resource.kind {
            ResourceKind::Bucket => match self.control_plane.empty_bucket(id).await {
                Ok(()) => self.control_plane.delete_bucket(id).await,
                Err(e) => Err(e),
            },
            ResourceKind::Table => self.control_plane.delete_table(id).await,
            ResourceKind::Key => self.control_plane.schedule_key_deletion(id).await,
            ResourceKind::LogGroup => self.control_plane.delete_log_group(id).await,
            ResourceKind::Other => {
                tracing::debug!(resource = %resource, "Not a deletable resource type");
                return Ok(Cleanup::Gone);
            }
        };
        into_cleanup(resource, result)
    }

    async fn defer_bucket(
        &self,
        resource: &CloudResource,
        lifecycle: &serde_json::Value,
    ) -> std::result::Result<Cleanup, CloudError> {
        let result = self
            .control_plane
            .put_bucket_lifecycle(&resource.physical_id, lifecycle)
            .await;
        into_cleanup(resource, result)
    }
}

fn into_cleanup(
    resource: &CloudResource,
    result: std::result::Result<(), CloudError>,
) -> std::result::Result<Cleanup, CloudError> {
    match result {
        Ok(()) => Ok(Cleanup::Done),
        Err(e) if e.is_not_found() => {
            tracing::debug!(resource = %resource, "Already deleted");
            Ok(Cleanup::Gone)
        }
        Err(e) => Err(e),
    }
}

/// Logical names the provider must leave behind: everything kept plus the big buckets
pub fn retain_set(decisions: &[RetentionDecision]) -> Vec<String> {
    let mut names: Vec<String> = decisions
        .iter()
        .filter(|d| d.keep || BIG_BUCKETS.contains(&d.resource.logical_name.as_str()))
        .map(|d| d.resource.logical_name.clone())
        .collect();
    names.dedup();
    names
}
