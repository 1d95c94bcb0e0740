//! Disaster-Recovery Restore engine
//!
//! Builds a parallel set of tables and buckets from a point-in-time
//! snapshot of a source stack, then rewrites the source's parameter set so
//! a new stack can be stood up on the restored copies. The source stack is
//! never modified.
//!
//! [`RestoreEngine::plan`] reads and names everything without side effects;
//! [`RestoreEngine::execute`] performs the pre-flight checks, bucket
//! preparation, the restores themselves and the parameter rewrite.

use crate::error::{LifecycleError, RestoreStage, Result};
use crate::naming::derive_restored_resource_name;
use crate::params::{DEPLOYMENT_BUCKET_PARAMETER, ParameterDeriver, set_parameter};
use crate::report::{Reporter, SilentReporter};
use crate::resources::{LOGS_BUCKET, ResourceEnumerator};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use stackflow_cloud::{
    CloudResource, ControlPlane, CreateStackRequest, DEFAULT_CAPABILITIES, ResourceKind,
    SnapshotCopier, StackDescriptor, StackOperation, StackParameter,
};
use std::collections::HashMap;
use std::sync::LazyLock;

/// `arn:<partition>:dynamodb:<region>:<account>:table/<name>/stream/<label>`
static STREAM_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[^:]+:dynamodb:[^:]*:[^:]*:table/([^/]+)/stream/[^/]+$")
        .expect("valid stream arn regex")
});

/// Name of the table a stream ARN belongs to
pub fn stream_arn_table(value: &str) -> Option<&str> {
    STREAM_ARN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Launch a new stack on the restored resources once they are ready
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub stack_name: String,
    pub template_url: String,
    pub termination_protection: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub source_stack: String,
    pub point_in_time: DateTime<Utc>,

    /// Applied last, after old ids were rewritten
    pub overrides: Vec<StackParameter>,
    pub launch: Option<LaunchOptions>,
}

impl RestoreOptions {
    pub fn new(source_stack: impl Into<String>, point_in_time: DateTime<Utc>) -> Self {
        Self {
            source_stack: source_stack.into(),
            point_in_time,
            overrides: Vec::new(),
            launch: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_stack.trim().is_empty() {
            return Err(LifecycleError::InvalidInput(
                "a source stack name or id is required".to_string(),
            ));
        }
        if self.point_in_time > Utc::now() {
            return Err(LifecycleError::InvalidInput(format!(
                "point in time {} is in the future",
                self.point_in_time.to_rfc3339()
            )));
        }
        if let Some(p) = self.overrides.iter().find(|p| p.key.trim().is_empty()) {
            return Err(LifecycleError::InvalidInput(format!(
                "parameter override with value {:?} has an empty key",
                p.value
            )));
        }
        if let Some(launch) = &self.launch {
            if launch.stack_name.trim().is_empty() || launch.template_url.trim().is_empty() {
                return Err(LifecycleError::InvalidInput(
                    "launching a stack needs both a stack name and a template url".to_string(),
                ));
            }
            if launch.stack_name == self.source_stack {
                return Err(LifecycleError::InvalidInput(
                    "the restored stack needs a name different from the source".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A source resource and the name its restored copy will get
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub source: CloudResource,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub source_stack_name: String,
    pub point_in_time: DateTime<Utc>,

    /// Derived source parameters, before any rewrite
    pub parameters: Vec<StackParameter>,
    pub buckets_to_restore: Vec<RestoreTarget>,
    pub tables_to_restore: Vec<RestoreTarget>,
}

impl RestorePlan {
    /// Old physical id → new physical id, over every restored resource
    pub fn old_to_new_physical_id(&self) -> HashMap<String, String> {
        self.targets()
            .map(|t| (t.source.physical_id.clone(), t.new_name.clone()))
            .collect()
    }

    pub fn targets(&self) -> impl Iterator<Item = &RestoreTarget> {
        self.tables_to_restore
            .iter()
            .chain(self.buckets_to_restore.iter())
    }
}

#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Parameter set for a stack backed by the restored resources
    pub parameters: Vec<StackParameter>,
    pub restored: Vec<RestoreTarget>,

    /// New table name → new stream ARN, for tables that have a stream
    pub stream_arns: HashMap<String, String>,
    pub launched: Option<StackOperation>,
}

/// Every resource must be referenced by exactly one derived parameter
pub fn cross_validate(parameters: &[StackParameter], resources: &[CloudResource]) -> Result<()> {
    for resource in resources {
        let matches = parameters
            .iter()
            .filter(|p| p.key != DEPLOYMENT_BUCKET_PARAMETER)
            .filter(|p| p.value() == Some(resource.physical_id.as_str()))
            .count();
        if matches != 1 {
            return Err(LifecycleError::Inconsistent(format!(
                "{} is referenced by {} parameters, expected exactly one; does the template match the stack?",
                resource, matches
            )));
        }
    }
    Ok(())
}

/// Replace old physical ids and stream ARNs of restored tables.
///
/// `table_streams` maps each restored table's old name to its new stream
/// ARN, if the restore produced one.
pub fn rewrite_parameters(
    parameters: &[StackParameter],
    old_to_new: &HashMap<String, String>,
    table_streams: &HashMap<String, Option<String>>,
) -> Result<Vec<StackParameter>> {
    let mut rewritten = Vec::with_capacity(parameters.len());

    for parameter in parameters {
        let mut parameter = parameter.clone();
        if parameter.key == DEPLOYMENT_BUCKET_PARAMETER {
            rewritten.push(parameter);
            continue;
        }

        if let Some(value) = parameter.value.clone() {
            if let Some(new_id) = old_to_new.get(&value) {
                parameter.value = Some(new_id.clone());
            } else if let Some(table) = stream_arn_table(&value)
                && let Some(stream) = table_streams.get(table)
            {
                let new_arn = stream.clone().ok_or_else(|| {
                    LifecycleError::Inconsistent(format!(
                        "parameter {} references the stream of {} but the restored table has no stream",
                        parameter.key, table
                    ))
                })?;
                parameter.value = Some(new_arn);
            }
        }
        rewritten.push(parameter);
    }

    Ok(rewritten)
}

pub struct RestoreEngine<'a> {
    control_plane: &'a dyn ControlPlane,
    copier: &'a dyn SnapshotCopier,
    reporter: &'a dyn Reporter,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        copier: &'a dyn SnapshotCopier,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            control_plane,
            copier,
            reporter,
        }
    }

    pub async fn plan(&self, options: &RestoreOptions) -> Result<RestorePlan> {
        self.plan_with_rng(options, &mut StdRng::from_entropy())
            .await
    }

    /// Read, validate and name; nothing is created
    pub async fn plan_with_rng<R: Rng + Send + ?Sized>(
        &self,
        options: &RestoreOptions,
        rng: &mut R,
    ) -> Result<RestorePlan> {
        options.validate()?;

        let deriver = ParameterDeriver::new(self.control_plane, &SilentReporter);
        let enumerator = ResourceEnumerator::new(self.control_plane);
        let ((source, parameters), resources) = tokio::try_join!(
            deriver.derive_with_stack(&options.source_stack, &[]),
            enumerator.output_resources(&options.source_stack),
        )?;

        cross_validate(&parameters, &resources)?;

        let (buckets_to_restore, tables_to_restore) =
            name_targets(&source, &resources, rng);

        tracing::info!(
            stack = %source.name,
            buckets = buckets_to_restore.len(),
            tables = tables_to_restore.len(),
            point_in_time = %options.point_in_time,
            "Planned restore"
        );

        Ok(RestorePlan {
            source_stack_name: source.name,
            point_in_time: options.point_in_time,
            parameters,
            buckets_to_restore,
            tables_to_restore,
        })
    }

    pub async fn execute(&self, plan: &RestorePlan, options: &RestoreOptions) -> Result<RestoreResult> {
        let mut completed: Vec<String> = Vec::new();

        self.reporter.info("Running pre-flight checks...");
        self.preflight(plan)
            .await
            .map_err(|e| aborted(RestoreStage::Preflight, &completed, e))?;

        if !plan.buckets_to_restore.is_empty() {
            self.reporter.info("Preparing target buckets...");
        }
        let prepared = join_all(plan.buckets_to_restore.iter().map(|t| self.prepare_bucket(t))).await;
        let mut failure = None;
        for (target, result) in plan.buckets_to_restore.iter().zip(prepared) {
            match result {
                Ok(()) => completed.push(target.new_name.clone()),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(aborted(RestoreStage::PrepareBuckets, &completed, e));
        }

        self.reporter.info(&format!(
            "Restoring {} table(s) and {} bucket(s) as of {}...",
            plan.tables_to_restore.len(),
            plan.buckets_to_restore.len(),
            plan.point_in_time.to_rfc3339()
        ));
        let (tables, buckets) = tokio::join!(
            join_all(plan.tables_to_restore.iter().map(|t| self.restore_table(t, plan.point_in_time))),
            join_all(plan.buckets_to_restore.iter().map(|t| self.restore_bucket(t, plan.point_in_time))),
        );

        let mut failure = None;
        let mut table_streams: HashMap<String, Option<String>> = HashMap::new();
        for (target, result) in plan.tables_to_restore.iter().zip(tables) {
            match result {
                Ok(stream) => {
                    completed.push(target.new_name.clone());
                    table_streams.insert(target.source.physical_id.clone(), stream);
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        for result in buckets {
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }
        if let Some(e) = failure {
            return Err(aborted(RestoreStage::Restore, &completed, e));
        }

        let mut parameters = rewrite_parameters(
            &plan.parameters,
            &plan.old_to_new_physical_id(),
            &table_streams,
        )
        .map_err(|e| aborted(RestoreStage::RewriteParameters, &completed, e))?;
        for parameter in &options.overrides {
            set_parameter(&mut parameters, parameter.clone());
        }

        let stream_arns = plan
            .tables_to_restore
            .iter()
            .filter_map(|t| {
                table_streams
                    .get(&t.source.physical_id)
                    .cloned()
                    .flatten()
                    .map(|arn| (t.new_name.clone(), arn))
            })
            .collect();

        let launched = match &options.launch {
            Some(launch) => Some(
                self.launch(launch, &parameters)
                    .await
                    .map_err(|e| aborted(RestoreStage::Launch, &completed, e))?,
            ),
            None => None,
        };

        self.reporter.success(&format!(
            "Restored {} resource(s) from {}",
            completed.len(),
            plan.source_stack_name
        ));

        Ok(RestoreResult {
            parameters,
            restored: plan.targets().cloned().collect(),
            stream_arns,
            launched,
        })
    }

    /// Every assertion that must hold before anything is created
    async fn preflight(&self, plan: &RestorePlan) -> Result<()> {
        if !plan.buckets_to_restore.is_empty() {
            self.copier.check_available().await?;
        }

        let tables = futures_util::future::try_join_all(plan.tables_to_restore.iter().map(|t| async move {
            if !self.control_plane.table_exists(&t.source.physical_id).await? {
                return Err(LifecycleError::NotFound(format!(
                    "source table {}",
                    t.source.physical_id
                )));
            }
            if self.control_plane.table_exists(&t.new_name).await? {
                return Err(LifecycleError::AlreadyExists(format!("table {}", t.new_name)));
            }
            Ok(())
        }));
        let buckets = futures_util::future::try_join_all(plan.buckets_to_restore.iter().map(|t| async move {
            if !self.control_plane.bucket_exists(&t.source.physical_id).await? {
                return Err(LifecycleError::NotFound(format!(
                    "source bucket {}",
                    t.source.physical_id
                )));
            }
            Ok(())
        }));

        tokio::try_join!(tables, buckets)?;
        Ok(())
    }

    /// Create (or reuse an empty) target bucket and copy the source's settings onto it
    async fn prepare_bucket(&self, target: &RestoreTarget) -> Result<()> {
        let bucket = &target.new_name;
        if self.control_plane.bucket_exists(bucket).await? {
            if !self.control_plane.bucket_is_empty(bucket).await? {
                return Err(LifecycleError::AlreadyExists(format!(
                    "bucket {} exists and is not empty",
                    bucket
                )));
            }
            tracing::debug!(bucket, "Reusing empty target bucket");
        } else {
            self.control_plane.create_bucket(bucket).await?;
        }

        let settings = self
            .control_plane
            .get_bucket_settings(&target.source.physical_id)
            .await?;

        // One setting at a time: concurrent configuration changes on a bucket conflict.
        if let Some(encryption) = &settings.encryption {
            self.control_plane
                .put_bucket_encryption(bucket, encryption)
                .await?;
        }
        if let Some(versioning) = &settings.versioning {
            self.control_plane
                .put_bucket_versioning(bucket, versioning)
                .await?;
        }
        if let Some(lifecycle) = &settings.lifecycle {
            self.control_plane
                .put_bucket_lifecycle(bucket, lifecycle)
                .await?;
        }
        if let Some(cors) = &settings.cors {
            self.control_plane.put_bucket_cors(bucket, cors).await?;
        }
        Ok(())
    }

    /// Restore one table; returns the new stream ARN if the source had a stream
    async fn restore_table(
        &self,
        target: &RestoreTarget,
        point_in_time: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let source = &target.source.physical_id;
        tracing::info!(source, target = %target.new_name, "Restoring table");

        self.control_plane
            .restore_table_to_point_in_time(source, &target.new_name, point_in_time)
            .await?;
        self.control_plane.wait_for_table(&target.new_name).await?;

        let settings = self.control_plane.get_table_settings(source).await?;
        let stream = self
            .control_plane
            .apply_table_settings(&target.new_name, &settings)
            .await?;

        if settings.stream_view_type.is_some() && stream.is_none() {
            tracing::warn!(table = %target.new_name, "Source has a stream but no new stream was reported");
        }
        self.reporter
            .info(&format!("Restored table {} -> {}", source, target.new_name));
        Ok(stream)
    }

    async fn restore_bucket(&self, target: &RestoreTarget, point_in_time: DateTime<Utc>) -> Result<()> {
        let destination = format!("s3://{}", target.new_name);
        tracing::info!(source = %target.source.physical_id, %destination, "Copying bucket snapshot");

        self.copier
            .copy_at(&target.source.physical_id, &destination, point_in_time)
            .await?;
        self.reporter.info(&format!(
            "Restored bucket {} -> {}",
            target.source.physical_id, target.new_name
        ));
        Ok(())
    }

    async fn launch(&self, launch: &LaunchOptions, parameters: &[StackParameter]) -> Result<StackOperation> {
        let request = CreateStackRequest {
            stack_name: launch.stack_name.clone(),
            template_url: launch.template_url.clone(),
            parameters: parameters.to_vec(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            termination_protection: launch.termination_protection,
        };

        self.reporter.info(&format!(
            "Creating stack {}, waiting for it to settle...",
            launch.stack_name
        ));
        let operation = self.control_plane.create_stack(&request).await?;
        self.control_plane.wait_for_terminal(&operation).await?;
        self.reporter
            .success(&format!("Stack {} created", launch.stack_name));
        Ok(operation)
    }
}

/// Partition into (buckets, tables) and assign restored names
fn name_targets<R: Rng + ?Sized>(
    source: &StackDescriptor,
    resources: &[CloudResource],
    rng: &mut R,
) -> (Vec<RestoreTarget>, Vec<RestoreTarget>) {
    let mut buckets = Vec::new();
    let mut tables = Vec::new();

    for resource in resources {
        let list = match resource.kind {
            ResourceKind::Bucket if resource.logical_name != LOGS_BUCKET => &mut buckets,
            ResourceKind::Table => &mut tables,
            _ => continue,
        };
        let new_name = derive_restored_resource_name(
            &source.name,
            resource.kind,
            &resource.logical_name,
            &resource.physical_id,
            rng,
        );
        list.push(RestoreTarget {
            source: resource.clone(),
            new_name,
        });
    }

    (buckets, tables)
}

fn aborted(stage: RestoreStage, completed: &[String], source: LifecycleError) -> LifecycleError {
    tracing::warn!(%stage, error = %source, "Restore aborted");
    LifecycleError::RestoreAborted {
        stage,
        completed: completed.to_vec(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(key: &str, value: &str) -> StackParameter {
        StackParameter::new(key, value)
    }

    #[test]
    fn test_stream_arn_table() {
        assert_eq!(
            stream_arn_table(
                "arn:aws:dynamodb:eu-west-1:123456789012:table/demo-events/stream/2024-01-01T00:00:00.000"
            ),
            Some("demo-events")
        );
        assert_eq!(
            stream_arn_table("arn:aws:dynamodb:eu-west-1:123456789012:table/demo-events"),
            None
        );
    }

    #[test]
    fn test_cross_validate_excludes_deployment_parameter() {
        let resources = vec![CloudResource::new(
            ResourceKind::Bucket,
            "DeploymentBucket",
            "demo-deploy",
        )];
        let parameters = vec![
            p(DEPLOYMENT_BUCKET_PARAMETER, "demo-deploy"),
            p("ExistingDeploymentBucket", "demo-deploy"),
        ];
        assert!(cross_validate(&parameters, &resources).is_ok());
        assert!(cross_validate(&parameters[..1], &resources).is_err());
    }

    #[test]
    fn test_cross_validate_rejects_duplicates() {
        let resources = vec![CloudResource::new(ResourceKind::Table, "EventsTable", "t1")];
        let parameters = vec![p("ExistingEventsTable", "t1"), p("Mirror", "t1")];
        let err = cross_validate(&parameters, &resources).unwrap_err();
        assert!(matches!(err, LifecycleError::Inconsistent(_)));
    }

    #[test]
    fn test_rewrite_is_total() {
        let old_to_new: HashMap<String, String> = [
            ("t1".to_string(), "demo-events-r1".to_string()),
            ("b1".to_string(), "demo-objects-abc123-r1".to_string()),
            ("demo-deploy".to_string(), "demo-deployment-xyz789-r1".to_string()),
        ]
        .into();
        let streams: HashMap<String, Option<String>> = [(
            "t1".to_string(),
            Some("arn:aws:dynamodb:us-east-1:1:table/demo-events-r1/stream/new".to_string()),
        )]
        .into();
        let parameters = vec![
            p("ExistingEventsTable", "t1"),
            p("ExistingObjectsBucket", "b1"),
            p("EventsStream", "arn:aws:dynamodb:us-east-1:1:table/t1/stream/old"),
            p(DEPLOYMENT_BUCKET_PARAMETER, "demo-deploy"),
            p("Stage", "dev"),
        ];

        let rewritten = rewrite_parameters(&parameters, &old_to_new, &streams).unwrap();
        assert_eq!(rewritten[0].value(), Some("demo-events-r1"));
        assert_eq!(rewritten[1].value(), Some("demo-objects-abc123-r1"));
        assert_eq!(
            rewritten[2].value(),
            Some("arn:aws:dynamodb:us-east-1:1:table/demo-events-r1/stream/new")
        );
        assert_eq!(rewritten[3].value(), Some("demo-deploy"));
        assert_eq!(rewritten[4].value(), Some("dev"));

        for parameter in rewritten.iter().filter(|p| p.key != DEPLOYMENT_BUCKET_PARAMETER) {
            assert!(!old_to_new.contains_key(parameter.value().unwrap()));
        }
    }

    #[test]
    fn test_rewrite_missing_stream_is_inconsistent() {
        let streams: HashMap<String, Option<String>> = [("t1".to_string(), None)].into();
        let parameters = vec![p("EventsStream", "arn:aws:dynamodb:us-east-1:1:table/t1/stream/old")];
        let err = rewrite_parameters(&parameters, &HashMap::new(), &streams).unwrap_err();
        assert!(matches!(err, LifecycleError::Inconsistent(_)));
    }

    #[test]
    fn test_options_reject_future_point_in_time() {
        let options = RestoreOptions::new("demo", Utc::now() + chrono::Duration::hours(1));
        assert!(matches!(options.validate(), Err(LifecycleError::InvalidInput(_))));
        assert!(RestoreOptions::new("demo", Utc::now()).validate().is_ok());
    }
}
