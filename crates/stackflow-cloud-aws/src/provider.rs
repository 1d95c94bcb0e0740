//! AWS control plane implementation

use crate::awscli::AwsCli;
use crate::error::{AwsError, CONFIG_MISSING_CODES};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use stackflow_cloud::{
    BucketSettings, CloudError, ControlPlane, CreateStackRequest, OperationKind, StackDescriptor,
    StackOperation, StackOutput, StackParameter, TableSettings, UpdateStackRequest,
};

type CloudResult<T> = stackflow_cloud::Result<T>;

/// Largest batch `delete-objects` accepts
const DELETE_BATCH: usize = 1000;

/// Upper bound on list/delete rounds when emptying a bucket
const MAX_EMPTY_ROUNDS: usize = 100_000;

/// Key states that make a key unusable, i.e. already on its way out
const RETIRED_KEY_STATES: &[&str] = &["PendingDeletion", "PendingReplicaDeletion", "Disabled"];

/// AWS control plane backed by the `aws` CLI
pub struct AwsControlPlane {
    cli: AwsCli,
}

impl AwsControlPlane {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &AwsCli {
        &self.cli
    }

    /// Treat "configuration never set" as `None`
    async fn optional_config(&self, args: &[&str]) -> CloudResult<Option<Value>> {
        match self.cli.run_json::<Value, _>(args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.has_code(CONFIG_MISSING_CODES) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Map a not-found answer to `None`
    fn exists(result: Result<Value, AwsError>) -> CloudResult<Option<Value>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ========== CloudFormation shapes ==========

#[derive(Debug, Deserialize)]
struct DescribeStacksOutput {
    #[serde(rename = "Stacks", default)]
    stacks: Vec<StackJson>,
}

#[derive(Debug, Deserialize)]
struct StackJson {
    #[serde(rename = "StackId")]
    stack_id: String,
    #[serde(rename = "StackName")]
    stack_name: String,
    #[serde(rename = "StackStatus")]
    stack_status: String,
    #[serde(rename = "Parameters", default)]
    parameters: Vec<ParameterJson>,
    #[serde(rename = "Outputs", default)]
    outputs: Vec<OutputJson>,
    #[serde(rename = "EnableTerminationProtection", default)]
    termination_protection: bool,
}

#[derive(Debug, Deserialize)]
struct ParameterJson {
    #[serde(rename = "ParameterKey")]
    key: String,
    #[serde(rename = "ParameterValue", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputJson {
    #[serde(rename = "OutputKey")]
    key: String,
    #[serde(rename = "OutputValue", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct StackIdOutput {
    #[serde(rename = "StackId")]
    stack_id: String,
}

impl From<StackJson> for StackDescriptor {
    fn from(stack: StackJson) -> Self {
        Self {
            id: stack.stack_id,
            name: stack.stack_name,
            status: stack.stack_status,
            parameters: stack
                .parameters
                .into_iter()
                .map(|p| StackParameter::new(p.key, p.value.unwrap_or_default()))
                .collect(),
            outputs: stack
                .outputs
                .into_iter()
                .map(|o| StackOutput::new(o.key, o.value))
                .collect(),
            termination_protection: stack.termination_protection,
        }
    }
}

/// `--parameters` document in CloudFormation's JSON shape
pub fn parameters_json(parameters: &[StackParameter]) -> Value {
    Value::Array(
        parameters
            .iter()
            .map(|p| match p.value() {
                Some(value) if !p.use_previous_value => {
                    json!({ "ParameterKey": p.key, "ParameterValue": value })
                }
                _ => json!({ "ParameterKey": p.key, "UsePreviousValue": true }),
            })
            .collect(),
    )
}

fn push_capabilities(args: &mut Vec<String>, capabilities: &[String]) {
    if !capabilities.is_empty() {
        args.push("--capabilities".to_string());
        args.extend(capabilities.iter().cloned());
    }
}

pub fn create_stack_args(request: &CreateStackRequest) -> Vec<String> {
    let mut args = vec![
        "cloudformation".to_string(),
        "create-stack".to_string(),
        "--stack-name".to_string(),
        request.stack_name.clone(),
        "--template-url".to_string(),
        request.template_url.clone(),
    ];
    if !request.parameters.is_empty() {
        args.push("--parameters".to_string());
        args.push(parameters_json(&request.parameters).to_string());
    }
    push_capabilities(&mut args, &request.capabilities);
    if request.termination_protection {
        args.push("--enable-termination-protection".to_string());
    }
    args
}

pub fn update_stack_args(request: &UpdateStackRequest) -> Vec<String> {
    let mut args = vec![
        "cloudformation".to_string(),
        "update-stack".to_string(),
        "--stack-name".to_string(),
        request.stack.clone(),
        "--template-url".to_string(),
        request.template_url.clone(),
    ];
    if !request.parameters.is_empty() {
        args.push("--parameters".to_string());
        args.push(parameters_json(&request.parameters).to_string());
    }
    push_capabilities(&mut args, &request.capabilities);
    args
}

pub fn delete_stack_args(stack_id: &str, retain: &[String]) -> Vec<String> {
    let mut args = vec![
        "cloudformation".to_string(),
        "delete-stack".to_string(),
        "--stack-name".to_string(),
        stack_id.to_string(),
    ];
    if !retain.is_empty() {
        args.push("--retain-resources".to_string());
        args.extend(retain.iter().cloned());
    }
    args
}

fn waiter_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "stack-create-complete",
        OperationKind::Update => "stack-update-complete",
        OperationKind::Delete => "stack-delete-complete",
    }
}

/// Read the settings a point-in-time restore drops from three describe calls
pub fn table_settings_from(pitr: &Value, ttl: &Value, table: &Value) -> TableSettings {
    let point_in_time_recovery = pitr
        .pointer("/ContinuousBackupsDescription/PointInTimeRecoveryDescription/PointInTimeRecoveryStatus")
        .and_then(Value::as_str)
        == Some("ENABLED");

    let ttl_attribute = match ttl
        .pointer("/TimeToLiveDescription/TimeToLiveStatus")
        .and_then(Value::as_str)
    {
        Some("ENABLED") | Some("ENABLING") => ttl
            .pointer("/TimeToLiveDescription/AttributeName")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };

    let stream_view_type = if table
        .pointer("/Table/StreamSpecification/StreamEnabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        table
            .pointer("/Table/StreamSpecification/StreamViewType")
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };

    TableSettings {
        point_in_time_recovery,
        ttl_attribute,
        stream_view_type,
    }
}

/// `(Key, VersionId)` pairs from a `list-object-versions` page
pub fn object_versions(listing: &Value) -> Vec<Value> {
    ["Versions", "DeleteMarkers"]
        .iter()
        .filter_map(|field| listing.get(*field).and_then(Value::as_array))
        .flatten()
        .filter_map(|entry| {
            let key = entry.get("Key")?.as_str()?;
            let version = entry.get("VersionId").and_then(Value::as_str).unwrap_or("null");
            Some(json!({ "Key": key, "VersionId": version }))
        })
        .collect()
}

/// `Key@VersionId: Code` for every entry a `delete-objects` call refused
pub fn delete_failures(response: &Value) -> Vec<String> {
    response
        .get("Errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|error| {
            let field = |name: &str| error.get(name).and_then(Value::as_str).unwrap_or("?");
            format!("{}@{}: {}", field("Key"), field("VersionId"), field("Code"))
        })
        .collect()
}

/// Argument lists for the three reads behind [`TableSettings`]
pub fn table_settings_args(table: &str) -> [[&str; 4]; 3] {
    [
        ["dynamodb", "describe-continuous-backups", "--table-name", table],
        ["dynamodb", "describe-time-to-live", "--table-name", table],
        ["dynamodb", "describe-table", "--table-name", table],
    ]
}

/// Argument lists for the four reads behind [`BucketSettings`]
pub fn bucket_settings_args(bucket: &str) -> [[&str; 4]; 4] {
    [
        ["s3api", "get-bucket-encryption", "--bucket", bucket],
        ["s3api", "get-bucket-versioning", "--bucket", bucket],
        ["s3api", "get-bucket-lifecycle-configuration", "--bucket", bucket],
        ["s3api", "get-bucket-cors", "--bucket", bucket],
    ]
}

#[async_trait]
impl ControlPlane for AwsControlPlane {
    fn name(&self) -> &str {
        "aws"
    }

    // ========== Stacks ==========

    async fn describe_stack(&self, stack: &str) -> CloudResult<StackDescriptor> {
        let output: DescribeStacksOutput = self
            .cli
            .run_json(&["cloudformation", "describe-stacks", "--stack-name", stack])
            .await?;

        output
            .stacks
            .into_iter()
            .next()
            .map(StackDescriptor::from)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("stack {}", stack)))
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> CloudResult<StackOperation> {
        let output: StackIdOutput = self.cli.run_json(&create_stack_args(request)).await?;
        tracing::info!(stack = %request.stack_name, id = %output.stack_id, "create-stack accepted");
        Ok(StackOperation::new(output.stack_id, OperationKind::Create))
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> CloudResult<StackOperation> {
        let output: StackIdOutput = self.cli.run_json(&update_stack_args(request)).await?;
        tracing::info!(stack = %request.stack, template = %request.template_url, "update-stack accepted");
        Ok(StackOperation::new(output.stack_id, OperationKind::Update))
    }

    async fn delete_stack(&self, stack: &str, retain: &[String]) -> CloudResult<StackOperation> {
        // delete-stack succeeds silently for unknown names, so resolve the id first
        let id = self.describe_stack(stack).await?.id;
        self.cli.run_quiet(&delete_stack_args(&id, retain)).await?;
        tracing::info!(stack = %stack, retained = retain.len(), "delete-stack accepted");
        Ok(StackOperation::new(id, OperationKind::Delete))
    }

    async fn wait_for_terminal(&self, operation: &StackOperation) -> CloudResult<()> {
        tracing::debug!(stack = %operation.stack, kind = %operation.kind, "waiting for stack");
        self.cli
            .run_quiet(&[
                "cloudformation",
                "wait",
                waiter_name(operation.kind),
                "--stack-name",
                operation.stack.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn set_termination_protection(&self, stack: &str, enabled: bool) -> CloudResult<()> {
        let flag = if enabled {
            "--enable-termination-protection"
        } else {
            "--no-enable-termination-protection"
        };
        self.cli
            .run_quiet(&[
                "cloudformation",
                "update-termination-protection",
                flag,
                "--stack-name",
                stack,
            ])
            .await?;
        Ok(())
    }

    // ========== Tables ==========

    async fn table_exists(&self, table: &str) -> CloudResult<bool> {
        let result = self
            .cli
            .run_json(&["dynamodb", "describe-table", "--table-name", table])
            .await;
        Ok(Self::exists(result)?.is_some())
    }

    async fn restore_table_to_point_in_time(
        &self,
        source: &str,
        target: &str,
        point_in_time: DateTime<Utc>,
    ) -> CloudResult<()> {
        let timestamp = point_in_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.cli
            .run_quiet(&[
                "dynamodb",
                "restore-table-to-point-in-time",
                "--source-table-name",
                source,
                "--target-table-name",
                target,
                "--restore-date-time",
                timestamp.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn wait_for_table(&self, table: &str) -> CloudResult<()> {
        self.cli
            .run_quiet(&["dynamodb", "wait", "table-exists", "--table-name", table])
            .await?;
        Ok(())
    }

    async fn get_table_settings(&self, table: &str) -> CloudResult<TableSettings> {
        let [pitr_args, ttl_args, describe_args] = table_settings_args(table);
        let (pitr, ttl, description) = tokio::try_join!(
            self.cli.run_json::<Value, _>(&pitr_args),
            self.cli.run_json::<Value, _>(&ttl_args),
            self.cli.run_json::<Value, _>(&describe_args),
        )?;

        Ok(table_settings_from(&pitr, &ttl, &description))
    }

    async fn apply_table_settings(
        &self,
        table: &str,
        settings: &TableSettings,
    ) -> CloudResult<Option<String>> {
        if settings.point_in_time_recovery {
            self.cli
                .run_quiet(&[
                    "dynamodb",
                    "update-continuous-backups",
                    "--table-name",
                    table,
                    "--point-in-time-recovery-specification",
                    "PointInTimeRecoveryEnabled=true",
                ])
                .await?;
        }

        if let Some(attribute) = &settings.ttl_attribute {
            let spec = format!("Enabled=true,AttributeName={}", attribute);
            self.cli
                .run_quiet(&[
                    "dynamodb",
                    "update-time-to-live",
                    "--table-name",
                    table,
                    "--time-to-live-specification",
                    spec.as_str(),
                ])
                .await?;
        }

        let Some(view_type) = &settings.stream_view_type else {
            return Ok(None);
        };

        let spec = format!("StreamEnabled=true,StreamViewType={}", view_type);
        let output: Value = self
            .cli
            .run_json(&[
                "dynamodb",
                "update-table",
                "--table-name",
                table,
                "--stream-specification",
                spec.as_str(),
            ])
            .await?;

        let arn = output
            .pointer("/TableDescription/LatestStreamArn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::ApiError(format!("update-table on {} returned no stream ARN", table))
            })?;
        Ok(Some(arn))
    }

    async fn delete_table(&self, table: &str) -> CloudResult<()> {
        self.cli
            .run_quiet(&["dynamodb", "delete-table", "--table-name", table])
            .await?;
        Ok(())
    }

    // ========== Buckets ==========

    async fn bucket_exists(&self, bucket: &str) -> CloudResult<bool> {
        let result = self
            .cli
            .run_json(&["s3api", "head-bucket", "--bucket", bucket])
            .await;
        Ok(Self::exists(result)?.is_some())
    }

    async fn create_bucket(&self, bucket: &str) -> CloudResult<()> {
        let mut args = vec![
            "s3api".to_string(),
            "create-bucket".to_string(),
            "--bucket".to_string(),
            bucket.to_string(),
        ];
        // us-east-1 rejects an explicit location constraint
        if let Some(region) = self.cli.region().filter(|r| *r != "us-east-1") {
            args.push("--create-bucket-configuration".to_string());
            args.push(format!("LocationConstraint={}", region));
        }
        self.cli.run_quiet(&args).await?;
        Ok(())
    }

    async fn bucket_is_empty(&self, bucket: &str) -> CloudResult<bool> {
        let listing: Value = self
            .cli
            .run_json(&["s3api", "list-object-versions", "--bucket", bucket, "--max-items", "1"])
            .await?;
        Ok(object_versions(&listing).is_empty())
    }

    async fn get_bucket_settings(&self, bucket: &str) -> CloudResult<BucketSettings> {
        let [encryption_args, versioning_args, lifecycle_args, cors_args] =
            bucket_settings_args(bucket);
        let (encryption, versioning, lifecycle, cors) = tokio::try_join!(
            self.optional_config(&encryption_args),
            self.optional_config(&versioning_args),
            self.optional_config(&lifecycle_args),
            self.optional_config(&cors_args),
        )?;

        Ok(BucketSettings {
            encryption: encryption
                .and_then(|v| v.get("ServerSideEncryptionConfiguration").cloned()),
            versioning: versioning
                .as_ref()
                .and_then(|v| v.get("Status"))
                .and_then(Value::as_str)
                .map(str::to_string),
            // put-bucket-lifecycle-configuration only accepts the rules
            lifecycle: lifecycle
                .and_then(|v| v.get("Rules").cloned())
                .map(|rules| json!({ "Rules": rules })),
            cors: cors
                .and_then(|v| v.get("CORSRules").cloned())
                .map(|rules| json!({ "CORSRules": rules })),
        })
    }

    async fn put_bucket_encryption(&self, bucket: &str, encryption: &Value) -> CloudResult<()> {
        let document = encryption.to_string();
        self.cli
            .run_quiet(&[
                "s3api",
                "put-bucket-encryption",
                "--bucket",
                bucket,
                "--server-side-encryption-configuration",
                document.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> CloudResult<()> {
        let configuration = format!("Status={}", status);
        self.cli
            .run_quiet(&[
                "s3api",
                "put-bucket-versioning",
                "--bucket",
                bucket,
                "--versioning-configuration",
                configuration.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn put_bucket_lifecycle(&self, bucket: &str, lifecycle: &Value) -> CloudResult<()> {
        let document = lifecycle.to_string();
        self.cli
            .run_quiet(&[
                "s3api",
                "put-bucket-lifecycle-configuration",
                "--bucket",
                bucket,
                "--lifecycle-configuration",
                document.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, cors: &Value) -> CloudResult<()> {
        let document = cors.to_string();
        self.cli
            .run_quiet(&[
                "s3api",
                "put-bucket-cors",
                "--bucket",
                bucket,
                "--cors-configuration",
                document.as_str(),
            ])
            .await?;
        Ok(())
    }

    async fn empty_bucket(&self, bucket: &str) -> CloudResult<()> {
        let batch = DELETE_BATCH.to_string();
        let mut removed = 0usize;
        let mut previous: Vec<Value> = Vec::new();
        for _ in 0..MAX_EMPTY_ROUNDS {
            let listing: Value = self
                .cli
                .run_json(&["s3api", "list-object-versions", "--bucket", bucket, "--max-items", batch.as_str()])
                .await?;
            let objects = object_versions(&listing);
            if objects.is_empty() {
                return Ok(());
            }
            if objects == previous {
                return Err(CloudError::ApiError(format!(
                    "bucket {} is not getting emptier, {} versions could not be deleted",
                    bucket,
                    objects.len()
                )));
            }

            let document = json!({ "Objects": objects, "Quiet": true }).to_string();
            let response: Value = self
                .cli
                .run_json(&["s3api", "delete-objects", "--bucket", bucket, "--delete", document.as_str()])
                .await?;
            let failures = delete_failures(&response);
            if !failures.is_empty() {
                return Err(CloudError::ApiError(format!(
                    "could not delete from bucket {}: {}",
                    bucket,
                    failures.join(", ")
                )));
            }
            removed += objects.len();
            tracing::debug!(bucket = %bucket, removed, "emptying bucket");
            previous = objects;
        }
        Err(CloudError::Timeout(format!(
            "bucket {} still not empty after {} delete rounds",
            bucket, MAX_EMPTY_ROUNDS
        )))
    }

    async fn delete_bucket(&self, bucket: &str) -> CloudResult<()> {
        self.cli
            .run_quiet(&["s3api", "delete-bucket", "--bucket", bucket])
            .await?;
        Ok(())
    }

    // ========== Keys & log groups ==========

    async fn key_exists(&self, key_id: &str) -> CloudResult<bool> {
        let result = self
            .cli
            .run_json(&["kms", "describe-key", "--key-id", key_id])
            .await;
        let Some(description) = Self::exists(result)? else {
            return Ok(false);
        };
        let state = description
            .pointer("/KeyMetadata/KeyState")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(!RETIRED_KEY_STATES.contains(&state))
    }

    async fn schedule_key_deletion(&self, key_id: &str) -> CloudResult<()> {
        self.cli
            .run_quiet(&[
                "kms",
                "schedule-key-deletion",
                "--key-id",
                key_id,
                "--pending-window-in-days",
                "7",
            ])
            .await?;
        Ok(())
    }

    async fn log_group_exists(&self, name: &str) -> CloudResult<bool> {
        let output: Value = self
            .cli
            .run_json(&["logs", "describe-log-groups", "--log-group-name-prefix", name])
            .await?;
        Ok(output
            .get("logGroups")
            .and_then(Value::as_array)
            .is_some_and(|groups| {
                groups
                    .iter()
                    .any(|g| g.get("logGroupName").and_then(Value::as_str) == Some(name))
            }))
    }

    async fn delete_log_group(&self, name: &str) -> CloudResult<()> {
        self.cli
            .run_quiet(&["logs", "delete-log-group", "--log-group-name", name])
            .await?;
        Ok(())
    }
}
