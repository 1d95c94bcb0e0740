//! Release catalog reached through the stack's management function
//!
//! Each catalog call is a synchronous `aws lambda invoke` with a small JSON
//! request. The function answers with the catalog's JSON directly, or with an
//! `errorType`/`errorMessage` pair when it fails.

use crate::awscli::{AwsCli, parse_output};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use stackflow_cloud::{CloudError, ReleaseCatalog, StackDescriptor, UpdateInfo, VersionInfo};

/// Stack output naming the management function
pub const MANAGEMENT_FUNCTION_OUTPUT: &str = "ManagementFunction";

/// Error types the function uses for "no such release"
const NOT_FOUND_ERROR_TYPES: &[&str] = &["NotFound", "ReleaseNotFound", "ResourceNotFoundException"];

const INVALID_INPUT_ERROR_TYPES: &[&str] = &["InvalidInput", "ValidationError"];

#[derive(Debug, Deserialize)]
struct InvokeOutput {
    #[serde(rename = "StatusCode", default)]
    status_code: u16,
    #[serde(rename = "FunctionError", default)]
    function_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FunctionError {
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: String,
}

/// Release catalog behind a Lambda management function
pub struct LambdaCatalog {
    cli: AwsCli,
    function: String,
}

impl LambdaCatalog {
    pub fn new(cli: AwsCli, function: impl Into<String>) -> Self {
        Self {
            cli,
            function: function.into(),
        }
    }

    /// Locate the management function through the stack's outputs
    pub fn for_stack(cli: AwsCli, stack: &StackDescriptor) -> stackflow_cloud::Result<Self> {
        let function = stack.output(MANAGEMENT_FUNCTION_OUTPUT).ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "stack {} has no {} output; it cannot be updated in place",
                stack.name, MANAGEMENT_FUNCTION_OUTPUT
            ))
        })?;
        Ok(Self::new(cli, function))
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Invoke the function and return its raw JSON answer
    async fn invoke(&self, request: &Value) -> stackflow_cloud::Result<Value> {
        let outfile = tempfile::NamedTempFile::new()?;
        let outpath = outfile.path().to_string_lossy().to_string();
        let payload = request.to_string();

        let metadata: InvokeOutput = self
            .cli
            .run_json(&[
                "lambda",
                "invoke",
                "--function-name",
                self.function.as_str(),
                "--cli-binary-format",
                "raw-in-base64-out",
                "--payload",
                payload.as_str(),
                outpath.as_str(),
            ])
            .await?;

        let body = tokio::fs::read_to_string(outfile.path()).await?;
        tracing::debug!(
            function = %self.function,
            status = metadata.status_code,
            "management function answered"
        );

        if let Some(kind) = metadata.function_error {
            return Err(function_error(&kind, &body));
        }
        Ok(parse_output(&body)?)
    }

    async fn call<T: DeserializeOwned>(&self, request: Value) -> stackflow_cloud::Result<T> {
        let answer = self.invoke(&request).await?;
        Ok(serde_json::from_value(answer)?)
    }
}

/// Classify an error answer from the management function
fn function_error(kind: &str, body: &str) -> CloudError {
    let parsed: Result<FunctionError> = parse_output(body);
    let (error_type, message) = match parsed {
        Ok(error) => (error.error_type.unwrap_or_default(), error.error_message),
        Err(_) => (String::new(), body.trim().to_string()),
    };

    if NOT_FOUND_ERROR_TYPES.contains(&error_type.as_str()) {
        CloudError::ResourceNotFound(message)
    } else if INVALID_INPUT_ERROR_TYPES.contains(&error_type.as_str()) {
        CloudError::InvalidConfig(message)
    } else {
        CloudError::ApiError(format!("management function error ({}): {}", kind, message))
    }
}

#[async_trait]
impl ReleaseCatalog for LambdaCatalog {
    async fn current_version(&self) -> stackflow_cloud::Result<Option<VersionInfo>> {
        self.call(json!({ "action": "getCurrentVersion" })).await
    }

    async fn list_available_updates(
        &self,
        provider: Option<&str>,
    ) -> stackflow_cloud::Result<Vec<VersionInfo>> {
        let updates: Option<Vec<VersionInfo>> = self
            .call(json!({ "action": "listAvailableUpdates", "provider": provider }))
            .await?;
        Ok(updates.unwrap_or_default())
    }

    async fn list_previous_versions(&self) -> stackflow_cloud::Result<Vec<VersionInfo>> {
        let versions: Option<Vec<VersionInfo>> = self
            .call(json!({ "action": "listPreviousVersions" }))
            .await?;
        Ok(versions.unwrap_or_default())
    }

    async fn get_update_info(&self, tag: &str) -> stackflow_cloud::Result<UpdateInfo> {
        self.call(json!({ "action": "getUpdateInfo", "tag": tag })).await
    }

    async fn request_update(&self, tag: &str, provider: Option<&str>) -> stackflow_cloud::Result<()> {
        let _: Value = self
            .call(json!({ "action": "requestUpdate", "tag": tag, "provider": provider }))
            .await?;
        tracing::info!(function = %self.function, tag = %tag, "requested release");
        Ok(())
    }
}
