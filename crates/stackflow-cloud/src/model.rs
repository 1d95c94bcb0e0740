//! Provider-neutral snapshots of stacks, resources and releases

use serde::{Deserialize, Serialize};

/// A single stack parameter as read from (or sent to) the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParameter {
    pub key: String,

    /// Concrete value; `None` when `use_previous_value` is set
    pub value: Option<String>,

    /// Ask the provider to keep whatever value the stack currently has
    pub use_previous_value: bool,
}

impl StackParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            use_previous_value: false,
        }
    }

    pub fn previous(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            use_previous_value: true,
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// A stack output (key/value pair exported by the template)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

impl StackOutput {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of a stack at read time.
///
/// The live stack may change between calls, so engines re-read it before
/// each dependent operation instead of caching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescriptor {
    /// Opaque provider identifier (an ARN that encodes the region)
    pub id: String,
    pub name: String,
    pub status: String,
    pub parameters: Vec<StackParameter>,
    pub outputs: Vec<StackOutput>,
    pub termination_protection: bool,
}

impl StackDescriptor {
    /// Region encoded in the stack id (`arn:aws:cloudformation:<region>:...`)
    pub fn region(&self) -> Option<&str> {
        region_from_arn(&self.id)
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.value())
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_str())
    }

    /// Outputs that follow the resource naming convention
    pub fn output_resources(&self) -> Vec<CloudResource> {
        self.outputs
            .iter()
            .map(CloudResource::from_output)
            .filter(|r| r.kind != ResourceKind::Other)
            .collect()
    }

    /// Deep link to the stack's page in the provider console
    pub fn console_url(&self) -> Option<String> {
        let region = self.region()?;
        Some(format!(
            "https://{region}.console.aws.amazon.com/cloudformation/home?region={region}#/stacks/stackinfo?stackId={}",
            self.id
        ))
    }
}

/// Extract the region segment from an ARN
pub fn region_from_arn(arn: &str) -> Option<&str> {
    let mut parts = arn.split(':');
    if parts.next() != Some("arn") {
        return None;
    }
    let region = parts.nth(2)?;
    if region.is_empty() { None } else { Some(region) }
}

/// Resource type, derived from the output-key suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Table,
    Key,
    LogGroup,
    Other,
}

impl ResourceKind {
    /// Classify an output key by its suffix (`ObjectsBucket` -> bucket)
    pub fn from_output_key(key: &str) -> Self {
        // LogGroup first: "...LogGroup" must not fall through to a shorter suffix
        [
            ResourceKind::LogGroup,
            ResourceKind::Bucket,
            ResourceKind::Table,
            ResourceKind::Key,
        ]
        .into_iter()
        .find(|kind| {
            let suffix = kind.suffix();
            key.len() > suffix.len() && key.ends_with(suffix)
        })
        .unwrap_or(ResourceKind::Other)
    }

    /// Output-key suffix that marks this type
    pub fn suffix(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "Bucket",
            ResourceKind::Table => "Table",
            ResourceKind::Key => "Key",
            ResourceKind::LogGroup => "LogGroup",
            ResourceKind::Other => "",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Bucket => write!(f, "bucket"),
            ResourceKind::Table => write!(f, "table"),
            ResourceKind::Key => write!(f, "key"),
            ResourceKind::LogGroup => write!(f, "log group"),
            ResourceKind::Other => write!(f, "other"),
        }
    }
}

/// A resource exposed through a stack output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: ResourceKind,

    /// Template-level name (the output key)
    pub logical_name: String,

    /// Provider-assigned concrete identifier (the output value)
    pub physical_id: String,
}

impl CloudResource {
    pub fn new(
        kind: ResourceKind,
        logical_name: impl Into<String>,
        physical_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            physical_id: physical_id.into(),
        }
    }

    pub fn from_output(output: &StackOutput) -> Self {
        Self::new(
            ResourceKind::from_output_key(&output.key),
            output.key.clone(),
            output.value.clone(),
        )
    }
}

impl std::fmt::Display for CloudResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.logical_name, self.physical_id)
    }
}

/// A release as reported by the release catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub tag: String,

    /// Lexicographically comparable form of `tag`
    pub sortable_tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
}

impl VersionInfo {
    pub fn new(tag: impl Into<String>, sortable_tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            sortable_tag: sortable_tag.into(),
            template_url: None,
        }
    }

    pub fn with_template_url(mut self, url: impl Into<String>) -> Self {
        self.template_url = Some(url.into());
        self
    }
}

/// Catalog answer for "give me release X"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    #[serde(default)]
    pub update: Option<VersionInfo>,

    #[serde(default)]
    pub up_to_date: bool,
}

/// Kind of long-running stack operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Handle for an asynchronous stack operation, awaited via `wait_for_terminal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOperation {
    /// Stack id or name the operation runs against
    pub stack: String,
    pub kind: OperationKind,
}

impl StackOperation {
    pub fn new(stack: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            stack: stack.into(),
            kind,
        }
    }
}

/// Capabilities every lifecycle template needs
pub const DEFAULT_CAPABILITIES: &[&str] = &["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"];

/// Request to create a new stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
    pub termination_protection: bool,
}

/// Request to move an existing stack to a new template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStackRequest {
    pub stack: String,
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
}

/// Table settings that point-in-time restore does not carry over
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSettings {
    pub point_in_time_recovery: bool,
    pub ttl_attribute: Option<String>,

    /// `NEW_IMAGE`, `NEW_AND_OLD_IMAGES`, ... when a stream is enabled
    pub stream_view_type: Option<String>,
}

/// Bucket configuration copied onto restored buckets.
///
/// Documents are kept in the provider's own JSON shape so they can be
/// written back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub encryption: Option<serde_json::Value>,

    /// `Enabled` or `Suspended`; `None` if versioning was never turned on
    pub versioning: Option<String>,
    pub lifecycle: Option<serde_json::Value>,
    pub cors: Option<serde_json::Value>,
}
