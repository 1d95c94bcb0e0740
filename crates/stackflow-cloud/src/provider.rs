//! Cloud control plane trait definitions

use crate::error::Result;
use crate::model::{
    BucketSettings, CloudResource, CreateStackRequest, ResourceKind, StackDescriptor,
    StackOperation, TableSettings, UpdateInfo, UpdateStackRequest, VersionInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Cloud control plane abstraction
///
/// Every call is a network round-trip. Calls that target a missing object
/// fail with [`CloudError::ResourceNotFound`](crate::CloudError::ResourceNotFound)
/// so callers can treat it as "already done" where that is safe.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the provider name (e.g., "aws")
    fn name(&self) -> &str;

    // ========== Stacks ==========

    async fn describe_stack(&self, stack: &str) -> Result<StackDescriptor>;

    /// Resources exposed through the stack's outputs, classified by output key
    async fn list_stack_output_resources(&self, stack: &str) -> Result<Vec<CloudResource>> {
        Ok(self.describe_stack(stack).await?.output_resources())
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<StackOperation>;

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<StackOperation>;

    /// Delete a stack, leaving the given logical resources behind
    async fn delete_stack(&self, stack: &str, retain: &[String]) -> Result<StackOperation>;

    /// Block until the operation reaches a terminal state.
    ///
    /// A provider-side timeout surfaces as [`CloudError::Timeout`](crate::CloudError::Timeout).
    async fn wait_for_terminal(&self, operation: &StackOperation) -> Result<()>;

    async fn set_termination_protection(&self, stack: &str, enabled: bool) -> Result<()>;

    // ========== Tables ==========

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn restore_table_to_point_in_time(
        &self,
        source: &str,
        target: &str,
        point_in_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn wait_for_table(&self, table: &str) -> Result<()>;

    async fn get_table_settings(&self, table: &str) -> Result<TableSettings>;

    /// Apply settings to a table; returns the table's stream ARN if one is enabled
    async fn apply_table_settings(
        &self,
        table: &str,
        settings: &TableSettings,
    ) -> Result<Option<String>>;

    async fn delete_table(&self, table: &str) -> Result<()>;

    // ========== Buckets ==========

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn bucket_is_empty(&self, bucket: &str) -> Result<bool>;

    async fn get_bucket_settings(&self, bucket: &str) -> Result<BucketSettings>;

    async fn put_bucket_encryption(&self, bucket: &str, encryption: &serde_json::Value)
    -> Result<()>;

    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> Result<()>;

    async fn put_bucket_lifecycle(&self, bucket: &str, lifecycle: &serde_json::Value) -> Result<()>;

    async fn put_bucket_cors(&self, bucket: &str, cors: &serde_json::Value) -> Result<()>;

    /// Remove every object version, delete marker and current object
    async fn empty_bucket(&self, bucket: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    // ========== Keys & log groups ==========

    async fn key_exists(&self, key_id: &str) -> Result<bool>;

    async fn schedule_key_deletion(&self, key_id: &str) -> Result<()>;

    async fn log_group_exists(&self, name: &str) -> Result<bool>;

    async fn delete_log_group(&self, name: &str) -> Result<()>;

    /// Check whether the object behind a resource still exists
    async fn resource_exists(&self, resource: &CloudResource) -> Result<bool> {
        match resource.kind {
            ResourceKind::Bucket => self.bucket_exists(&resource.physical_id).await,
            ResourceKind::Table => self.table_exists(&resource.physical_id).await,
            ResourceKind::Key => self.key_exists(&resource.physical_id).await,
            ResourceKind::LogGroup => self.log_group_exists(&resource.physical_id).await,
            ResourceKind::Other => Ok(false),
        }
    }
}

/// Release catalog, reached through the stack's own management channel
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    async fn current_version(&self) -> Result<Option<VersionInfo>>;

    async fn list_available_updates(&self, provider: Option<&str>) -> Result<Vec<VersionInfo>>;

    async fn list_previous_versions(&self) -> Result<Vec<VersionInfo>>;

    async fn get_update_info(&self, tag: &str) -> Result<UpdateInfo>;

    /// Ask the catalog to stage release `tag` for this stack
    async fn request_update(&self, tag: &str, provider: Option<&str>) -> Result<()>;
}

/// External tool that materializes a bucket's contents as of a past instant
#[async_trait]
pub trait SnapshotCopier: Send + Sync {
    /// Fail with [`CloudError::ToolNotFound`](crate::CloudError::ToolNotFound) if unusable
    async fn check_available(&self) -> Result<()>;

    async fn copy_at(
        &self,
        source_bucket: &str,
        destination_uri: &str,
        point_in_time: DateTime<Utc>,
    ) -> Result<()>;
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Same delay between every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// No waiting at all (tests, dry runs)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Delay to sleep after the given zero-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
