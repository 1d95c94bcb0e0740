//! Resource Enumerator: output-exposed resources of a stack

use crate::error::Result;
use futures_util::future::join_all;
use stackflow_cloud::{CloudResource, ControlPlane, ResourceKind};

/// Bucket that stages templates; never user data
pub const DEPLOYMENT_BUCKET: &str = "DeploymentBucket";
/// Access-log bucket; not worth restoring
pub const LOGS_BUCKET: &str = "LogsBucket";
pub const OBJECTS_BUCKET: &str = "ObjectsBucket";

/// Buckets assumed too large to empty synchronously
pub const BIG_BUCKETS: &[&str] = &[LOGS_BUCKET, OBJECTS_BUCKET];

pub fn is_big_bucket(resource: &CloudResource) -> bool {
    resource.kind == ResourceKind::Bucket && BIG_BUCKETS.contains(&resource.logical_name.as_str())
}

/// Stable sort: buckets, tables, keys, log groups, other
pub fn sort_by_kind(resources: &mut [CloudResource]) {
    resources.sort_by_key(|r| r.kind);
}

pub struct ResourceEnumerator<'a> {
    control_plane: &'a dyn ControlPlane,
}

impl<'a> ResourceEnumerator<'a> {
    pub fn new(control_plane: &'a dyn ControlPlane) -> Self {
        Self { control_plane }
    }

    /// Every classified resource output of the stack
    pub async fn output_resources(&self, stack: &str) -> Result<Vec<CloudResource>> {
        let resources = self.control_plane.list_stack_output_resources(stack).await?;
        tracing::debug!(stack, count = resources.len(), "Enumerated output resources");
        Ok(resources)
    }

    /// Drop resources whose backing object is gone (outputs can be stale)
    pub async fn existing(&self, resources: Vec<CloudResource>) -> Result<Vec<CloudResource>> {
        let checks = join_all(
            resources
                .iter()
                .map(|r| self.control_plane.resource_exists(r)),
        )
        .await;

        let mut existing = Vec::with_capacity(resources.len());
        for (resource, exists) in resources.into_iter().zip(checks) {
            match exists {
                Ok(true) => existing.push(resource),
                Ok(false) => {
                    tracing::debug!(resource = %resource, "Resource no longer exists");
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(resource = %resource, "Resource no longer exists");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existing)
    }

    /// Resources a stack deletion would leak, sorted by type, still alive
    pub async fn teardown_candidates(&self, stack: &str) -> Result<Vec<CloudResource>> {
        let mut resources: Vec<CloudResource> = self
            .output_resources(stack)
            .await?
            .into_iter()
            .filter(|r| r.logical_name != DEPLOYMENT_BUCKET)
            .collect();
        sort_by_kind(&mut resources);
        self.existing(resources).await
    }
}
