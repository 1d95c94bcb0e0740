pub mod destroy;
pub mod restore;
pub mod update;

use stackflow_cloud::CloudError;
use stackflow_cloud_aws::{AwsCli, AwsControlPlane};
use stackflow_config::Settings;
use stackflow_lifecycle::LifecycleError;

/// Settings and credentials shared by every command
pub struct Context {
    pub cli: AwsCli,
    pub settings: Settings,
}

impl Context {
    /// Flags (and their env fallbacks) win over the config file
    pub fn new(settings: Settings, region: Option<String>, profile: Option<String>) -> Self {
        let region = region.or_else(|| settings.region.clone());
        let profile = profile.or_else(|| settings.profile.clone());
        tracing::debug!(
            region = region.as_deref().unwrap_or("<aws default>"),
            profile = profile.as_deref().unwrap_or("<aws default>"),
            "Resolved AWS context"
        );
        Self {
            cli: AwsCli::new(region, profile),
            settings,
        }
    }

    pub fn stack(&self, flag: Option<String>) -> Result<String, LifecycleError> {
        flag.or_else(|| self.settings.stack.clone()).ok_or_else(|| {
            LifecycleError::InvalidInput(
                "no stack given; pass --stack, set STACKFLOW_STACK or add `stack:` to the config file"
                    .to_string(),
            )
        })
    }

    pub async fn control_plane(&self) -> Result<AwsControlPlane, LifecycleError> {
        self.cli
            .check_installed()
            .await
            .map_err(|e| LifecycleError::from(CloudError::from(e)))?;
        Ok(AwsControlPlane::new(self.cli.clone()))
    }
}
