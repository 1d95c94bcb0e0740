//! Bucket snapshots through the `s3-pit-restore` tool
//!
//! S3 has no native point-in-time restore; `s3-pit-restore` replays object
//! versions as they were at a given instant into another bucket.

use crate::awscli::AwsCli;
use crate::error::parse_cli_error;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use stackflow_cloud::{CloudError, SnapshotCopier};
use std::process::Stdio;
use tokio::process::Command;

pub const PIT_RESTORE_TOOL: &str = "s3-pit-restore";
pub const PIT_RESTORE_INSTALL_HINT: &str = "pip install s3-pit-restore";

/// Bucket copier driving `s3-pit-restore`
pub struct PitRestoreCopier {
    cli: AwsCli,
}

impl PitRestoreCopier {
    /// Reuse the region and profile of the control plane's CLI
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    fn tool_missing() -> CloudError {
        CloudError::ToolNotFound {
            tool: PIT_RESTORE_TOOL.to_string(),
            install_hint: PIT_RESTORE_INSTALL_HINT.to_string(),
        }
    }
}

/// Arguments for one bucket copy; the destination may be given as `s3://name`
pub fn copy_args(source_bucket: &str, destination_uri: &str, point_in_time: DateTime<Utc>) -> Vec<String> {
    let destination = destination_uri
        .strip_prefix("s3://")
        .unwrap_or(destination_uri)
        .trim_end_matches('/');
    vec![
        "-b".to_string(),
        source_bucket.to_string(),
        "-B".to_string(),
        destination.to_string(),
        "-t".to_string(),
        point_in_time.to_rfc3339_opts(SecondsFormat::Secs, true),
    ]
}

#[async_trait]
impl SnapshotCopier for PitRestoreCopier {
    async fn check_available(&self) -> stackflow_cloud::Result<()> {
        let which = Command::new("which").arg(PIT_RESTORE_TOOL).output().await?;
        if !which.status.success() {
            return Err(Self::tool_missing());
        }
        Ok(())
    }

    async fn copy_at(
        &self,
        source_bucket: &str,
        destination_uri: &str,
        point_in_time: DateTime<Utc>,
    ) -> stackflow_cloud::Result<()> {
        let args = copy_args(source_bucket, destination_uri, point_in_time);

        let mut cmd = Command::new(PIT_RESTORE_TOOL);
        cmd.args(&args);
        // the tool reads credentials the way boto does
        if let Some(profile) = self.cli.profile() {
            cmd.env("AWS_PROFILE", profile);
        }
        if let Some(region) = self.cli.region() {
            cmd.env("AWS_DEFAULT_REGION", region);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", PIT_RESTORE_TOOL, args.join(" "));

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Self::tool_missing()),
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse_cli_error(&stderr).into());
        }

        tracing::info!(source = %source_bucket, destination = %destination_uri, "bucket copied");
        Ok(())
    }
}
