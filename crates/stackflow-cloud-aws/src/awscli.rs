//! aws CLI wrapper
//!
//! Runs `aws` subcommands with JSON output and maps failures through
//! [`parse_cli_error`](crate::error::parse_cli_error).

use crate::error::{AwsError, Result, parse_cli_error};
use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::process::Command;

/// aws CLI wrapper
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    region: Option<String>,
    profile: Option<String>,
}

impl AwsCli {
    pub fn new(region: Option<String>, profile: Option<String>) -> Self {
        Self { region, profile }
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Check that the `aws` binary is on PATH
    pub async fn check_installed(&self) -> Result<()> {
        let which = Command::new("which").arg("aws").output().await?;
        if !which.status.success() {
            return Err(AwsError::CliNotFound);
        }
        Ok(())
    }

    /// Global options placed before every subcommand
    fn global_args(&self) -> Vec<String> {
        let mut args = vec![
            "--output".to_string(),
            "json".to_string(),
            "--no-cli-pager".to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Run an aws command and return stdout
    pub async fn run_command<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();

        let mut cmd = Command::new("aws");
        cmd.args(self.global_args());
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: aws {}", args.join(" "));

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AwsError::CliNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse_cli_error(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run an aws command and parse its JSON output
    pub async fn run_json<T: DeserializeOwned, S: AsRef<str>>(&self, args: &[S]) -> Result<T> {
        let output = self.run_command(args).await?;
        parse_output(&output)
    }

    /// Run a command whose output is irrelevant (put-*, delete-*, waiters)
    pub async fn run_quiet<S: AsRef<str>>(&self, args: &[S]) -> Result<()> {
        self.run_command(args).await.map(|_| ())
    }
}

/// Parse CLI output; commands that print nothing count as `null`
pub fn parse_output<T: DeserializeOwned>(output: &str) -> Result<T> {
    let trimmed = output.trim();
    let json = if trimmed.is_empty() { "null" } else { trimmed };
    Ok(serde_json::from_str(json)?)
}
