//! Deletion script for buckets too big to empty synchronously

use crate::error::Result;
use chrono::Local;
use std::path::{Path, PathBuf};

pub fn script_file_name(stack: &str) -> String {
    format!("delete-{}-buckets.sh", stack)
}

fn shell_quote(value: &str) -> String {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':'));
    if safe && !value.is_empty() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

pub fn render_deletion_script(stack: &str, buckets: &[String], profile: Option<&str>) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "# Deletes buckets left behind by stack {}.\n# Run once their lifecycle rule has expired every object (about a day).\n",
        stack
    ));

    for bucket in buckets {
        let mut line = format!("aws s3api delete-bucket --bucket {}", shell_quote(bucket));
        if let Some(profile) = profile {
            line.push_str(&format!(" --profile {}", shell_quote(profile)));
        }
        script.push_str(&line);
        script.push('\n');
    }
    script
}

/// First free path: plain name, then a timestamped one, then `-<n>`
fn available_path(dir: &Path, stack: &str) -> PathBuf {
    let plain = dir.join(script_file_name(stack));
    if !plain.exists() {
        return plain;
    }

    let stem = format!(
        "delete-{}-buckets-{}",
        stack,
        Local::now().format("%Y%m%d%H%M%S")
    );
    let stamped = dir.join(format!("{}.sh", stem));
    if !stamped.exists() {
        return stamped;
    }

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{}-{}.sh", stem, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Write an executable deletion script into `dir`, never overwriting one
pub fn write_deletion_script(
    dir: &Path,
    stack: &str,
    buckets: &[String],
    profile: Option<&str>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = available_path(dir, stack);
    std::fs::write(&path, render_deletion_script(stack, buckets, profile))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    tracing::info!(path = %path.display(), buckets = buckets.len(), "Wrote bucket deletion script");
    Ok(path)
}
