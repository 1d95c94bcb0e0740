use super::Context;
use crate::console::{ConsolePrompter, ConsoleReporter};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::{Value, json};
use stackflow_cloud::StackParameter;
use stackflow_cloud_aws::PitRestoreCopier;
use stackflow_lifecycle::prompt::require;
use stackflow_lifecycle::{LaunchOptions, RestoreEngine, RestoreOptions, RestorePlan, RestoreResult};
use std::path::PathBuf;

pub struct RestoreArgs {
    pub source: String,
    pub date: DateTime<Utc>,
    pub output: Option<PathBuf>,
    pub params: Vec<(String, String)>,
    pub launch: Option<String>,
    pub template_url: Option<String>,
    pub protect: bool,
    pub yes: bool,
}

/// Parse a `--date` value
pub fn parse_point_in_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp like 2026-10-01T12:00:00Z ({})", e))
}

/// Parse a `--param KEY=VALUE` value
pub fn parse_key_val(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", value))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {:?}", value));
    }
    Ok((key.trim().to_string(), val.to_string()))
}

pub async fn handle(ctx: &Context, args: RestoreArgs) -> anyhow::Result<()> {
    let mut options = RestoreOptions::new(&args.source, args.date);
    options.overrides = args
        .params
        .into_iter()
        .map(|(key, value)| StackParameter::new(key, value))
        .collect();
    options.launch = match (args.launch, args.template_url) {
        (Some(stack_name), Some(template_url)) => Some(LaunchOptions {
            stack_name,
            template_url,
            termination_protection: args.protect,
        }),
        _ => None,
    };
    options.validate()?;

    println!(
        "{}",
        format!(
            "Planning restore of {} as of {}...",
            options.source_stack,
            options.point_in_time.to_rfc3339()
        )
        .yellow()
    );

    let control_plane = ctx.control_plane().await?;
    let copier = PitRestoreCopier::new(ctx.cli.clone());
    let engine = RestoreEngine::new(&control_plane, &copier, &ConsoleReporter);

    let plan = engine.plan(&options).await?;
    print_plan(&plan);

    if !args.yes {
        require(&ConsolePrompter, "Create these resources now?")?;
    }

    let result = engine.execute(&plan, &options).await?;
    print_result(&result);

    if let Some(path) = args.output {
        let document = serde_json::to_string_pretty(&parameters_document(&result.parameters))?;
        std::fs::write(&path, document + "\n")?;
        println!(
            "{}",
            format!("✓ Parameters written to {}", path.display()).green()
        );
    }

    Ok(())
}

fn print_plan(plan: &RestorePlan) {
    println!();
    println!(
        "{}",
        format!("Restore plan ({} resources):", plan.targets().count()).bold()
    );
    for target in plan.targets() {
        println!(
            "  • {} {} → {}",
            target.source.kind,
            target.source.physical_id,
            target.new_name.cyan()
        );
    }
    println!();
}

fn print_result(result: &RestoreResult) {
    println!();
    println!("{}", "Parameters for the restored stack:".bold());
    for parameter in &result.parameters {
        println!(
            "  {} = {}",
            parameter.key.cyan(),
            parameter.value().unwrap_or_default()
        );
    }
    if let Some(operation) = &result.launched {
        println!();
        println!(
            "{}",
            format!("✓ Stack {} is up", operation.stack).green().bold()
        );
    }
}

/// CloudFormation's `ParameterKey`/`ParameterValue` file shape
pub fn parameters_document(parameters: &[StackParameter]) -> Value {
    Value::Array(
        parameters
            .iter()
            .map(|p| json!({ "ParameterKey": p.key, "ParameterValue": p.value().unwrap_or_default() }))
            .collect(),
    )
}
