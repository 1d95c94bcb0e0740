use super::Context;
use crate::console::{ConsolePrompter, ConsoleReporter};
use colored::Colorize;
use stackflow_cloud::CloudResource;
use stackflow_lifecycle::{DestroyEngine, DestroyOptions, TeardownReport};
use std::path::PathBuf;

pub async fn handle(
    ctx: &Context,
    stack: Option<String>,
    script_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let stack = ctx.stack(stack)?;

    let mut options = DestroyOptions::new(&stack);
    if let Some(dir) = script_dir.or_else(|| ctx.settings.script_dir.clone()) {
        options.script_dir = dir;
    }
    if let Some(suffix) = &ctx.settings.companion_stack_suffix {
        options.companion_suffix = suffix.clone();
    }
    options.profile = ctx.cli.profile().map(str::to_string);
    options.validate()?;

    println!("{}", format!("Preparing to destroy {}...", stack).red().bold());

    let control_plane = ctx.control_plane().await?;
    let engine = DestroyEngine::new(&control_plane, &ConsolePrompter, &ConsoleReporter);
    let report = engine.run(&options).await?;

    print_report(&report);
    Ok(())
}

fn print_section(title: &str, resources: &[CloudResource]) {
    if resources.is_empty() {
        return;
    }
    println!("{}", format!("{} ({}):", title, resources.len()).bold());
    for resource in resources {
        println!("  • {}", resource);
    }
}

fn print_report(report: &TeardownReport) {
    println!();
    if report.stack_deleted {
        println!("{}", format!("✓ Stack {} deleted", report.stack).green().bold());
    } else {
        println!("{}", format!("Stack {} was already gone", report.stack).yellow());
    }
    if report.companion_deleted {
        println!("{}", "✓ Companion services stack deleted".green());
    }

    print_section("Deleted", &report.deleted);
    print_section("Retained", &report.retained);
    print_section("Already gone", &report.already_gone);
    print_section("Expiring (delete once empty)", &report.deferred);

    if let Some(script) = &report.script {
        println!();
        println!(
            "{} once the buckets above are empty (about a day):",
            "Run".bold()
        );
        println!("  sh {}", script.display().to_string().cyan());
    }
}
