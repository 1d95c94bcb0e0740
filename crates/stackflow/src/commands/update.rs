use super::Context;
use crate::console::{ConsolePrompter, ConsoleReporter};
use colored::Colorize;
use stackflow_cloud::ControlPlane;
use stackflow_cloud_aws::LambdaCatalog;
use stackflow_lifecycle::{
    AssumeYes, Direction, LifecycleError, Prompter, UpdateEngine, UpdateOptions, UpdateOutcome,
    UpdateStatus,
};

pub struct UpdateArgs {
    pub stack: Option<String>,
    pub tag: Option<String>,
    pub force: bool,
    pub release_candidates: bool,
    pub provider: Option<String>,
    pub yes: bool,
}

pub async fn handle(ctx: &Context, direction: Direction, args: UpdateArgs) -> anyhow::Result<()> {
    let stack = ctx.stack(args.stack)?;
    let options = UpdateOptions {
        tag: args.tag,
        force: args.force,
        show_release_candidates: args.release_candidates,
        provider: args.provider,
        ..match direction {
            Direction::Update => UpdateOptions::update(&stack),
            Direction::Rollback => UpdateOptions::rollback(&stack),
        }
    };
    options.validate()?;

    println!(
        "{}",
        format!("Checking {} candidates for {}...", direction, stack).yellow()
    );

    let control_plane = ctx.control_plane().await?;
    let descriptor = control_plane
        .describe_stack(&stack)
        .await
        .map_err(LifecycleError::from)?;
    let catalog =
        LambdaCatalog::for_stack(ctx.cli.clone(), &descriptor).map_err(LifecycleError::from)?;

    let prompter: Box<dyn Prompter> = if args.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(ConsolePrompter)
    };
    let engine = UpdateEngine::new(&control_plane, &catalog, prompter.as_ref(), &ConsoleReporter);
    let outcome = engine.run(&options).await?;

    print_outcome(&stack, &outcome);
    Ok(())
}

fn print_outcome(stack: &str, outcome: &UpdateOutcome) {
    println!();
    match outcome.status {
        UpdateStatus::Applied => {
            for transition in &outcome.transitions {
                println!("  • transition {}", transition.cyan());
            }
            println!(
                "{}",
                format!(
                    "✓ {} moved from {} to {}",
                    stack,
                    outcome.from,
                    outcome.to.as_deref().unwrap_or("?")
                )
                .green()
                .bold()
            );
        }
        UpdateStatus::UpToDate => {
            println!("{}", format!("✓ {} is already up to date", stack).green());
        }
        UpdateStatus::NothingAvailable => {
            println!(
                "{}",
                format!("No {} available for {} ({})", outcome.direction, stack, outcome.from)
                    .yellow()
            );
        }
    }
}
