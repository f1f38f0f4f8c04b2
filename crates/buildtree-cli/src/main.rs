//! buildtree - composite build coordinator CLI
//!
//! The `buildtree` command executes tasks across a composite build: a
//! root build plus the included builds declared in `buildtree.json`.
//!
//! ## Commands
//!
//! - `run`: Execute tasks, scheduling included-build work as needed
//! - `tasks`: List every build's tasks
//! - `resolve`: Show which included build substitutes a module

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use buildtree_core::{
    CompositeSettings, DefaultIncludedBuildFactory, IncludedBuildControllers,
    IncludedBuildRegistry, IncludedBuildTaskGraph, LauncherFactory, ModuleCoordinate, NestedBuild,
    ResolvedTask, TaskOutcome, TaskPath, TaskReferenceResolver, WorkerLeaseService,
};

#[derive(Parser)]
#[command(name = "buildtree")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Composite build coordinator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute tasks across the composite
    Run {
        /// Task paths to run (`:assemble`, `:lib:jar`, `lib:jar`)
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Path to the composite settings file
        #[arg(short, long, default_value = "buildtree.json")]
        settings: PathBuf,

        /// Maximum number of concurrently executing builds
        #[arg(long, default_value = "4")]
        max_workers: usize,
    },

    /// List the tasks of every build in the composite
    Tasks {
        /// Path to the composite settings file
        #[arg(short, long, default_value = "buildtree.json")]
        settings: PathBuf,
    },

    /// Show which included build substitutes a module coordinate
    Resolve {
        /// Module coordinate (`group:name`)
        module: String,

        /// Path to the composite settings file
        #[arg(short, long, default_value = "buildtree.json")]
        settings: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildtree_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            tasks,
            settings,
            max_workers,
        } => cmd_run(&settings, &tasks, max_workers).await,
        Commands::Tasks { settings } => cmd_tasks(&settings),
        Commands::Resolve { module, settings } => cmd_resolve(&settings, &module).await,
    }
}

/// Build the registry for a loaded settings file.
async fn load_registry(
    settings: &CompositeSettings,
) -> Result<(Arc<IncludedBuildRegistry>, Arc<dyn LauncherFactory>)> {
    let launcher_factory: Arc<dyn LauncherFactory> = settings
        .launcher_factory()
        .context("Failed to construct launchers from settings")?;

    let mut registry = IncludedBuildRegistry::new(Arc::new(DefaultIncludedBuildFactory::new(
        Arc::clone(&launcher_factory),
    )));
    for definition in settings.included_definitions()? {
        registry.register(definition).await?;
    }
    Ok((Arc::new(registry), launcher_factory))
}

/// Execute tasks across the composite
async fn cmd_run(settings_path: &PathBuf, raw_tasks: &[String], max_workers: usize) -> Result<()> {
    let settings = CompositeSettings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {settings_path:?}"))?;
    let (registry, launcher_factory) = load_registry(&settings).await?;
    let resolver = TaskReferenceResolver::new(Arc::clone(&registry));

    let mut root_tasks: Vec<TaskPath> = Vec::new();
    let mut included_refs = Vec::new();
    for raw in raw_tasks {
        match resolver.resolve(raw)? {
            ResolvedTask::Root(task) => root_tasks.push(task),
            ResolvedTask::Included(reference) => included_refs.push(reference),
        }
    }
    info!(
        root = root_tasks.len(),
        included = included_refs.len(),
        "tasks resolved"
    );

    let controllers = Arc::new(IncludedBuildControllers::new(
        Arc::clone(&registry),
        WorkerLeaseService::new(max_workers),
    ));
    let task_graph = IncludedBuildTaskGraph::new(Arc::clone(&controllers));

    for reference in &included_refs {
        let handle = task_graph.locate_task(reference).await?;
        handle.queue();
    }

    controllers.populate_task_graphs().await?;
    controllers.start_task_execution();

    let mut failed = false;
    let completion = controllers.await_completion().await;
    for state in registry.included_builds() {
        let controller = controllers.controller_for(state.build_path())?;
        if let Some(report) = controller.report() {
            print_report(&report);
        }
    }
    if let Err(e) = completion {
        eprintln!("Included builds failed: {e}");
        failed = true;
    }

    if !root_tasks.is_empty() && !failed {
        let definition = Arc::new(settings.root_definition(root_tasks.clone()));
        let nested = NestedBuild::new(definition, launcher_factory);
        let report = nested
            .run(|controller| async move {
                let report = controller.run_tasks(&root_tasks).await?;
                Ok(Some(report))
            })
            .await?;
        if let Some(report) = report {
            print_report(&report);
            failed = failed || !report.success();
        }
    }

    if failed {
        anyhow::bail!("build failed");
    }
    println!("BUILD SUCCESSFUL");
    Ok(())
}

fn print_report(report: &buildtree_core::TaskExecutionReport) {
    let build = if report.build.is_root() {
        "root build".to_string()
    } else {
        format!("build {}", report.build)
    };
    println!("{build} ({} ms)", report.duration_ms);
    for result in &report.results {
        let status = match &result.outcome {
            TaskOutcome::Succeeded { .. } => "ok",
            TaskOutcome::Failed { .. } => "FAILED",
            TaskOutcome::Skipped => "skipped",
        };
        println!("  {} {}", result.task, status);
        if let TaskOutcome::Failed { message } = &result.outcome {
            println!("    {message}");
        }
    }
}

/// List the tasks of every build in the composite
fn cmd_tasks(settings_path: &PathBuf) -> Result<()> {
    let settings = CompositeSettings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {settings_path:?}"))?;

    println!("root build '{}'", settings.root.name);
    for task in &settings.root.tasks {
        println!("  {}", task.name);
    }
    for include in &settings.includes {
        println!("included build '{}' ({})", include.name, include.dir.display());
        for task in &include.tasks {
            if task.produces.is_empty() {
                println!("  :{}:{}", include.name, task.name.trim_start_matches(':'));
            } else {
                println!(
                    "  :{}:{} -> {} artifact(s)",
                    include.name,
                    task.name.trim_start_matches(':'),
                    task.produces.len()
                );
            }
        }
    }
    Ok(())
}

/// Show which included build substitutes a module coordinate
async fn cmd_resolve(settings_path: &PathBuf, module: &str) -> Result<()> {
    let settings = CompositeSettings::load(settings_path)
        .with_context(|| format!("Failed to load settings from {settings_path:?}"))?;
    let (registry, _) = load_registry(&settings).await?;

    let coordinate = ModuleCoordinate::from_str(module)
        .with_context(|| format!("'{module}' is not a group:name coordinate"))?;

    match registry.substitution_for(&coordinate) {
        Some(build) => println!("{coordinate} -> {build}"),
        None => println!("{coordinate} -> external (no substitution)"),
    }
    Ok(())
}
