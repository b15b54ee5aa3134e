//! Converge CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use converge::cli::{Cli, Commands, OutputFormatter, StateCommands, WorkflowCommands};
use converge::config::{ConfigParser, ConfigValidator, Project, YamlGraphSource, find_config_file};
use converge::error::{ConfigError, Result};
use converge::reconciler::{ApplyOutcome, Reconciler, RunContext};
use converge::resource::ScopeFilter;
use converge::schema::SchemaRegistry;
use converge::state::{STATE_DIR, StateStore, generate_holder_id};
use converge::ui::ConsoleUi;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs a command. `Ok(false)` means it completed but reported failures.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| true),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter).await,
        Commands::Plan => cmd_plan(config, &cli.scope, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config, &cli.scope, yes, false, &formatter).await,
        Commands::Destroy { yes } => cmd_apply(config, &cli.scope, yes, true, &formatter).await,
        Commands::Refresh => cmd_refresh(config, &cli.scope, &formatter).await,
        Commands::Workflow { command } => cmd_workflow(config, command, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new project in: {}", path.display());

    let config_path = path.join("converge.yaml");
    let resources_path = path.join("network.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Project file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/converge.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&resources_path, include_str!("../templates/network.yaml"))?;
    eprintln!("Created: {}", resources_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# converge")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Declare resource types in converge.yaml");
    eprintln!("  2. Describe resources in network.yaml");
    eprintln!("  3. Run 'converge validate' to check the project");
    eprintln!("  4. Run 'converge plan' to see what would change");
    eprintln!("  5. Run 'converge apply' to converge");

    Ok(())
}

/// Validate the project file and every resource file.
async fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating project: {}", config_file.display());

    let root = config_file.parent().unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(root);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));
    if !result.is_valid() {
        return Ok(false);
    }

    let project = Project::new(root, config);
    let registry = project.registry()?;
    let graph = project.graph_source().load().await?;
    for resource in graph.iter() {
        registry.check_resource(resource)?;
        registry.validate_resource(resource)?;
    }

    eprintln!("\nProject summary:");
    eprintln!("  Project: {}", project.config().project.name);
    eprintln!("  Environment: {}", project.config().project.environment);
    eprintln!("  Types: {}", project.config().types.len());
    eprintln!("  Resources: {}", graph.len());
    eprintln!("  Workflows: {}", project.config().workflows.len());

    Ok(true)
}

/// Show the plan.
async fn cmd_plan(config_path: Option<&PathBuf>, scope: &[String], formatter: &OutputFormatter) -> Result<bool> {
    let project = load_project(config_path)?;
    let registry = project.registry()?;
    let source = project.graph_source();
    let store = project.state_store();
    let ui = ConsoleUi::new(false);

    let ctx = run_context(&project, &registry, &source, &ui, resolve_scope(&project, scope));
    let plan = Reconciler::new(ctx, &store).plan().await?;
    println!("{}", formatter.format_plan(&plan));
    Ok(true)
}

/// Apply the plan, or destroy everything in scope.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    scope: &[String],
    yes: bool,
    destroy: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let project = load_project(config_path)?;
    let registry = project.registry()?;
    let source = project.graph_source();
    let store = project.state_store();
    let ui = ConsoleUi::new(yes);

    let ctx = run_context(&project, &registry, &source, &ui, resolve_scope(&project, scope));
    let reconciler = Reconciler::new(ctx, &store);
    let outcome = if destroy {
        reconciler.destroy().await?
    } else {
        reconciler.apply().await?
    };

    println!("{}", formatter.format_apply(&outcome));
    Ok(match &outcome {
        ApplyOutcome::Applied { report, .. } => report.is_success(),
        _ => true,
    })
}

/// Refresh state from providers.
async fn cmd_refresh(config_path: Option<&PathBuf>, scope: &[String], formatter: &OutputFormatter) -> Result<bool> {
    let project = load_project(config_path)?;
    let registry = project.registry()?;
    let source = project.graph_source();
    let store = project.state_store();
    let ui = ConsoleUi::new(false);

    let ctx = run_context(&project, &registry, &source, &ui, resolve_scope(&project, scope));
    let report = Reconciler::new(ctx, &store).refresh().await?;
    println!("{}", formatter.format_drift(&report));
    Ok(report.failed.is_empty())
}

/// List or run workflows.
async fn cmd_workflow(
    config_path: Option<&PathBuf>,
    command: WorkflowCommands,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let project = load_project(config_path)?;

    match command {
        WorkflowCommands::List => {
            println!("{}", formatter.format_workflows(&project.config().workflows));
            Ok(true)
        }
        WorkflowCommands::Run { name, yes } => {
            let workflow = project.workflow(&name)?;
            let registry = project.registry()?;
            let source = project.graph_source();
            let store = project.state_store();
            let ui = ConsoleUi::new(yes);

            let ctx = run_context(&project, &registry, &source, &ui, workflow.scope().clone());
            let outcome = Reconciler::new(ctx, &store).run_workflow(&workflow).await?;
            println!("{}", formatter.format_workflow(&name, &outcome));
            Ok(outcome.report.is_success())
        }
    }
}

/// Manage the state store.
async fn cmd_state(config_path: Option<&PathBuf>, command: StateCommands, formatter: &OutputFormatter) -> Result<bool> {
    let project = load_project(config_path)?;
    let store = project.state_store();
    debug!("Using {} state store", store.backend_type());

    match command {
        StateCommands::Show => {
            let state = store.load().await?;
            let lock = store.get_lock_info().await?;
            println!("{}", formatter.format_state(state.as_ref(), lock.as_ref()));
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("{}", formatter.format_lock("Acquired", &lock));
        }
        StateCommands::Unlock { lock_id } => {
            store.release_lock(&lock_id).await?;
            println!("{}", formatter.message("success", &format!("Released lock {lock_id}")));
        }
        StateCommands::ForceUnlock { lock_id } => {
            let lock = store.force_unlock(&lock_id).await?;
            println!("{}", formatter.format_lock("Force-removed", &lock));
        }
    }
    Ok(true)
}

/// Resolves the project file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads and validates the project.
fn load_project(config_path: Option<&PathBuf>) -> Result<Project> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading project from: {}", config_file.display());
    if !config_file.exists() {
        return Err(ConfigError::FileNotFound { path: config_file }.into());
    }
    Project::load(&config_file)
}

/// Context for one cycle of `project`.
fn run_context<'a>(
    project: &'a Project,
    registry: &'a SchemaRegistry,
    source: &'a YamlGraphSource,
    ui: &'a ConsoleUi,
    scope: ScopeFilter,
) -> RunContext<'a> {
    RunContext {
        project: &project.config().project.name,
        environment: &project.config().project.environment,
        registry,
        source,
        ui,
        scope,
        max_parallel: project.max_parallel(),
    }
}

/// `--scope` overrides the project's apply scope.
fn resolve_scope(project: &Project, scope: &[String]) -> ScopeFilter {
    if scope.is_empty() {
        project.scope()
    } else {
        ScopeFilter::files(scope)
    }
}
