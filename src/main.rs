use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pipeline_forge::config::{self, Config};
use pipeline_forge::driver::Driver;
use pipeline_forge::models::{Phase, PipelineState};
use pipeline_forge::store;

#[derive(Parser)]
#[command(name = "pipeline-forge")]
#[command(version, about = "Automated PRD-to-multi-service build pipeline orchestrator")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory pipeline artifacts are written to.
    #[arg(long, global = true, default_value = "./forge-output")]
    output_dir: PathBuf,

    /// Review depth for builders and fix passes.
    #[arg(long, global = true, value_parser = ["standard", "thorough", "quick"])]
    depth: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new pipeline project, writing default config.
    Init,
    /// Run the architect phase only, writing `service_map.json`.
    Plan {
        /// Path to the PRD file. Auto-discovered if omitted.
        #[arg(long)]
        prd: Option<PathBuf>,
    },
    /// Run the architect through builders phases.
    Build {
        #[arg(long)]
        prd: Option<PathBuf>,
        /// Explicit builder context block, bypassing graph-RAG resolution.
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Run the integration harness against already-built services.
    Integrate,
    /// Run the quality gate against already-built services.
    Verify,
    /// Run the full pipeline end to end.
    Run {
        #[arg(long)]
        prd: Option<PathBuf>,
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Print the current pipeline state.
    Status,
    /// Resume a pipeline from its persisted state.
    Resume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.output_dir, cli.verbose)?;

    let config = Config::resolve(
        cli.output_dir.clone(),
        cli.config.clone(),
        cli.depth.clone(),
        cli.verbose,
    )?;
    config.ensure_directories()?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Plan { prd } => cmd_plan(config, prd).await,
        Commands::Build { prd, context_file } => cmd_build(config, prd, context_file).await,
        Commands::Integrate => cmd_integrate(config).await,
        Commands::Verify => cmd_verify(config).await,
        Commands::Run { prd, context_file } => cmd_run(config, prd, context_file).await,
        Commands::Status => cmd_status(&config),
        Commands::Resume => cmd_resume(config).await,
    }
}

fn init_logging(output_dir: &std::path::Path, verbose: bool) -> Result<()> {
    let log_dir = output_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "pipeline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("FORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    Ok(())
}

fn cmd_init(config: &Config) -> Result<()> {
    let default_toml = "budget_limit = 50.0\ndepth = \"standard\"\nmax_concurrent_builders = 3\nmax_fix_passes = 5\n";
    std::fs::write("forge.toml", default_toml).context("failed to write forge.toml")?;
    println!("Initialized pipeline project at {}", config.output_dir.display());
    println!("Wrote forge.toml with default settings.");
    Ok(())
}

fn load_prd(prd: Option<PathBuf>) -> Result<(String, PathBuf)> {
    let path = config::find_prd_file(prd, &std::env::current_dir()?)?;
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read PRD file at {}", path.display()))?;
    Ok((contents, path))
}

async fn cmd_plan(config: Config, prd: Option<PathBuf>) -> Result<()> {
    let (prd_text, _path) = load_prd(prd)?;
    let mut driver = Driver::new(config.clone(), prd_text, None);
    let state = driver.run_until(Phase::ContractsRegistering).await?;
    println!("Planned {} services:", state.services.len());
    for service in &state.services {
        println!("  - {} (depends on: {:?})", service.name, service.depends_on);
    }
    Ok(())
}

async fn cmd_build(config: Config, prd: Option<PathBuf>, context_file: Option<PathBuf>) -> Result<()> {
    let (prd_text, _path) = load_prd(prd)?;
    let driver = Driver::new(config, prd_text, context_file);
    let state = driver.run_until(Phase::BuildersComplete).await?;
    let succeeded = state.builder_results.values().filter(|r| r.success).count();
    println!("Builders finished: {}/{} succeeded", succeeded, state.builder_results.len());
    Ok(())
}

async fn cmd_integrate(config: Config) -> Result<()> {
    let state_path = config.state_path();
    let state = load_existing_state(&config)?;
    let mut driver = Driver::resume(config, state, String::new());
    driver.force_phase(Phase::BuildersComplete);
    let state = driver.run_until(Phase::QualityGate).await?;
    fail_if_terminally_failed(&state, &state_path)?;
    let report = state.integration_reports.last();
    match report {
        Some(r) => println!("Integration {}", if r.all_passed() { "PASSED" } else { "FAILED" }),
        None => println!("No integration report produced"),
    }
    Ok(())
}

async fn cmd_verify(config: Config) -> Result<()> {
    let state_path = config.state_path();
    let state = load_existing_state(&config)?;
    let mut driver = Driver::resume(config, state, String::new());
    driver.force_phase(Phase::QualityGate);
    let state = driver.run_until(Phase::Complete).await?;
    fail_if_terminally_failed(&state, &state_path)?;
    let report = state.gate_reports.last();
    match report {
        Some(r) => println!("Quality gate overall: {:?}", r.overall),
        None => println!("No quality gate report produced"),
    }
    Ok(())
}

async fn cmd_run(config: Config, prd: Option<PathBuf>, context_file: Option<PathBuf>) -> Result<()> {
    let state_path = config.state_path();
    let (prd_text, _path) = load_prd(prd)?;
    let driver = Driver::new(config, prd_text, context_file);
    let state = driver.run().await?;
    fail_if_terminally_failed(&state, &state_path)?;
    println!("Pipeline finished in phase: {}", state.phase);
    Ok(())
}

/// The driver loop itself never returns `Err` just because the state
/// machine landed on `failed` (that's a normal terminal phase, not a Rust
/// error) — so CLI commands that should exit non-zero on a failed run check
/// for it explicitly here and point the operator at the persisted state.
fn fail_if_terminally_failed(state: &PipelineState, state_path: &std::path::Path) -> Result<()> {
    if state.phase == Phase::Failed {
        bail!(
            "pipeline failed: {}\nstate persisted at {}",
            state.interrupt_reason.as_deref().unwrap_or("see quality/integration reports"),
            state_path.display()
        );
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let state: PipelineState = store::load(&config.state_path())
        .context("no pipeline state found; run `init`/`plan`/`build` first")?;
    println!("Phase: {}", state.phase);
    println!("Services: {}", state.services.len());
    println!("Cost: {:.2} / {:.2}", state.cost_total, state.budget_limit);
    println!("Fix passes run: {}", state.fix_pass_history.len());
    Ok(())
}

async fn cmd_resume(config: Config) -> Result<()> {
    let state_path = config.state_path();
    let state = load_existing_state(&config)?;
    if matches!(state.phase, Phase::Complete | Phase::Failed) {
        bail!("pipeline already finished in phase {}", state.phase);
    }
    info!(phase = %state.phase, "resuming pipeline");
    let driver = Driver::resume(config, state, String::new());
    let state = driver.run().await?;
    fail_if_terminally_failed(&state, &state_path)?;
    println!("Pipeline finished in phase: {}", state.phase);
    Ok(())
}

fn load_existing_state(config: &Config) -> Result<PipelineState> {
    let state: PipelineState = store::load(&config.state_path())
        .context("no pipeline state found to resume from")?;
    store::check_schema_version(state.schema_version)?;
    Ok(state)
}
</content>
