use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use dualprompt::config::{ConfigLoader, ConfigOverrides, OptimizerConfig, Patience};
use dualprompt::optimizer::{AbortSignal, OptimizationController, RunReport, Termination};
use dualprompt::providers::{AnthropicProvider, Collaborators, ScriptedProvider};
use dualprompt::setup;
use dualprompt::storage::{ArtifactStore, RunInputs, SavedArtifacts, SnapshotObserver};

const EXIT_FAILED: i32 = 1;
const EXIT_ABORTED: i32 = 130;

const DEMO_TASK: &str = "Analyze the following quarterly sales data and give three \
recommendations: Q1 revenue $1.2M, Q2 revenue $1.05M, Q3 revenue $1.4M. \
Customer churn rose from 4% to 7% over the same period.";
const DEMO_SYSTEM_PROMPT: &str = "You are a helpful business analyst.";
const DEMO_CRITIQUE_PROMPT: &str = "You are an expert evaluator of business analysis. \
Score the response from 1 to 100 for accuracy, depth of insight and actionability. \
Reply with JSON: {\"score\": <number>, \"critique\": \"<feedback>\"}";

/// Co-evolve a system prompt and the critique prompt that grades it
#[derive(Parser)]
#[command(name = "dualprompt")]
#[command(about = "Dual prompt optimization: improve a system prompt and its critique prompt together", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize against the Anthropic API (default command)
    Run(RunArgs),
    /// Check configuration, input files and API key before a run
    Check {
        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Also send one tiny request to the API
        #[arg(long)]
        ping: bool,
    },
    /// Run the loop offline against scripted scores
    Simulate {
        #[command(flatten)]
        run: RunArgs,

        /// Scores handed out by the critic, in order; the last one repeats
        #[arg(long, value_delimiter = ',', default_values_t = [45, 72, 91])]
        scores: Vec<u32>,

        /// Meta scores handed out by the meta-critic, in order
        #[arg(long, value_delimiter = ',', default_values_t = [78, 85])]
        meta_scores: Vec<u32>,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Path to configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Task description file
    #[arg(long)]
    task: Option<PathBuf>,

    /// Initial system prompt file
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// Initial critique prompt file
    #[arg(long)]
    critique_prompt: Option<PathBuf>,

    /// Stop once a score reaches this value (1-100)
    #[arg(long)]
    target: Option<u32>,

    /// Maximum number of iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Meta-evaluate the critique prompt every N iterations
    #[arg(long)]
    critique_every: Option<u32>,

    /// Stop after N iterations without improvement, or "disabled"
    #[arg(long)]
    patience: Option<Patience>,

    /// Directory for run artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            target_score: self.target,
            max_iterations: self.max_iterations,
            improve_critique_every: self.critique_every,
            early_stop_patience: self.patience,
            task_file: self.task.clone(),
            system_prompt_file: self.system_prompt.clone(),
            critique_prompt_file: self.critique_prompt.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

impl Commands {
    fn config_path(&self) -> Option<PathBuf> {
        match self {
            Commands::Run(run) | Commands::Simulate { run, .. } => run.config.clone(),
            Commands::Check { config, .. } => config.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Run(RunArgs::default()));

    // The configured log level applies only without -v
    let loaded = ConfigLoader::load(command.config_path().as_deref());
    let configured_level = loaded.as_ref().ok().map(|c| c.log_level.clone());

    let log_level = match cli.verbose {
        0 => configured_level.unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,hyper=debug,reqwest=debug".to_string(), // -vvv shows everything including dependencies
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("dualprompt started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match command {
        Commands::Run(args) => run_command(args, loaded).await,
        Commands::Check { ping, .. } => check_command(loaded, ping).await,
        Commands::Simulate {
            run,
            scores,
            meta_scores,
        } => simulate_command(run, scores, meta_scores, loaded).await,
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn prepare_config(
    args: &RunArgs,
    loaded: dualprompt::Result<OptimizerConfig>,
) -> anyhow::Result<OptimizerConfig> {
    let mut config = loaded.context("Failed to load configuration")?;
    config.apply_overrides(&args.overrides());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_command(
    args: RunArgs,
    loaded: dualprompt::Result<OptimizerConfig>,
) -> anyhow::Result<i32> {
    let config = prepare_config(&args, loaded)?;
    let inputs = RunInputs::read(&config.inputs).context("Failed to read input files")?;
    let provider =
        Arc::new(AnthropicProvider::new(&config).context("Failed to create Anthropic client")?);

    info!(
        "🎯 Optimizing toward {} with up to {} iterations",
        config.target_score, config.max_iterations
    );
    execute(config, Collaborators::single(provider), inputs).await
}

async fn simulate_command(
    args: RunArgs,
    scores: Vec<u32>,
    meta_scores: Vec<u32>,
    loaded: dualprompt::Result<OptimizerConfig>,
) -> anyhow::Result<i32> {
    let config = prepare_config(&args, loaded)?;
    let inputs = match RunInputs::read(&config.inputs) {
        Ok(inputs) => inputs,
        Err(e) => {
            info!("Using built-in demo inputs ({e})");
            RunInputs {
                task: DEMO_TASK.to_string(),
                system_prompt: DEMO_SYSTEM_PROMPT.to_string(),
                critique_prompt: DEMO_CRITIQUE_PROMPT.to_string(),
            }
        }
    };

    let provider = Arc::new(
        ScriptedProvider::builder()
            .scores(scores)
            .meta_scores(meta_scores)
            .weights(config.meta_evaluation_weights)
            .build(),
    );

    info!("🧪 Simulating with scripted scores, no API calls are made");
    execute(config, Collaborators::single(provider), inputs).await
}

async fn execute(
    config: OptimizerConfig,
    collaborators: Collaborators,
    inputs: RunInputs,
) -> anyhow::Result<i32> {
    let store = ArtifactStore::from_settings(&config.output);
    let abort = AbortSignal::new();
    abort
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;

    let save_intermediate = config.output.save_intermediate;
    let mut controller = OptimizationController::new(config, collaborators)?.with_abort_signal(abort);
    if save_intermediate {
        controller = controller.with_observer(Box::new(SnapshotObserver::new(store.clone())));
    }

    let report = controller
        .run(inputs.task, inputs.system_prompt, inputs.critique_prompt)
        .await;

    let saved = store
        .save_report(&report)
        .context("Failed to save run artifacts")?;
    print_outcome(&report, &saved);

    Ok(match report.termination {
        Termination::Completed { .. } => 0,
        Termination::Failed { .. } => EXIT_FAILED,
        Termination::Aborted { .. } => EXIT_ABORTED,
    })
}

fn print_outcome(report: &RunReport, saved: &SavedArtifacts) {
    let summary = &report.summary;
    let score = |s: Option<u32>| s.map_or_else(|| "-".to_string(), |s| s.to_string());

    println!();
    if report.is_partial() {
        println!("⚠️  {}", report.termination.describe());
    } else {
        println!("✅ {}", report.termination.describe());
    }
    println!(
        "📊 Final score {} / best {} / target {}",
        score(summary.final_score),
        score(summary.best_score),
        summary.target_score
    );
    println!(
        "🔄 {} iterations, {} system refinements, {} meta-evaluations, {} critique refinements",
        summary.iterations,
        summary.system_refinements,
        summary.meta_evaluations,
        summary.critique_refinements
    );
    println!("💾 Artifacts:");
    for path in saved.all() {
        println!("   {}", path.display());
    }
}

async fn check_command(
    loaded: dualprompt::Result<OptimizerConfig>,
    ping: bool,
) -> anyhow::Result<i32> {
    let report = setup::run_checks(loaded, ping).await;
    print!("{}", report.render());
    Ok(if report.is_ready() { 0 } else { EXIT_FAILED })
}
