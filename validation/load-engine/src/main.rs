//! Load engine CLI.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use load_engine::{
    ConcurrentUserSimulator, EngineEvent, EventBus, LoadRunner, LoadTestConfig, Report,
    ReportWriter, ResultsReport, StressController, StressTestConfig, TestConfiguration,
};

/// Progress bar resolution; one unit per mille of the run.
const PROGRESS_UNITS: u64 = 1000;

#[derive(Parser)]
#[command(name = "load-engine")]
#[command(about = "Adaptive load and stress testing for HTTP endpoints", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a linearly ramped constant-rate test
    Run {
        /// Path to test configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Override test duration in seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Override target request rate (req/s)
        #[arg(short, long)]
        rate: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run a virtual-user load test
    Load {
        /// Path to load test configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Override number of concurrent users
        #[arg(short, long)]
        users: Option<usize>,

        /// Override test duration in seconds
        #[arg(short, long)]
        duration: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Step the load up until the target breaks
    Stress {
        /// Path to stress test configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Override the load ceiling (req/s)
        #[arg(short, long)]
        max_load: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List scenario files in a directory
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Console output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Directory for JSON reports
    #[arg(long, default_value = "results", env = "LOAD_ENGINE_REPORT_DIR")]
    report_dir: PathBuf,

    /// Skip writing the JSON report
    #[arg(long)]
    no_report: bool,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON/CSV output on stdout stays parseable
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    match cli.command {
        Commands::Run {
            config,
            duration,
            rate,
            output,
        } => {
            let mut config = TestConfiguration::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(d) = duration {
                config.duration_secs = d;
            }
            if let Some(r) = rate {
                config.target_rate = r;
            }

            let runner = LoadRunner::http(&config)?;
            let progress = watch_progress(runner.events(), output.quiet);
            let results = runner.run(&config).await;
            progress.finish();
            let results = results?;

            match output.output {
                OutputFormat::Table => println!("{}", ResultsReport::format_table(&results)),
                OutputFormat::Json => println!("{}", ResultsReport::format_json(&results)?),
                OutputFormat::Csv => {
                    println!("{}", ResultsReport::csv_header());
                    println!("{}", ResultsReport::format_csv(&results));
                }
            }
            persist(&output, &results);
        }
        Commands::Load {
            config,
            users,
            duration,
            output,
        } => {
            let mut config = LoadTestConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(u) = users {
                config.concurrent_users = u;
            }
            if let Some(d) = duration {
                config.base.duration_secs = d;
            }

            let simulator = ConcurrentUserSimulator::new(LoadRunner::http(&config.base)?);
            let progress = watch_progress(simulator.runner().events(), output.quiet);
            let results = simulator.run(&config).await;
            progress.finish();
            let results = results?;

            match output.output {
                OutputFormat::Table => println!("{}", ResultsReport::format_load_table(&results)),
                OutputFormat::Json => println!("{}", ResultsReport::format_json(&results)?),
                OutputFormat::Csv => {
                    println!("{}", ResultsReport::csv_header());
                    println!("{}", ResultsReport::format_csv(&results.summary));
                }
            }
            persist(&output, &results);
        }
        Commands::Stress {
            config,
            max_load,
            output,
        } => {
            let mut config = StressTestConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(m) = max_load {
                config.max_load = m;
            }

            let controller = StressController::new(LoadRunner::http(&config.base)?);
            let progress = watch_progress(controller.runner().events(), output.quiet);
            let results = controller.run(&config).await;
            progress.finish();
            let results = results?;

            match output.output {
                OutputFormat::Table => {
                    println!("{}", ResultsReport::format_stress_table(&results))
                }
                OutputFormat::Json => println!("{}", ResultsReport::format_json(&results)?),
                OutputFormat::Csv => {
                    println!("{}", ResultsReport::csv_header());
                    for step in &results.steps {
                        println!("{}", ResultsReport::format_csv(&step.result));
                    }
                }
            }
            persist(&output, &results);
        }
        Commands::List { dir } => list_scenarios(&dir),
    }

    Ok(())
}

/// Write the JSON report. A failed write leaves the printed result intact.
fn persist<R: Report>(output: &OutputArgs, results: &R) {
    if output.no_report {
        return;
    }
    match ReportWriter::new(&output.report_dir).write(results) {
        Ok(path) => info!(path = %path.display(), "Saved report"),
        Err(e) => warn!(error = %e, "Could not save report"),
    }
}

/// Console progress fed by the engine's event stream.
struct ProgressWatch {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl ProgressWatch {
    fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

fn watch_progress(events: &EventBus, quiet: bool) -> ProgressWatch {
    let mut rx = events.subscribe();
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(PROGRESS_UNITS)
    };
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }

    let bar = pb.clone();
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::Progress(update)) => {
                    pb.set_position((update.elapsed_fraction * PROGRESS_UNITS as f64) as u64);
                    pb.set_message(format!(
                        "{:.1} req/s | err {:.1}% | p95 {:.0}ms | in-flight {}",
                        update.current_rate,
                        update.error_rate * 100.0,
                        update.p95_latency_ms,
                        update.in_flight
                    ));
                }
                Ok(EngineEvent::StepStarted { step, target_rate }) => {
                    pb.reset();
                    pb.set_prefix(format!("step {} @ {:.1} req/s", step, target_rate));
                }
                Ok(EngineEvent::StepComplete(step)) => {
                    let status = if step.violated() { "violated" } else { "ok" };
                    pb.println(format!(
                        "step {} @ {:.1} req/s: {:.1} achieved, {}",
                        step.step,
                        step.target_rate,
                        step.achieved_rate(),
                        status
                    ));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    ProgressWatch { bar, task }
}

fn list_scenarios(dir: &Path) {
    println!("Available scenarios in {}:", dir.display());
    println!();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error reading directory: {}", e);
            return;
        }
    };

    let mut scenarios: Vec<(String, String, String)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("yaml"))
        .filter_map(|path| {
            // Every config flavour shares the base fields
            let config = TestConfiguration::from_file(&path).ok()?;
            let file = path.file_name()?.to_string_lossy().to_string();
            Some((file, config.name, config.description))
        })
        .collect();
    scenarios.sort_by(|a, b| a.0.cmp(&b.0));

    if scenarios.is_empty() {
        println!("No scenario files found");
    }
    for (file, name, description) in scenarios {
        println!("  {} - {}", file, name);
        println!("    {}", description);
        println!();
    }
}
