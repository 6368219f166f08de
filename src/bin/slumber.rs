//! Slumber CLI - Command-line interface for Synheart Sleep
//!
//! Commands:
//! - score: Score one night
//! - analyze: Full analysis of one night (score, distribution, timeline)
//! - timeline: Phase timeline for one night
//! - hypnogram: Normalize persisted phase rows
//! - run: Analyze newline-delimited requests from stdin (streaming mode)
//! - config: Print the default engine configuration
//! - doctor: Diagnose engine health and configuration

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use synheart_sleep::hypnogram::{HypnogramNormalizer, PhaseRow};
use synheart_sleep::pipeline::{Envelope, NightRequest, SleepEngine};
use synheart_sleep::{ComputeError, EngineConfig, ENGINE_VERSION, PRODUCER_NAME};

/// Slumber - Deterministic sleep architecture engine
#[derive(Parser)]
#[command(name = "slumber")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score nights and build sleep cycle timelines", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one night
    Score {
        #[command(flatten)]
        io: IoArgs,
    },

    /// Score, stage distribution, physiology and timeline for one night
    Analyze {
        #[command(flatten)]
        io: IoArgs,
    },

    /// Phase timeline for one night
    Timeline {
        #[command(flatten)]
        io: IoArgs,
    },

    /// Normalize a JSON array of persisted phase rows
    Hypnogram {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Analyze newline-delimited requests from stdin (streaming mode)
    Run {
        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Print the default engine configuration
    Config,

    /// Diagnose engine health and configuration
    Doctor {
        /// Check an engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct IoArgs {
    /// Input file path holding one request (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output format
    #[arg(long, default_value = "json")]
    output_format: OutputFormat,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable; `RUST_LOG` overrides the level
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<(), SlumberCliError> {
    match cli.command {
        Commands::Score { io } => cmd_night(&io, |engine, request| {
            to_json(&Envelope::new(engine.score(request)), &io.output_format)
        }),

        Commands::Analyze { io } => cmd_night(&io, |engine, request| {
            to_json(&Envelope::new(engine.analyze(request)), &io.output_format)
        }),

        Commands::Timeline { io } => cmd_night(&io, |engine, request| {
            let timeline = engine.timeline(request).map_err(ComputeError::from)?;
            to_json(&Envelope::new(timeline), &io.output_format)
        }),

        Commands::Hypnogram {
            input,
            output,
            output_format,
        } => cmd_hypnogram(&input, &output, &output_format),

        Commands::Run { config, flush } => cmd_run(config.as_deref(), flush),

        Commands::Config => {
            println!("{}", EngineConfig::default().to_json()?);
            Ok(())
        }

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_night<F>(args: &IoArgs, evaluate: F) -> Result<(), SlumberCliError>
where
    F: FnOnce(&SleepEngine, &NightRequest) -> Result<String, SlumberCliError>,
{
    let engine = load_engine(args.config.as_deref())?;
    let input_data = read_input(&args.input)?;
    let request: NightRequest = serde_json::from_str(&input_data)?;
    debug!(
        history = request.history.len(),
        duration = request.record.duration_minutes,
        "evaluating night"
    );

    let output_data = evaluate(&engine, &request)?;
    write_output(&args.output, &output_data)
}

fn cmd_hypnogram(
    input: &Path,
    output: &Path,
    output_format: &OutputFormat,
) -> Result<(), SlumberCliError> {
    let input_data = read_input(input)?;
    let rows: Vec<PhaseRow> = serde_json::from_str(&input_data)?;
    if rows.is_empty() {
        return Err(SlumberCliError::NoRows);
    }

    let result = HypnogramNormalizer::normalize(&rows);
    info!(
        rows = rows.len(),
        dropped = result.dropped_rows,
        "normalized hypnogram"
    );
    write_output(output, &to_json(&Envelope::new(result), output_format)?)
}

fn cmd_run(config: Option<&Path>, flush: bool) -> Result<(), SlumberCliError> {
    let engine = load_engine(config)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut processed = 0usize;

    for (index, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let request: NightRequest = serde_json::from_str(trimmed).map_err(|e| {
            SlumberCliError::ParseError(format!("Failed to parse request on line {}: {}", index + 1, e))
        })?;

        let analysis = engine.analyze(&request);
        writeln!(stdout, "{}", serde_json::to_string(&Envelope::new(analysis))?)?;
        if flush {
            stdout.flush()?;
        }
        processed += 1;
    }

    stdout.flush()?;
    info!(processed, "stream finished");
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), SlumberCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Engine version {}", ENGINE_VERSION),
    });

    match EngineConfig::default().validate() {
        Ok(()) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Ok,
            message: "Default configuration is valid".to_string(),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    if let Some(config_path) = config {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(content) => match EngineConfig::from_json(&content) {
                    Ok(parsed) => checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Configuration valid (goal {} min, debt window {} nights)",
                            parsed.default_sleep_goal_minutes, parsed.chronic_debt_window_nights
                        ),
                    }),
                    Err(e) => checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid configuration: {}", e),
                    }),
                },
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read configuration file: {}", e),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            });
        }
    }

    // Check stdin is available (for streaming mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Slumber Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SlumberCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_engine(config: Option<&Path>) -> Result<SleepEngine, SlumberCliError> {
    let config = match config {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    Ok(SleepEngine::new(config)?)
}

fn read_input(input: &Path) -> Result<String, SlumberCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), SlumberCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T, format: &OutputFormat) -> Result<String, SlumberCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)?),
    }
}

// Error types

#[derive(Debug)]
enum SlumberCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRows,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for SlumberCliError {
    fn from(e: io::Error) -> Self {
        SlumberCliError::Io(e)
    }
}

impl From<ComputeError> for SlumberCliError {
    fn from(e: ComputeError) -> Self {
        SlumberCliError::Compute(e)
    }
}

impl From<serde_json::Error> for SlumberCliError {
    fn from(e: serde_json::Error) -> Self {
        SlumberCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SlumberCliError> for CliError {
    fn from(e: SlumberCliError) -> Self {
        match e {
            SlumberCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SlumberCliError::Compute(ComputeError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'slumber config' for a valid starting point".to_string()),
            },
            SlumberCliError::Compute(ComputeError::Timeline(e)) => CliError {
                code: if e.is_fatal() {
                    "TIMELINE_INVARIANT".to_string()
                } else {
                    "TIMELINE_UNAVAILABLE".to_string()
                },
                message: e.to_string(),
                hint: Some(
                    "Timelines need a start or end time and 30 minutes to one day".to_string(),
                ),
            },
            SlumberCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input is a night request with a record".to_string()),
            },
            SlumberCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SlumberCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No phase rows found in input".to_string(),
                hint: Some("Ensure input is a non-empty JSON array".to_string()),
            },
            SlumberCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            SlumberCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must hold one night request".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
