//! Focus Flux CLI
//!
//! Commands:
//! - replay: Feed a recorded signal log through the controller (offline)
//! - decide: Print the threshold policy decision for one level
//! - validate: Validate an NDJSON attention signal log
//! - doctor: Diagnose configuration and environment
//! - watch: Upload a file and adapt it live from signals on stdin

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use focus_flux::config::ViewerConfig;
use focus_flux::signal::validate_ndjson;
use focus_flux::{
    AdaptError, AdaptationController, ContentArtifact, ContentType, ContentTypePolicy,
    ControllerEffect, HttpBackend, ViewerRuntime, ViewerSnapshot, FLUX_VERSION, PRODUCER_NAME,
};

/// Focus Flux - attention-adaptive presentation of study material
#[derive(Parser)]
#[command(name = "focusflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Adapt study material to attention signals", long_about = None)]
struct Cli {
    /// JSON config file (FOCUS_FLUX_* environment variables still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded signal log against an artifact (offline)
    Replay {
        /// Initial artifact JSON file
        #[arg(short, long)]
        artifact: PathBuf,

        /// NDJSON event log (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Include the viewer snapshot after every event
        #[arg(long)]
        snapshots: bool,
    },

    /// Print the policy decision for an attention level
    Decide {
        /// Attention level (0-100)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,

        /// Content type currently shown
        #[arg(short, long, default_value = "text")]
        current: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate an NDJSON attention signal log
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload a file and adapt it from signals read on stdin
    Watch {
        /// File to ingest
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Replay {
            artifact,
            input,
            output,
            snapshots,
        } => cmd_replay(&load_config(config_path)?, &artifact, &input, &output, snapshots),
        Commands::Decide {
            level,
            current,
            json,
        } => cmd_decide(level, &current, json),
        Commands::Validate { input, json } => cmd_validate(&input, json),
        Commands::Doctor { json } => cmd_doctor(config_path, json),
        Commands::Watch { file } => cmd_watch(load_config(config_path)?, file),
    }
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig, FluxCliError> {
    let base = match path {
        Some(path) => ViewerConfig::from_json(&fs::read_to_string(path)?)?,
        None => ViewerConfig::default(),
    };
    Ok(base.with_overrides(|key| std::env::var(key).ok())?)
}

fn read_input(input: &Path) -> Result<String, FluxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

/// One line of a replay log
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayEvent {
    at_ms: i64,
    #[serde(default)]
    signal: Option<serde_json::Value>,
    #[serde(default)]
    dismiss_break: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRecord {
    at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    effect: Option<ControllerEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dismissed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<ViewerSnapshot>,
}

fn cmd_replay(
    config: &ViewerConfig,
    artifact: &Path,
    input: &Path,
    output: &Path,
    snapshots: bool,
) -> Result<(), FluxCliError> {
    let artifact: ContentArtifact = serde_json::from_str(&fs::read_to_string(artifact)?)?;
    // Event offsets are relative to the artifact timestamp (epoch when absent)
    let start = artifact.timestamp.unwrap_or_default();

    let mut controller = AdaptationController::new(config.controller.clone());
    controller.load_artifact(artifact, start);

    let input_data = read_input(input)?;
    let mut lines: Vec<String> = Vec::new();

    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: ReplayEvent = serde_json::from_str(trimmed).map_err(|e| {
            FluxCliError::ParseError(format!("Line {}: {}", index + 1, e))
        })?;
        let now = event_time(start, event.at_ms).ok_or_else(|| {
            FluxCliError::ParseError(format!(
                "Line {}: atMs {} is out of range",
                index + 1,
                event.at_ms
            ))
        })?;

        let mut record = ReplayRecord {
            at_ms: event.at_ms,
            effect: None,
            dismissed: None,
            snapshot: None,
        };

        if event.dismiss_break {
            record.dismissed = Some(controller.dismiss_break(now).is_some());
        } else if let Some(signal) = event.signal {
            record.effect = Some(controller.on_raw_signal(&signal.to_string(), now));
        } else {
            return Err(FluxCliError::ParseError(format!(
                "Line {}: expected \"signal\" or \"dismissBreak\"",
                index + 1
            )));
        }

        if snapshots {
            record.snapshot = Some(controller.snapshot(now));
        }
        lines.push(serde_json::to_string(&record)?);
    }

    if lines.is_empty() {
        return Err(FluxCliError::NoEvents);
    }

    let mut result = lines.join("\n");
    result.push('\n');

    if output.to_string_lossy() == "-" {
        io::stdout().write_all(result.as_bytes())?;
    } else {
        fs::write(output, result)?;
    }
    Ok(())
}

/// Instant of a replay event, `None` when the offset leaves chrono's range
fn event_time(start: DateTime<Utc>, at_ms: i64) -> Option<DateTime<Utc>> {
    Duration::try_milliseconds(at_ms).and_then(|offset| start.checked_add_signed(offset))
}

fn cmd_decide(level: u8, current: &str, json: bool) -> Result<(), FluxCliError> {
    let current: ContentType = current.parse()?;
    let decided = ContentTypePolicy::decide(level, current);

    if json {
        let report = DecisionReport {
            level,
            current,
            suggested: ContentTypePolicy::suggest(level),
            decided,
            changed: decided != current,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", decided);
    }
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), FluxCliError> {
    let input_data = read_input(input)?;
    let (total, errors) = validate_ndjson(&input_data);

    let report = ValidationReport {
        total_signals: total,
        valid_signals: total - errors.len(),
        invalid_signals: errors.len(),
        errors: errors
            .iter()
            .map(|e| ValidationErrorDetail {
                line: e.line,
                error: e.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total signals:   {}", report.total_signals);
        println!("Valid signals:   {}", report.valid_signals);
        println!("Invalid signals: {}", report.invalid_signals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Line {}: {}", err.line, err.error);
            }
        }
    }

    if report.invalid_signals > 0 {
        Err(FluxCliError::ValidationFailed(report.invalid_signals))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux version {}", FLUX_VERSION),
    });

    if let Some(path) = config_path {
        if !path.exists() {
            checks.push(DoctorCheck {
                name: "config_file".to_string(),
                status: CheckStatus::Error,
                message: format!("{} does not exist", path.display()),
            });
        }
    }

    match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "cooldown {} ms, break {} ms, poll {} ms",
                    config.controller.cooldown_ms, config.controller.break_ms, config.poll_interval_ms
                ),
            });
            checks.push(DoctorCheck {
                name: "backend".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "upload to {} (timeout {} ms)",
                    config.upload_url(),
                    config.request_timeout_ms
                ),
            });
            if config.controller.cooldown_ms == 0 {
                checks.push(DoctorCheck {
                    name: "cooldown".to_string(),
                    status: CheckStatus::Warning,
                    message: "Cooldown disabled; content may switch on every signal".to_string(),
                });
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: CliError::from(e).message,
        }),
    }

    // Check stdin is available (for watch mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (type signals, or 'dismiss')".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (signal stream ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Flux Doctor Report");
        println!("==================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_watch(config: ViewerConfig, file: PathBuf) -> Result<(), FluxCliError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch(config, file))
}

/// Signals are sampled once per poll interval; the newest line read since
/// the last tick wins. A line reading `dismiss` ends the running break.
async fn watch(config: ViewerConfig, file: PathBuf) -> Result<(), FluxCliError> {
    let backend = HttpBackend::new(&config)?;
    let handle = ViewerRuntime::spawn(config.controller.clone(), backend);
    let mut snapshots = handle.subscribe();

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    handle.select_file(file).await?;

    // Signals read meanwhile stay queued in the channel
    let loaded = handle.wait_loaded().await?;
    snapshots.borrow_and_update();
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", serde_json::to_string(&loaded)?)?;
    stdout.flush()?;
    if !loaded.content_loaded {
        handle.shutdown().await?;
        return Err(AdaptError::IngestionFailure("no content was loaded".to_string()).into());
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut latest: Option<String> = None;

    loop {
        tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.eq_ignore_ascii_case("dismiss") {
                        handle.dismiss_break().await?;
                    } else if !trimmed.is_empty() {
                        latest = Some(trimmed.to_string());
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Some(json) = latest.take() {
                    handle.send_raw_signal(json).await?;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                writeln!(stdout, "{}", serde_json::to_string(&snapshot)?)?;
                stdout.flush()?;
            }
        }
    }

    if let Some(json) = latest.take() {
        handle.send_raw_signal(json).await?;
    }

    let snapshot = handle.snapshot().await?;
    writeln!(stdout, "{}", serde_json::to_string(&snapshot)?)?;
    handle.shutdown().await?;
    Ok(())
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Adapt(AdaptError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<AdaptError> for FluxCliError {
    fn from(e: AdaptError) -> Self {
        FluxCliError::Adapt(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Adapt(AdaptError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'focusflux doctor' to inspect the configuration".to_string()),
            },
            FluxCliError::Adapt(e @ AdaptError::IngestionFailure(_)) => CliError {
                code: "INGESTION_FAILED".to_string(),
                message: e.to_string(),
                hint: Some("Check that the backend is running and the file is readable".to_string()),
            },
            FluxCliError::Adapt(e) => CliError {
                code: "ADAPT_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} signals failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            FluxCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line needs \"atMs\" plus \"signal\" or \"dismissBreak\"".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DecisionReport {
    level: u8,
    current: ContentType,
    suggested: ContentType,
    decided: ContentType,
    changed: bool,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_signals: usize,
    valid_signals: usize,
    invalid_signals: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
