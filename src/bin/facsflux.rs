//! FACS Flux CLI - Command-line interface for the expression engine
//!
//! Commands:
//! - run: Process NDJSON face observations (file or stdin) into decisions
//! - validate-config: Load and validate an engine configuration
//! - doctor: Diagnose engine health and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::cell::RefCell;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use facs_flux::mapping::MappingConfig;
use facs_flux::scoring::FacsConfig;
use facs_flux::validator::ValidationConfig;
use facs_flux::{
    ComputeError, DecisionRecord, EngineConfig, ExpressionEngine, FrameInput, FLUX_VERSION,
    PRODUCER_NAME,
};

/// FACS Flux - On-device facial action unit engine
#[derive(Parser)]
#[command(name = "facsflux")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Turn face landmark streams into explainable expression decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process NDJSON face observations into decision records
    Run {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Engine configuration JSON (bundled defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Emit every frame result instead of decision records
        #[arg(long)]
        frames: bool,

        /// Calibrate the neutral face on the N-th detected frame
        #[arg(long)]
        calibrate_after: Option<usize>,

        /// Load calibration from file
        #[arg(long)]
        load_calibration: Option<PathBuf>,

        /// Save calibration to file on exit
        #[arg(long)]
        save_calibration: Option<PathBuf>,
    },

    /// Load and validate an engine configuration
    ValidateConfig {
        /// Configuration file (bundled defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check a calibration file
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON, streamed as records are produced
    Ndjson,
    /// JSON array written on exit
    Json,
    /// Pretty-printed JSON array written on exit
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facs_flux=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Run {
            input,
            config,
            output_format,
            frames,
            calibrate_after,
            load_calibration,
            save_calibration,
        } => cmd_run(RunOptions {
            input,
            config,
            output_format,
            frames,
            calibrate_after,
            load_calibration,
            save_calibration,
        }),
        Commands::ValidateConfig { config, json } => cmd_validate_config(config.as_deref(), json),
        Commands::Doctor { calibration, json } => cmd_doctor(calibration.as_deref(), json),
    }
}

struct RunOptions {
    input: PathBuf,
    config: Option<PathBuf>,
    output_format: OutputFormat,
    frames: bool,
    calibrate_after: Option<usize>,
    load_calibration: Option<PathBuf>,
    save_calibration: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, FluxCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::bundled()?),
    }
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>, FluxCliError> {
    if path.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(path)?)))
    }
}

fn cmd_run(opts: RunOptions) -> Result<(), FluxCliError> {
    let config = load_config(opts.config.as_deref())?;
    let mut engine = ExpressionEngine::new(config)?;

    if let Some(path) = &opts.load_calibration {
        engine.load_calibration(&fs::read_to_string(path)?)?;
    }

    let decisions: Rc<RefCell<Vec<DecisionRecord>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = decisions.clone();
    engine.on_decision(move |record| sink.borrow_mut().push(record.clone()));

    let mut writer = RecordWriter::new(opts.output_format);
    let mut lines = 0usize;
    let mut detected = 0usize;

    for (index, line) in open_input(&opts.input)?.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        lines += 1;

        let input: FrameInput = serde_json::from_str(trimmed).map_err(|e| {
            FluxCliError::ParseError(format!("line {}: {}", index + 1, e))
        })?;
        let (frame, face) = input.into_parts();

        let Some(result) = engine.process_detection(&frame, &face) else {
            debug!(line = index + 1, "no face in frame");
            continue;
        };
        detected += 1;

        if opts.calibrate_after == Some(detected) {
            engine.calibrate(&result.aus);
        }

        if opts.frames {
            writer.write(&result)?;
        }
        for record in decisions.borrow_mut().drain(..) {
            if !opts.frames {
                writer.write(&record)?;
            }
        }
    }

    writer.finish()?;

    if lines == 0 {
        return Err(FluxCliError::NoFrames);
    }
    info!(frames = lines, detected, "run complete");

    if let Some(path) = &opts.save_calibration {
        fs::write(path, engine.save_calibration()?)?;
    }

    Ok(())
}

/// Streams NDJSON or buffers a JSON array until `finish`
struct RecordWriter {
    format: OutputFormat,
    buffered: Vec<serde_json::Value>,
    stdout: io::Stdout,
}

impl RecordWriter {
    fn new(format: OutputFormat) -> Self {
        Self {
            format,
            buffered: Vec::new(),
            stdout: io::stdout(),
        }
    }

    fn write<T: serde::Serialize>(&mut self, record: &T) -> Result<(), FluxCliError> {
        match self.format {
            OutputFormat::Ndjson => {
                let mut out = self.stdout.lock();
                writeln!(out, "{}", serde_json::to_string(record)?)?;
                out.flush()?;
            }
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.buffered.push(serde_json::to_value(record)?);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(), FluxCliError> {
        let output = match self.format {
            OutputFormat::Ndjson => return Ok(()),
            OutputFormat::Json => serde_json::to_string(&self.buffered)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&self.buffered)?,
        };
        println!("{}", output);
        Ok(())
    }
}

fn cmd_validate_config(path: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let config = load_config(path)?;
    let warnings = config.validate()?;

    let report = ConfigReport {
        source: path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "bundled".to_string()),
        window_seconds: config.window_seconds,
        fps: config.fps,
        window_capacity: (config.window_seconds * config.fps as f64).floor() as usize,
        mapped_aus: config.mappings.mappings.len(),
        validations: config.validations.validations.len(),
        dimensions: config.facs.dimensions.keys().map(str::to_string).collect(),
        weighted_codes: config.facs.weights_by_code.len(),
        combo_rules: config.facs.combo_rules.len(),
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Config Report");
        println!("=============");
        println!("Source:          {}", report.source);
        println!(
            "Window:          {}s @ {} fps ({} frames)",
            report.window_seconds, report.fps, report.window_capacity
        );
        println!("Mapped AUs:      {}", report.mapped_aus);
        println!("Validations:     {}", report.validations);
        println!("Dimensions:      {}", report.dimensions.join(", "));
        println!("Weighted codes:  {}", report.weighted_codes);
        println!("Combo rules:     {}", report.combo_rules);

        if !report.warnings.is_empty() {
            println!("\nWarnings:");
            for warning in &report.warnings {
                println!("  - {}", warning);
            }
        }
    }

    Ok(())
}

fn cmd_doctor(calibration: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok(
        "flux_version",
        format!("FACS Flux version {}", FLUX_VERSION),
    ));

    checks.push(match MappingConfig::bundled() {
        Ok(mappings) => DoctorCheck::ok(
            "au_mappings",
            format!("{} AU mappings bundled", mappings.mappings.len()),
        ),
        Err(e) => DoctorCheck::error("au_mappings", e.to_string()),
    });

    checks.push(match ValidationConfig::bundled().and_then(|v| v.validate().map(|_| v)) {
        Ok(validations) => DoctorCheck::ok(
            "physical_validations",
            format!("{} physical validations bundled", validations.validations.len()),
        ),
        Err(e) => DoctorCheck::error("physical_validations", e.to_string()),
    });

    checks.push(match FacsConfig::bundled() {
        Ok(facs) => DoctorCheck::ok(
            "facs_decision",
            format!(
                "{} dimensions, {} combo rules",
                facs.dimensions.len(),
                facs.combo_rules.len()
            ),
        ),
        Err(e) => DoctorCheck::error("facs_decision", e.to_string()),
    });

    checks.push(match EngineConfig::bundled().and_then(ExpressionEngine::new) {
        Ok(engine) => DoctorCheck::ok(
            "engine",
            format!("Engine builds with defaults ({} frame window)", engine.window_capacity()),
        ),
        Err(e) => DoctorCheck::error("engine", e.to_string()),
    });

    if let Some(path) = calibration {
        let check = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match ExpressionEngine::new(EngineConfig::default())
                    .and_then(|mut engine| engine.load_calibration(&content))
                {
                    Ok(()) => DoctorCheck::ok("calibration", "Calibration file valid".to_string()),
                    Err(e) => DoctorCheck::error("calibration", format!("Invalid calibration: {}", e)),
                },
                Err(e) => DoctorCheck::error(
                    "calibration",
                    format!("Cannot read calibration file: {}", e),
                ),
            }
        } else {
            DoctorCheck {
                name: "calibration".to_string(),
                status: CheckStatus::Warning,
                message: "Calibration file does not exist".to_string(),
            }
        };
        checks.push(check);
    }

    // Check stdin is available (for streaming mode)
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (streaming mode ready)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("FACS Flux Doctor Report");
        println!("=======================");
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

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    ParseError(String),
    NoFrames,
    DoctorFailed,
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<ComputeError> for FluxCliError {
    fn from(e: ComputeError) -> Self {
        FluxCliError::Compute(e)
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
            FluxCliError::Compute(e) => {
                let hint = match &e {
                    ComputeError::InvalidConfig(_) | ComputeError::MissingField(_) => {
                        "Run 'facsflux validate-config' for details"
                    }
                    ComputeError::CalibrationError(_) => {
                        "Use a file written by --save-calibration"
                    }
                    _ => "Check the engine configuration and input",
                };
                CliError {
                    code: "ENGINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(
                    "Each line must be {timestamp, width, height, landmarks, blendshapes}".to_string(),
                ),
            },
            FluxCliError::NoFrames => CliError {
                code: "NO_FRAMES".to_string(),
                message: "No frames found in input".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ConfigReport {
    source: String,
    window_seconds: f64,
    fps: u32,
    window_capacity: usize,
    mapped_aus: usize,
    validations: usize,
    dimensions: Vec<String>,
    weighted_codes: usize,
    combo_rules: usize,
    warnings: Vec<String>,
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

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }

    fn error(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
