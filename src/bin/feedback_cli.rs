use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use feedback_detector::analysis::advisory::Advisory;
use feedback_detector::config::{AppConfig, DetectorSettings, OperationMode};
use feedback_detector::engine::{Command, PipelineEvent, SessionHandle};
use feedback_detector::fixtures::synthetic::{Scenario, SyntheticSpectrum};
use feedback_detector::fixtures::{
    ExpectationDiff, FixtureCatalog, FixtureProcessor, FixtureRun, DEFAULT_FFT_SIZE, DEFAULT_HOP_SIZE,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "feedback_cli",
    about = "Offline harness for the acoustic feedback detector"
)]
struct Cli {
    /// JSON file with `detector` and `session` sections (defaults when absent)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override directory containing fixture assets (defaults to ./fixtures)
    #[arg(long)]
    fixtures_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a synthetic scenario through a live session and print its events
    Simulate {
        #[arg(long, value_enum, default_value_t = ScenarioArg::Growing)]
        scenario: ScenarioArg,
        #[arg(long, default_value_t = 150)]
        frames: usize,
        #[arg(long, default_value_t = 20.0)]
        hop_ms: f64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
        /// Attach per-bin phase to every frame
        #[arg(long)]
        phases: bool,
    },
    /// Run a WAV fixture and optionally compare against expectations
    Analyze {
        #[arg(long)]
        fixture: String,
        #[arg(long)]
        expect: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_FFT_SIZE)]
        fft_size: usize,
        #[arg(long, default_value_t = DEFAULT_HOP_SIZE)]
        hop: usize,
    },
    /// Print the settings preset for an operating mode
    DumpSettings {
        #[arg(long, value_enum, default_value_t = ModeArg::Speech)]
        mode: ModeArg,
    },
    /// List available fixtures on disk
    DumpFixtures,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioArg {
    Steady,
    Growing,
    Harmonic,
    Whistle,
    Silence,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Steady => Scenario::Steady,
            ScenarioArg::Growing => Scenario::Growing,
            ScenarioArg::Harmonic => Scenario::Harmonic,
            ScenarioArg::Whistle => Scenario::Whistle,
            ScenarioArg::Silence => Scenario::Silence,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Speech,
    LiveMusic,
    Monitors,
    RingOut,
}

impl From<ModeArg> for OperationMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Speech => OperationMode::Speech,
            ModeArg::LiveMusic => OperationMode::LiveMusic,
            ModeArg::Monitors => OperationMode::Monitors,
            ModeArg::RingOut => OperationMode::RingOut,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_ref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();
    let catalog = cli
        .fixtures_dir
        .map(FixtureCatalog::new)
        .unwrap_or_default();

    match cli.command {
        Commands::Simulate {
            scenario,
            frames,
            hop_ms,
            seed,
            sample_rate,
            phases,
        } => run_simulate(
            &config,
            scenario.into(),
            frames,
            hop_ms,
            SyntheticSpectrum::new(sample_rate, DEFAULT_FFT_SIZE, seed).with_phases(phases),
        ),
        Commands::Analyze {
            fixture,
            expect,
            output,
            fft_size,
            hop,
        } => run_analyze(&catalog, config, &fixture, expect, output, fft_size, hop),
        Commands::DumpSettings { mode } => run_dump_settings(mode.into()),
        Commands::DumpFixtures => run_dump_fixtures(&catalog),
    }
}

fn run_simulate(
    config: &AppConfig,
    scenario: Scenario,
    frames: usize,
    hop_ms: f64,
    mut source: SyntheticSpectrum,
) -> Result<ExitCode> {
    let mut session = SessionHandle::spawn(&config.session)?;
    session.send(Command::Init {
        settings: config.detector.clone(),
        sample_rate: source.sample_rate(),
        fft_size: source.fft_size(),
    })?;

    for i in 0..frames {
        let time_ms = i as f64 * hop_ms;
        let mut frame = source.frame(time_ms, &scenario.tones(time_ms));
        let mut buffer = session.acquire_buffer();
        buffer.extend_from_slice(&frame.magnitudes_db);
        frame.magnitudes_db = buffer;
        session.submit_frame(frame)?;
    }
    session.send(Command::Shutdown)?;

    let mut errors = 0usize;
    while let Some(event) = session.recv_blocking() {
        if matches!(event, PipelineEvent::Error { .. }) {
            errors += 1;
        }
        println!("{}", serde_json::to_string(&event)?);
    }

    let snapshot = session.telemetry().snapshot();
    session.shutdown()?;
    eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(if errors == 0 {
        ExitCode::from(0)
    } else {
        ExitCode::from(2)
    })
}

fn run_analyze(
    catalog: &FixtureCatalog,
    config: AppConfig,
    fixture: &str,
    override_expect: Option<PathBuf>,
    output_path: Option<PathBuf>,
    fft_size: usize,
    hop: usize,
) -> Result<ExitCode> {
    if !fft_size.is_power_of_two() {
        return Err(anyhow!("--fft-size must be a power of two (got {fft_size})"));
    }

    let processor = FixtureProcessor::new(config).with_fft(fft_size, hop);
    let data = catalog.load(fixture, override_expect)?;
    let run = processor
        .run(&data)
        .with_context(|| format!("processing fixture {}", fixture))?;
    let advisories = run.published_advisories();

    emit_report(&data.metadata.name, data.sample_rate, &run, &advisories, output_path)?;

    if let Some(expectations) = data.expectations {
        match expectations.verify(&advisories) {
            Ok(()) => Ok(ExitCode::from(0)),
            Err(diff) => {
                emit_diff(&diff)?;
                Ok(ExitCode::from(2))
            }
        }
    } else {
        Ok(ExitCode::from(0))
    }
}

fn run_dump_settings(mode: OperationMode) -> Result<ExitCode> {
    let settings = DetectorSettings::for_mode(mode);
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(ExitCode::from(0))
}

fn run_dump_fixtures(catalog: &FixtureCatalog) -> Result<ExitCode> {
    let fixtures = catalog.discover()?;
    if fixtures.is_empty() {
        println!("No fixtures found under {}", catalog.root().display());
        return Ok(ExitCode::from(0));
    }

    for metadata in fixtures {
        if let Some(expect) = metadata.expect_path {
            println!("{} -> {}", metadata.name, expect.display());
        } else {
            println!("{}", metadata.name);
        }
    }
    Ok(ExitCode::from(0))
}

fn emit_report(
    fixture: &str,
    sample_rate: u32,
    run: &FixtureRun,
    advisories: &[Advisory],
    output_path: Option<PathBuf>,
) -> Result<()> {
    let report = FixtureReportPayload {
        fixture,
        sample_rate,
        frames: run.frames,
        advisory_count: advisories.len(),
        advisories,
        run,
    };
    let json = serde_json::to_string_pretty(&report)?;

    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }

    Ok(())
}

fn emit_diff(diff: &ExpectationDiff) -> Result<()> {
    let json = serde_json::to_string_pretty(&diff.to_json())?;
    eprintln!("{json}");
    Ok(())
}

#[derive(Serialize)]
struct FixtureReportPayload<'a> {
    fixture: &'a str,
    sample_rate: u32,
    frames: usize,
    advisory_count: usize,
    #[serde(skip_serializing_if = "slice_empty")]
    advisories: &'a [Advisory],
    run: &'a FixtureRun,
}

fn slice_empty(advisories: &&[Advisory]) -> bool {
    advisories.is_empty()
}
