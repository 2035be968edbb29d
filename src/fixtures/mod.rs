//! Fixture utilities for the deterministic CLI harness.
//!
//! This module discovers fixture assets, loads PCM WAV input data, turns it
//! into spectrum frames on the host side, parses optional expectation JSON,
//! and runs the detection pipeline synchronously. Synthetic tone scenarios
//! live in [`synthetic`] for tests and the `simulate` command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::advisory::Advisory;
use crate::analysis::classifier::Severity;
use crate::analysis::types::SpectrumFrame;
use crate::analysis::FeedbackPipeline;
use crate::config::AppConfig;
use crate::engine::protocol::{Command, PipelineEvent};
use crate::telemetry::{TelemetryHub, TelemetrySnapshot};

pub mod stft;
pub mod synthetic;

pub use stft::SpectrumFrameSource;
pub use synthetic::{Scenario, SyntheticSpectrum, Tone};

/// Default location for fixture WAV/JSON assets.
pub const DEFAULT_FIXTURE_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures");

pub const DEFAULT_FFT_SIZE: usize = 8192;
pub const DEFAULT_HOP_SIZE: usize = 1024;

/// Metadata describing an available fixture.
#[derive(Clone, Debug)]
pub struct FixtureMetadata {
    pub name: String,
    pub wav_path: PathBuf,
    pub expect_path: Option<PathBuf>,
}

/// Loaded fixture data with decoded PCM samples.
pub struct FixtureData {
    pub metadata: FixtureMetadata,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
    pub expectations: Option<FixtureExpectations>,
}

/// JSON expectation schema for fixture verification.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureExpectations {
    pub fixture: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub advisories: Vec<ExpectedAdvisory>,
    /// Fail on advisories that match no expectation
    #[serde(default)]
    pub exclusive: bool,
}

/// Expected advisory definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedAdvisory {
    pub frequency_hz: f32,
    #[serde(default = "default_tolerance")]
    pub tolerance_hz: f32,
    /// Any severity when absent
    #[serde(default)]
    pub severity: Option<Severity>,
}

fn default_tolerance() -> f32 {
    20.0
}

impl ExpectedAdvisory {
    fn matches(&self, advisory: &Advisory) -> bool {
        (advisory.frequency_hz - self.frequency_hz).abs() <= self.tolerance_hz
            && self.severity.map_or(true, |s| s == advisory.severity)
    }
}

impl FixtureExpectations {
    /// Compare against every advisory published during the run
    pub fn verify(&self, published: &[Advisory]) -> std::result::Result<(), ExpectationDiff> {
        let mut failures = Vec::new();

        for (idx, expected) in self.advisories.iter().enumerate() {
            if !published.iter().any(|advisory| expected.matches(advisory)) {
                failures.push(ExpectationFailure {
                    index: idx,
                    expected: Some(expected.clone()),
                    actual: None,
                });
            }
        }

        if self.exclusive {
            for advisory in published {
                if !self.advisories.iter().any(|expected| expected.matches(advisory)) {
                    failures.push(ExpectationFailure {
                        index: failures.len(),
                        expected: None,
                        actual: Some(advisory.clone()),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExpectationDiff { failures })
        }
    }
}

/// Outcome of comparing actual advisories with expectations.
#[derive(Debug)]
pub struct ExpectationDiff {
    pub failures: Vec<ExpectationFailure>,
}

impl ExpectationDiff {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "failures": self.failures.iter().map(|failure| {
                serde_json::json!({
                    "index": failure.index,
                    "expected": failure.expected,
                    "actual": failure.actual.as_ref().map(|a| serde_json::json!({
                        "id": a.id,
                        "frequency_hz": a.frequency_hz,
                        "severity": a.severity,
                    })),
                })
            }).collect::<Vec<_>>()
        })
    }
}

/// Detailed diff entry: a missing expectation or an unexpected advisory.
#[derive(Debug)]
pub struct ExpectationFailure {
    pub index: usize,
    pub expected: Option<ExpectedAdvisory>,
    pub actual: Option<Advisory>,
}

/// Catalog responsible for discovering fixtures on disk.
pub struct FixtureCatalog {
    root: PathBuf,
}

impl FixtureCatalog {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List all fixtures by their metadata.
    pub fn discover(&self) -> Result<Vec<FixtureMetadata>> {
        let mut fixtures = Vec::new();
        if !self.root.exists() {
            return Ok(fixtures);
        }

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("wav") {
                    fixtures.push(self.metadata_for_path(&path)?);
                }
            }
        }

        fixtures.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(fixtures)
    }

    /// Load fixture samples + expectations for provided name or path.
    pub fn load(&self, fixture: &str, override_expect: Option<PathBuf>) -> Result<FixtureData> {
        let wav_path = self.resolve_fixture_path(fixture)?;
        let metadata = self.metadata_for_path(&wav_path)?;
        let (samples, sample_rate) = read_wav(&wav_path)?;

        let expectation_path = override_expect.or(metadata.expect_path.clone());
        let expectations = match expectation_path {
            Some(path) => {
                let json = fs::read_to_string(&path)
                    .with_context(|| format!("reading expectation {}", path.display()))?;
                Some(
                    serde_json::from_str(&json)
                        .with_context(|| format!("parsing {}", path.display()))?,
                )
            }
            None => None,
        };

        Ok(FixtureData {
            metadata,
            sample_rate,
            samples,
            expectations,
        })
    }

    fn resolve_fixture_path(&self, fixture: &str) -> Result<PathBuf> {
        let as_path = Path::new(fixture);
        if as_path.exists() {
            return Ok(as_path.to_path_buf());
        }

        let candidate = self.root.join(format!("{fixture}.wav"));
        if candidate.exists() {
            Ok(candidate)
        } else {
            Err(anyhow!(
                "Fixture '{fixture}' not found in {}",
                self.root.display()
            ))
        }
    }

    fn metadata_for_path(&self, wav_path: &Path) -> Result<FixtureMetadata> {
        let name = wav_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Invalid fixture name for {}", wav_path.display()))?
            .to_string();
        let expect_path = wav_path.with_extension("expect.json");
        Ok(FixtureMetadata {
            name,
            wav_path: wav_path.to_path_buf(),
            expect_path: expect_path.exists().then_some(expect_path),
        })
    }
}

impl Default for FixtureCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_FIXTURE_ROOT)
    }
}

/// Everything a fixture run produced.
#[derive(Debug, Serialize)]
pub struct FixtureRun {
    pub frames: usize,
    pub events: Vec<PipelineEvent>,
    pub telemetry: TelemetrySnapshot,
}

impl FixtureRun {
    /// Latest state of every advisory that was ever published
    pub fn published_advisories(&self) -> Vec<Advisory> {
        let mut latest: Vec<Advisory> = Vec::new();
        for event in &self.events {
            if let PipelineEvent::Advisory { advisory, .. } = event {
                match latest.iter_mut().find(|a| a.id == advisory.id) {
                    Some(slot) => *slot = advisory.clone(),
                    None => latest.push(advisory.clone()),
                }
            }
        }
        latest
    }
}

/// Runs spectrum frames through a private pipeline instance.
pub struct FixtureProcessor {
    config: AppConfig,
    fft_size: usize,
    hop_size: usize,
}

impl FixtureProcessor {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            fft_size: DEFAULT_FFT_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
        }
    }

    pub fn with_fft(mut self, fft_size: usize, hop_size: usize) -> Self {
        if fft_size.is_power_of_two() {
            self.fft_size = fft_size;
        }
        if hop_size > 0 {
            self.hop_size = hop_size;
        }
        self
    }

    /// STFT the decoded PCM and run every frame
    pub fn run(&self, data: &FixtureData) -> Result<FixtureRun> {
        if data.samples.len() < self.fft_size {
            return Err(anyhow!(
                "Fixture {} is shorter than one FFT window ({} < {} samples)",
                data.metadata.name,
                data.samples.len(),
                self.fft_size
            ));
        }
        let source =
            SpectrumFrameSource::new(&data.samples, data.sample_rate, self.fft_size, self.hop_size);
        self.run_frames(data.sample_rate, source)
    }

    /// Run pre-built frames, e.g. a synthetic scenario
    pub fn run_frames<I>(&self, sample_rate: u32, frames: I) -> Result<FixtureRun>
    where
        I: IntoIterator<Item = SpectrumFrame>,
    {
        let telemetry = Arc::new(TelemetryHub::from_config(&self.config.session));
        let mut pipeline = FeedbackPipeline::new(Arc::clone(&telemetry))
            .with_log_interval(self.config.session.log_every_n_frames);

        let mut events = pipeline.handle(Command::Init {
            settings: self.config.detector.clone(),
            sample_rate,
            fft_size: self.fft_size,
        });
        if let Some(PipelineEvent::Error { code, message }) = events.first() {
            return Err(anyhow!("Pipeline rejected init (code {code}): {message}"));
        }

        let mut count = 0usize;
        for frame in frames {
            count += 1;
            events.extend(pipeline.handle(Command::ProcessFrame { frame }));
        }

        Ok(FixtureRun {
            frames: count,
            events,
            telemetry: telemetry.snapshot(),
        })
    }
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(anyhow!(
            "Fixture {} must be mono (found {} channels)",
            path.display(),
            spec.channels
        ));
    }

    let sample_rate = spec.sample_rate;

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) - 1;
            match spec.bits_per_sample {
                16 => reader
                    .samples::<i16>()
                    .map(|sample| {
                        sample
                            .map(|value| value as f32 / max as f32)
                            .map_err(|err| anyhow!(err))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| {
                        sample
                            .map(|value| value as f32 / max as f32)
                            .map_err(|err| anyhow!(err))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                other => {
                    return Err(anyhow!(
                        "Unsupported bits per sample {} in {}",
                        other,
                        path.display()
                    ))
                }
            }
        }
    };

    Ok((samples, sample_rate))
}
