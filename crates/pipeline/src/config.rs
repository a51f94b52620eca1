use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Placeholder in `transcode_args` replaced by the resolved stream locator
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// What `cancel_owner_jobs` does with jobs of that owner still waiting in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Only the running job is terminated; queued jobs stay queued
    RunningOnly,
    /// The running job is terminated and queued jobs of the owner are dropped
    RunningAndQueued,
}

/// Wait windows (milliseconds) used by the termination escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceWindows {
    /// How long to wait after the quit byte before interrupting
    pub quit_ms: u64,
    /// Pause after SIGINT
    pub interrupt_ms: u64,
    /// How long to wait after SIGTERM before killing
    pub terminate_ms: u64,
}

impl GraceWindows {
    pub fn quit(&self) -> Duration {
        Duration::from_millis(self.quit_ms)
    }

    pub fn interrupt(&self) -> Duration {
        Duration::from_millis(self.interrupt_ms)
    }

    pub fn terminate(&self) -> Duration {
        Duration::from_millis(self.terminate_ms)
    }
}

impl Default for GraceWindows {
    fn default() -> Self {
        Self {
            quit_ms: 5_000,
            interrupt_ms: 1_000,
            terminate_ms: 2_000,
        }
    }
}

/// Configuration for the media job pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scratch directory for in-flight artifacts and their sidecar files
    pub scratch_root: PathBuf,
    /// Directory where the local upload sink places finished files
    pub output_dir: PathBuf,
    /// Number of persistent workers draining the queue
    pub worker_count: usize,
    /// Transcoder binary (ffmpeg by default)
    pub transcode_bin: PathBuf,
    /// Transcoder arguments; `{input}` is replaced by the playable locator
    pub transcode_args: Vec<String>,
    /// Minimum seconds between two progress notifications for one job
    pub progress_interval_secs: u64,
    /// Interval in seconds between periodic scratch sweeps
    pub sweep_interval_secs: u64,
    /// Files in the scratch root older than this are deleted by the sweep
    pub max_temp_age_secs: u64,
    /// Pause after a failed sweep before the loop resumes
    pub sweep_cooldown_secs: u64,
    /// Free space (GiB) below which the emergency sweep wipes the scratch root
    pub min_free_gb: f64,
    /// Termination escalation windows
    pub grace: GraceWindows,
    /// Behaviour of cancel-by-owner towards queued jobs
    pub cancel_policy: CancelPolicy,
    /// How long shutdown waits for the queue to drain before force-closing
    pub drain_timeout_secs: u64,
    /// How much of the transcoder's stderr is kept for failure reports
    pub stderr_tail_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PipelineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            scratch_root: PathBuf::from("/tmp/leech-pipeline"),
            output_dir: PathBuf::from("/tmp/leech-pipeline-out"),
            worker_count: 2,
            transcode_bin: PathBuf::from("ffmpeg"),
            transcode_args: default_transcode_args(),
            progress_interval_secs: 2,
            sweep_interval_secs: 300,
            max_temp_age_secs: 3600,
            sweep_cooldown_secs: 60,
            min_free_gb: 5.0,
            grace: GraceWindows::default(),
            cancel_policy: CancelPolicy::RunningOnly,
            drain_timeout_secs: 30,
            stderr_tail_bytes: 4096,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        if config.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }

        Ok(config)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_temp_age(&self) -> Duration {
        Duration::from_secs(self.max_temp_age_secs)
    }

    pub fn sweep_cooldown(&self) -> Duration {
        Duration::from_secs(self.sweep_cooldown_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Stream-copy the input into fragmented MP4 on stdout
fn default_transcode_args() -> Vec<String> {
    [
        "-i",
        INPUT_PLACEHOLDER,
        "-c",
        "copy",
        "-f",
        "mp4",
        "-movflags",
        "frag_keyframe+empty_moov+default_base_moof",
        "-loglevel",
        "error",
        "-flush_packets",
        "1",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
