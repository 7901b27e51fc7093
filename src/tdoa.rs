//! Dual-frequency raw capture via the external acquisition tool
//!
//! The tool is a patched rtl_sdr build that interleaves samples from two
//! frequencies onto stdout. It needs the USB device to itself, so the
//! caller closes any open device session before launching it.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{info, warn};

use crate::error::{ConfigError, SubprocessError};

/// Fixed tuner gain in dB handed to the tool.
const TOOL_GAIN: u32 = 35;
/// Power offset flag the tool expects.
const TOOL_POWER_OFFSET: i32 = -3;
/// stdout is drained in reads of this size.
const READ_CHUNK: usize = 4096;
/// Two interleaved channels, 2 bytes per complex sample.
const BYTES_PER_SAMPLE: u64 = 4;

/// TDOA job settings from the console. Frequencies in Hz, counts in
/// samples. Missing frequencies make the job unbuildable.
#[derive(Debug, Clone)]
pub struct TdoaConfig {
    pub target_freq: Option<f64>,
    pub reference_freq: Option<f64>,
    pub sample_count: u64,
}

impl Default for TdoaConfig {
    fn default() -> Self {
        Self {
            target_freq: None,
            reference_freq: None,
            sample_count: 2_000_000,
        }
    }
}

/// A fully-specified capture job.
#[derive(Debug, Clone)]
pub struct TdoaJob {
    pub reference_freq: f64,
    pub target_freq: f64,
    pub sample_count: u64,
}

impl TdoaJob {
    pub fn from_config(config: &TdoaConfig) -> Result<Self, ConfigError> {
        match (config.reference_freq, config.target_freq) {
            (Some(reference_freq), Some(target_freq)) => Ok(Self {
                reference_freq,
                target_freq,
                sample_count: config.sample_count,
            }),
            _ => Err(ConfigError::MissingFrequency),
        }
    }

    /// Exact byte length the job should deliver.
    pub fn expected_bytes(&self) -> u64 {
        self.sample_count * BYTES_PER_SAMPLE
    }
}

/// Launch the tool and drain its raw output to completion. The returned
/// buffer is truncated to the job's exact length; the tool tends to
/// over-deliver by a partial USB transfer.
pub async fn run_capture(
    tool: &Path,
    device_index: u32,
    job: &TdoaJob,
) -> Result<Vec<u8>, SubprocessError> {
    info!(
        "Starting TDOA capture: ref {:.3} MHz, target {:.3} MHz, {} samples",
        job.reference_freq / 1e6,
        job.target_freq / 1e6,
        job.sample_count
    );

    let mut child = Command::new(tool)
        .args([
            "-f",
            &(job.reference_freq as u64).to_string(),
            "-h",
            &(job.target_freq as u64).to_string(),
            "-d",
            &device_index.to_string(),
            "-g",
            &TOOL_GAIN.to_string(),
            "-p",
            &TOOL_POWER_OFFSET.to_string(),
            "-n",
            &job.sample_count.to_string(),
            "-",
        ])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SubprocessError::Launch {
            tool: tool.display().to_string(),
            reason: e.to_string(),
        })?;

    // the tool logs its device banner on stderr
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    info!("[tdoa-tool] {}", line.trim());
                }
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SubprocessError::Output("failed to capture tool stdout".into()))?;

    let raw = drain_stdout(stdout).await?;

    let _ = child.wait().await;

    if raw.is_empty() {
        warn!("TDOA tool exited without producing samples");
        return Err(SubprocessError::EmptyOutput);
    }

    let truncated = truncate_to_job(raw, job);
    info!("TDOA capture complete: {} bytes", truncated.len());
    Ok(truncated)
}

/// Accumulate stdout in fixed-size reads until end-of-stream.
pub(crate) async fn drain_stdout(mut stdout: ChildStdout) -> Result<Vec<u8>, SubprocessError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stdout
            .read(&mut chunk)
            .await
            .map_err(|e| SubprocessError::Output(e.to_string()))?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

/// Clip over-delivery to exactly `4 x sample_count` bytes.
pub fn truncate_to_job(mut raw: Vec<u8>, job: &TdoaJob) -> Vec<u8> {
    let expected = job.expected_bytes() as usize;
    if raw.len() > expected {
        raw.truncate(expected);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(samples: u64) -> TdoaJob {
        TdoaJob {
            reference_freq: 99.5e6,
            target_freq: 433.92e6,
            sample_count: samples,
        }
    }

    #[test]
    fn test_missing_frequency_is_config_error() {
        let mut config = TdoaConfig::default();
        assert!(TdoaJob::from_config(&config).is_err());

        config.target_freq = Some(433.92e6);
        assert!(TdoaJob::from_config(&config).is_err());

        config.reference_freq = Some(99.5e6);
        let job = TdoaJob::from_config(&config).unwrap();
        assert_eq!(job.sample_count, 2_000_000);
    }

    #[test]
    fn test_truncation_clips_over_delivery() {
        // 1000 samples -> exactly 4000 bytes regardless of over-delivery
        let raw = vec![0u8; 5321];
        assert_eq!(truncate_to_job(raw, &job(1000)).len(), 4000);

        // short delivery is left alone
        let raw = vec![0u8; 100];
        assert_eq!(truncate_to_job(raw, &job(1000)).len(), 100);
    }

    #[tokio::test]
    async fn test_drain_reads_to_eof() {
        // more than two read chunks of zeros from a real subprocess
        let mut child = Command::new("sh")
            .args(["-c", "head -c 9000 /dev/zero"])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let out = drain_stdout(stdout).await.unwrap();
        let _ = child.wait().await;
        assert_eq!(out.len(), 9000);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let missing = PathBuf::from("/nonexistent/rtl_sdr_2freq");
        let err = run_capture(&missing, 0, &job(1000)).await.unwrap_err();
        assert!(matches!(err, SubprocessError::Launch { .. }));
    }
}
