use crate::error::ScanError;
use crate::hydro::config::DecoderSettings;
use crate::hydro::store::IndexEntry;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// A decoded recording: amplitude samples at `sampling_rate` Hz covering
/// `[start_time, end_time]`.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub samples: Vec<f64>,
    pub sampling_rate: f64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// Opens one indexed recording, optionally decimating it by an integer
/// factor. The waveform format itself is somebody else's problem.
pub trait RecordLoader {
    fn load(
        &self,
        entry: &IndexEntry,
        decimation_factor: Option<u32>,
    ) -> Result<DecodedRecord, ScanError>;
}

/// Shells out to a decoder binary that fetches the recording and prints a
/// JSON payload on stdout:
///
/// ```json
/// {"sampling_rate": 64000.0,
///  "starttime": "2016-01-15T00:00:00.000000",
///  "endtime": "2016-01-15T00:05:00.000000",
///  "samples": [0.0, 0.1]}
/// ```
pub struct CommandRecordLoader {
    bin: PathBuf,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct DecodedPayload {
    sampling_rate: f64,
    starttime: String,
    endtime: String,
    samples: Vec<f64>,
}

impl CommandRecordLoader {
    pub fn from_settings(settings: &DecoderSettings) -> Result<Self, ScanError> {
        let bin = resolve_decoder_bin(Path::new(&settings.bin))?;
        let timeout = match settings.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(Self { bin, timeout })
    }
}

fn resolve_decoder_bin(bin: &Path) -> Result<PathBuf, ScanError> {
    if bin.exists() {
        return Ok(bin.to_path_buf());
    }
    which::which(bin).map_err(|_| ScanError::DecoderMissing(bin.display().to_string()))
}

fn parse_payload_time(raw: &str, url: &str) -> Result<NaiveDateTime, ScanError> {
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f").map_err(
        |err| ScanError::Decode {
            url: url.to_string(),
            reason: format!("bad payload timestamp {raw}: {err}"),
        },
    )
}

fn run_with_optional_timeout(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> std::io::Result<Output> {
    let Some(timeout) = timeout else {
        return cmd.output();
    };
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let started = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return child.wait_with_output();
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("decoder timed out after {}s", timeout.as_secs()),
            ));
        }
        thread::sleep(Duration::from_millis(50));
    }
}

impl RecordLoader for CommandRecordLoader {
    fn load(
        &self,
        entry: &IndexEntry,
        decimation_factor: Option<u32>,
    ) -> Result<DecodedRecord, ScanError> {
        let url = entry.record_url();
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--url").arg(&url).arg("--format").arg("json");
        if let Some(factor) = decimation_factor {
            cmd.arg("--decimate").arg(factor.to_string());
        }

        let output =
            run_with_optional_timeout(&mut cmd, self.timeout).map_err(|err| ScanError::Decode {
                url: url.clone(),
                reason: format!("failed to run {}: {err}", self.bin.display()),
            })?;
        if !output.status.success() {
            return Err(ScanError::Decode {
                url,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let payload: DecodedPayload =
            serde_json::from_slice(&output.stdout).map_err(|err| ScanError::Decode {
                url: url.clone(),
                reason: format!("invalid payload json: {err}"),
            })?;
        if !(payload.sampling_rate > 0.0) {
            return Err(ScanError::Decode {
                url,
                reason: format!("non-positive sampling rate {}", payload.sampling_rate),
            });
        }

        Ok(DecodedRecord {
            sampling_rate: payload.sampling_rate,
            start_time: parse_payload_time(&payload.starttime, &url)?,
            end_time: parse_payload_time(&payload.endtime, &url)?,
            samples: payload.samples,
        })
    }
}
