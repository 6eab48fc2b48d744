//! Caption records and the contract with the external captioner.
//!
//! A caption is either a [`CaptionRecord`] (usable text) or a
//! [`CaptionFailure`]; only the former can reach the indexing pipeline.

use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::CoreError;
use crate::error::Result;

/// Prefix the captioner historically wrote into `caption` instead of failing.
pub const ERROR_MARKER: &str = "[ERROR]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub image_id: String,
    pub image_path: String,
    pub caption: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionFailure {
    pub image_id: String,
    pub image_path: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

pub type CaptionOutcome = std::result::Result<CaptionRecord, CaptionFailure>;

/// Error reported by a [`Captioner`]. The captioner decides which failures
/// are worth another attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptionError {
    /// Network hiccup, rate limit, timeout.
    #[error("transient caption error: {0}")]
    Transient(String),
    /// Unreadable image, rejected request, empty model answer.
    #[error("caption error: {0}")]
    Permanent(String),
}

impl CaptionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptionError::Transient(_))
    }
}

/// External vision-language model that describes one image.
pub trait Captioner {
    fn caption(&self, image_path: &Path) -> std::result::Result<String, CaptionError>;
}

/// Exit status (`EX_TEMPFAIL`) a caption command uses to ask for a retry.
pub const EXIT_TEMPFAIL: i32 = 75;

/// Captions by running `program [args..] <image path>` and reading stdout.
///
/// Exit [`EXIT_TEMPFAIL`] is transient; a spawn failure or any other nonzero
/// exit is permanent, with stderr as the reason.
#[derive(Debug, Clone)]
pub struct CommandCaptioner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCaptioner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl Captioner for CommandCaptioner {
    fn caption(&self, image_path: &Path) -> std::result::Result<String, CaptionError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .map_err(|e| CaptionError::Permanent(format!("cannot run {}: {e}", self.program.display())))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("{} exited with {}", self.program.display(), output.status)
        } else {
            stderr
        };
        match output.status.code() {
            Some(EXIT_TEMPFAIL) => Err(CaptionError::Transient(reason)),
            _ => Err(CaptionError::Permanent(reason)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Delay before retry `n` is `backoff[n - 1]`; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn no_backoff(max_attempts: usize) -> Self {
        Self { max_attempts, backoff: Vec::new() }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let i = attempt.saturating_sub(1).min(self.backoff.len() - 1);
        self.backoff[i]
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: vec![Duration::from_secs(2)] }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptionSettings {
    pub retry: RetryPolicy,
    /// Sleep between consecutive images.
    pub pacing: Duration,
}

/// File name without its extension, e.g. `data/images/000123.jpg` -> `000123`.
pub fn image_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Caption one image, retrying retryable errors per `policy`.
pub fn caption_image(captioner: &dyn Captioner, path: &Path, policy: &RetryPolicy) -> CaptionOutcome {
    let image_id = image_id_from_path(path);
    let image_path = path.to_string_lossy().to_string();
    let attempts = policy.max_attempts.max(1);
    let mut last_err = CaptionError::Permanent("no attempt made".to_string());

    for attempt in 1..=attempts {
        match captioner.caption(path) {
            Ok(text) => {
                let caption = text.trim().to_string();
                if caption.is_empty() {
                    last_err = CaptionError::Permanent("no caption returned".to_string());
                    break;
                }
                return Ok(CaptionRecord { image_id, image_path, caption, timestamp: Utc::now() });
            }
            Err(e) => {
                let retry = e.is_retryable() && attempt < attempts;
                warn!(image_id = %image_id, attempt, retry, "caption failed: {e}");
                last_err = e;
                if !retry {
                    break;
                }
                let delay = policy.delay_after(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }

    Err(CaptionFailure { image_id, image_path, reason: last_err.to_string(), timestamp: Utc::now() })
}

/// Caption `paths` sequentially, in order.
pub fn caption_batch<P: AsRef<Path>>(
    captioner: &dyn Captioner,
    paths: &[P],
    settings: &CaptionSettings,
) -> Vec<CaptionOutcome> {
    let mut out = Vec::with_capacity(paths.len());
    for (i, p) in paths.iter().enumerate() {
        if i > 0 && !settings.pacing.is_zero() {
            std::thread::sleep(settings.pacing);
        }
        out.push(caption_image(captioner, p.as_ref(), &settings.retry));
    }
    out
}

/// Split outcomes into usable records and failures, preserving order.
pub fn partition_outcomes(outcomes: Vec<CaptionOutcome>) -> (Vec<CaptionRecord>, Vec<CaptionFailure>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for o in outcomes {
        match o {
            Ok(r) => ok.push(r),
            Err(f) => failed.push(f),
        }
    }
    (ok, failed)
}

/// One line of a caption file. Failures carry `error`; older files put
/// [`ERROR_MARKER`] in `caption` instead.
#[derive(Serialize, Deserialize)]
struct CaptionLine {
    image_id: String,
    image_path: String,
    #[serde(default)]
    caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl From<CaptionLine> for CaptionOutcome {
    fn from(line: CaptionLine) -> Self {
        let text = line.caption.trim();
        let reason = match (line.error.as_deref(), text.strip_prefix(ERROR_MARKER)) {
            (Some(err), _) => Some(err.trim().to_string()),
            (None, Some(rest)) => Some(rest.trim().to_string()),
            (None, None) if text.is_empty() => Some("empty caption".to_string()),
            (None, None) => None,
        };
        match reason {
            Some(reason) => Err(CaptionFailure {
                image_id: line.image_id,
                image_path: line.image_path,
                reason,
                timestamp: line.timestamp,
            }),
            None => Ok(CaptionRecord {
                image_id: line.image_id,
                image_path: line.image_path,
                caption: text.to_string(),
                timestamp: line.timestamp,
            }),
        }
    }
}

impl From<&CaptionOutcome> for CaptionLine {
    fn from(outcome: &CaptionOutcome) -> Self {
        match outcome {
            Ok(r) => CaptionLine {
                image_id: r.image_id.clone(),
                image_path: r.image_path.clone(),
                caption: r.caption.clone(),
                error: None,
                timestamp: r.timestamp,
            },
            Err(f) => CaptionLine {
                image_id: f.image_id.clone(),
                image_path: f.image_path.clone(),
                caption: String::new(),
                error: Some(f.reason.clone()),
                timestamp: f.timestamp,
            },
        }
    }
}

/// Write `outcomes` as one JSON object per line, replacing any existing file.
pub fn write_caption_file(path: &Path, outcomes: &[CaptionOutcome]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    for outcome in outcomes {
        serde_json::to_writer(&mut writer, &CaptionLine::from(outcome)).map_err(std::io::Error::from)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    debug!(path = %path.display(), lines = outcomes.len(), "wrote caption file");
    Ok(())
}

/// Read captioner output (one JSON object per line). Blank lines are
/// skipped; a line that is not a caption object fails the whole read.
pub fn read_caption_file(path: &Path) -> Result<Vec<CaptionOutcome>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: CaptionLine = serde_json::from_str(&line)
            .map_err(|e| CoreError::CaptionFile { line: i + 1, reason: e.to_string() })?;
        out.push(parsed.into());
    }
    Ok(out)
}
