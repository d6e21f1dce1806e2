use super::fetcher::{Fetcher, ProgressFn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROGRESS_MARKER: &str = "[grabby:progress]";
const FILE_MARKER: &str = "[grabby:file]";

/// Number of trailing stderr lines kept for error reports.
const ERROR_TAIL_LINES: usize = 5;

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(f64),
    File(PathBuf),
    Other,
}

fn parse_output_line(line: &str) -> OutputLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        // yt-dlp prints "N/A" or "Unknown %" when the total size is unknown
        return match rest.trim().trim_end_matches('%').trim().parse::<f64>() {
            Ok(percent) if percent.is_finite() => {
                OutputLine::Progress((percent / 100.0).clamp(0.0, 1.0))
            }
            _ => OutputLine::Other,
        };
    }

    match line.strip_prefix(FILE_MARKER) {
        Some(path) if !path.trim().is_empty() => OutputLine::File(PathBuf::from(path.trim())),
        _ => OutputLine::Other,
    }
}

/// Pick the finished file: the path yt-dlp reported, then `dest`, then the only
/// completed file in the staging directory.
async fn resolve_output(dest: &Path, reported: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = reported {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
        warn!("yt-dlp reported {} but it does not exist", path.display());
    }

    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        return Ok(dest.to_path_buf());
    }

    let dir = dest
        .parent()
        .context("Destination has no parent directory")?;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context("Failed to inspect staging directory")?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let partial = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "part" | "ytdl" | "temp"));
        if entry.file_type().await?.is_file() && !partial {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(anyhow::anyhow!("yt-dlp finished without producing a file")),
        n => Err(anyhow::anyhow!(
            "yt-dlp left {} files and did not report which one is final",
            n
        )),
    }
}

pub struct YtDlpFetcher {
    program: String,
    leading_args: Vec<String>,
}

impl YtDlpFetcher {
    #[cfg(test)]
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_args(program, Vec::new())
    }

    /// Run yt-dlp through another program, e.g. `python3 -m yt_dlp`.
    pub fn with_args(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    fn command(&self, url: &str, dest: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("--newline")
            .arg("--progress")
            .arg("--no-colors")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--no-simulate")
            .arg("--progress-template")
            .arg(format!("download:{} %(progress._percent_str)s", PROGRESS_MARKER))
            .arg("--print")
            .arg(format!("after_move:{}%(filepath)s", FILE_MARKER))
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg(dest)
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn probe(program: &str, version_flag: &str) -> Result<String> {
        let output = Command::new(program)
            .arg(version_flag)
            .output()
            .await
            .with_context(|| format!("{} not found", program))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("{} {} failed", program, version_flag));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string())
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, url: &str, dest: &Path, on_progress: ProgressFn) -> Result<PathBuf> {
        info!(host = %crate::utils::source_host(url), "Fetching media with yt-dlp");

        let mut child = self
            .command(url, dest)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let stdout = child.stdout.take().context("Failed to get yt-dlp stdout")?;
        let stderr = child.stderr.take().context("Failed to get yt-dlp stderr")?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut reported = None;
        let mut error_tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES);
        let mut stdout_open = true;
        let mut stderr_open = true;

        // Progress can land on either stream depending on yt-dlp's quiet mode.
        while stdout_open || stderr_open {
            let (line, from_stderr) = tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => {
                    (line.context("Failed to read yt-dlp stdout")?, false)
                }
                line = stderr_lines.next_line(), if stderr_open => {
                    (line.context("Failed to read yt-dlp stderr")?, true)
                }
            };

            let Some(line) = line else {
                if from_stderr {
                    stderr_open = false;
                } else {
                    stdout_open = false;
                }
                continue;
            };

            match parse_output_line(&line) {
                OutputLine::Progress(fraction) => on_progress(fraction),
                OutputLine::File(path) => reported = Some(path),
                OutputLine::Other if from_stderr && !line.trim().is_empty() => {
                    debug!("yt-dlp: {}", line);
                    if error_tail.len() == ERROR_TAIL_LINES {
                        error_tail.pop_front();
                    }
                    error_tail.push_back(line.trim().to_string());
                }
                OutputLine::Other => debug!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        if !status.success() {
            let detail = if error_tail.is_empty() {
                "no error output".to_string()
            } else {
                Vec::from(error_tail).join("\n")
            };
            return Err(anyhow::anyhow!(detail).context(format!("yt-dlp exited with {}", status)));
        }

        resolve_output(dest, reported).await
    }

    async fn test_availability(&self) -> bool {
        let yt_dlp_available = match Self::probe(&self.program, "--version").await {
            Ok(version) if self.leading_args.is_empty() => {
                info!("✅ yt-dlp is available, version: {}", version);
                true
            }
            // Wrapped invocations (e.g. `python3 -m yt_dlp`) are trusted as configured
            Ok(_) => true,
            Err(e) => {
                warn!("❌ yt-dlp not usable: {:#}", e);
                false
            }
        };

        // ffmpeg is needed to merge separate audio and video streams
        match Self::probe("ffmpeg", "-version").await {
            Ok(version_line) => info!("✅ ffmpeg is available: {}", version_line),
            Err(e) => warn!(
                "❌ ffmpeg not usable: {:#} (formats that need merging will fail)",
                e
            ),
        }

        yt_dlp_available
    }
}
