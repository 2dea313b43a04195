//! Detector backed by an external model-serving process.
//!
//! Per request the child receives one JSON header line followed by the raw
//! RGBA pixels on stdin:
//!
//! ```text
//! {"width":640,"height":480,"threshold":0.5,"percentage":true}\n
//! <width * height * 4 bytes>
//! ```
//!
//! and answers with one JSON line on stdout: either an array of
//! `{score,label,box}` objects or `{"error":"..."}`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::StreamExt;
use image::RgbaImage;
use live_detect_common::config::DetectorConfig;
use live_detect_common::detection::DetectionResult;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::detector::{DetectOptions, Detector, DetectorError, DetectorLoader, ProgressSink};

#[derive(Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    threshold: f32,
    percentage: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectorReply {
    Detections(Vec<DetectionResult>),
    Failure { error: String },
}

struct ChildIo {
    // Held so the child is killed when the detector is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildIo {
    fn start(command: &str, args: &[String], model_path: &Path) -> Result<Self, DetectorError> {
        let mut child = Command::new(command)
            .args(args)
            .arg(model_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DetectorError::Spawn(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DetectorError::Spawn("could not get stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DetectorError::Spawn("could not get stdout handle".into()))?;

        info!(
            command,
            model = model_path.display().to_string(),
            pid = child.id(),
            "detector process started"
        );

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Send one request and read its reply line.
    async fn exchange(&mut self, header: &[u8], pixels: &[u8]) -> Result<String, DetectorError> {
        self.stdin.write_all(header).await?;
        self.stdin.write_all(pixels).await?;
        self.stdin.flush().await?;

        let mut reply = String::new();
        if self.stdout.read_line(&mut reply).await? == 0 {
            return Err(DetectorError::Protocol(
                "detector process closed its output".into(),
            ));
        }
        Ok(reply)
    }
}

/// Detector speaking to a child process.
///
/// A failed exchange leaves the pipes at an unknown offset, so the child is
/// discarded and a fresh one is started on the next request.
pub struct ProcessDetector {
    command: String,
    args: Vec<String>,
    model_path: PathBuf,
    io: Mutex<Option<ChildIo>>,
    restarts: AtomicU32,
}

impl ProcessDetector {
    /// Spawn the detector process with `args` and the model path appended.
    pub async fn spawn(
        command: &str,
        args: &[String],
        model_path: &Path,
    ) -> Result<Self, DetectorError> {
        let io = ChildIo::start(command, args, model_path)?;
        Ok(Self {
            command: command.to_string(),
            args: args.to_vec(),
            model_path: model_path.to_path_buf(),
            io: Mutex::new(Some(io)),
            restarts: AtomicU32::new(0),
        })
    }

    /// How many times the child has been replaced after a broken exchange.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl Detector for ProcessDetector {
    async fn detect(
        &self,
        image: &RgbaImage,
        options: DetectOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        let header = FrameHeader {
            width: image.width(),
            height: image.height(),
            threshold: options.threshold,
            percentage: options.percentage,
        };
        let mut line = serde_json::to_vec(&header)
            .map_err(|e| DetectorError::Protocol(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.io.lock().await;
        if guard.is_none() {
            let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(command = %self.command, restarts, "restarting detector process");
            *guard = Some(ChildIo::start(&self.command, &self.args, &self.model_path)?);
        }
        let io = guard
            .as_mut()
            .ok_or_else(|| DetectorError::Spawn("detector process unavailable".into()))?;
        let reply = match io.exchange(&line, image.as_raw()).await {
            Ok(reply) => reply,
            Err(e) => {
                *guard = None;
                warn!(
                    command = %self.command,
                    error = %e,
                    "detector pipes broken, child will be restarted on the next request"
                );
                return Err(e);
            }
        };
        drop(guard);

        match serde_json::from_str::<DetectorReply>(reply.trim_end())
            .map_err(|e| DetectorError::Protocol(format!("unparseable reply: {e}")))?
        {
            DetectorReply::Detections(detections) => {
                debug!(count = detections.len(), "detector replied");
                Ok(detections)
            }
            DetectorReply::Failure { error } => Err(DetectorError::Inference(error)),
        }
    }

    fn name(&self) -> &str {
        &self.command
    }
}

/// Materializes model weights, then starts a [`ProcessDetector`].
pub struct ProcessDetectorLoader {
    config: DetectorConfig,
    client: reqwest::Client,
}

impl ProcessDetectorLoader {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

impl DetectorLoader for ProcessDetectorLoader {
    type Detector = ProcessDetector;

    async fn load(&self, progress: ProgressSink) -> Result<ProcessDetector, DetectorError> {
        let model_path = self.config.model_path();
        if let Some(url) = &self.config.model_url {
            ensure_model(&self.client, url, &model_path, &progress).await?;
        }
        ProcessDetector::spawn(&self.config.command, &self.config.args, &model_path).await
    }
}

/// Download `url` to `path` unless it is already cached, reporting percent
/// progress per chunk when the server sends a content length.
pub async fn ensure_model(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    progress: &ProgressSink,
) -> Result<(), DetectorError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = path.display().to_string(), "model already cached");
        progress.report(100.0);
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    info!(url, path = path.display().to_string(), "downloading model");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DetectorError::Download(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DetectorError::Download(format!("HTTP status {}", response.status())));
    }

    let total = response.content_length();
    let partial = partial_path(path);
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    warn!(error = %rm, "failed to remove partial model download");
                }
                return Err(DetectorError::Download(e.to_string()));
            }
        };
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if let Some(total) = total.filter(|t| *t > 0) {
            progress.report(received as f64 * 100.0 / total as f64);
        }
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, path).await?;

    info!(bytes = received, path = path.display().to_string(), "model downloaded");
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
