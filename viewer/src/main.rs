mod display;
mod font;
mod gate;
mod overlay;
mod render;
mod source;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use live_detect_common::channel;
use live_detect_common::config::Config;
use live_detect_worker::{join_with_grace, InferenceTask, LazyDetector, ProcessDetectorLoader};
use tracing::{error, info};

use crate::display::SnapshotDisplay;
use crate::render::RenderLoop;

/// How long the inference task gets to finish its current request after
/// the render loop stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.source.mode,
        detector = config.detector.command,
        render_fps = config.render.fps,
        "starting live-detect viewer"
    );

    let (loop_end, task_end) = channel::channel();

    let detector = Arc::new(LazyDetector::new(ProcessDetectorLoader::new(
        config.detector.clone(),
    )));
    let task = InferenceTask::new(detector, task_end).spawn();

    let (frame_tx, feed) = source::live_feed();
    let feed_task = match config.source.mode.as_str() {
        "http" => source::spawn_http_feed(frame_tx, config.source.url.clone(), config.source.fps),
        _ => source::spawn_pattern_feed(
            frame_tx,
            config.source.width,
            config.source.height,
            config.source.fps,
        ),
    };

    let display = SnapshotDisplay::new(
        config.render.snapshot_path.clone(),
        config.render.snapshot_every,
    );
    let render = RenderLoop::new(feed, display, loop_end, &config.render);

    let stats = render
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    feed_task.abort();
    // Dropping the loop endpoint ends the task once it finishes its request.
    if let Some(summary) = join_with_grace(task, SHUTDOWN_GRACE).await {
        info!(
            requests = summary.requests,
            completed = summary.completed,
            failed = summary.failed,
            frames_released = summary.frames_released,
            bytes_released = summary.bytes_released,
            "inference task finished"
        );
    }

    info!(
        ticks = stats.ticks,
        dispatched = stats.dispatched,
        "viewer stopped"
    );
}
