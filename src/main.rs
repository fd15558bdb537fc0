mod camera;
mod capture;
mod config;
mod detector;
mod error;
mod types;
mod workflow;

use anyhow::Result;

#[cfg(feature = "camera-nokhwa")]
fn main() -> Result<()> {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use anyhow::{Context, bail};

    use crate::{
        camera::{FrameSource, native::NativeBackend},
        capture::Capturer,
        config::AppConfig,
        detector::HttpDetector,
        workflow::{Phase, WorkflowController},
    };

    const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

    env_logger::init();

    let config = AppConfig::default();
    let detector =
        HttpDetector::new(&config.detector).context("failed to build detection client")?;
    if let Err(err) = detector.health() {
        log::warn!("detection service at {} looks unhealthy: {err}", config.detector.base_url);
    }

    let mut controller = WorkflowController::new(
        FrameSource::new(NativeBackend, config.camera.clone()),
        Capturer::new(config.capture.clone()),
        Arc::new(detector),
    );

    controller.start();
    if let Some(err) = controller.state().error {
        bail!("{err}");
    }

    // The device needs a moment before the first frame is decoded.
    let deadline = Instant::now() + FIRST_FRAME_TIMEOUT;
    loop {
        controller.capture();
        if controller.phase() == Phase::Captured || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    if let Some(err) = controller.state().error {
        controller.stop();
        bail!("{err}");
    }

    controller.detect();
    let finished = controller.wait_for_detection(config.detector.timeout + Duration::from_secs(1));
    let state = controller.state();
    let label = controller.result_label();
    controller.stop();

    if !finished {
        bail!("detection did not finish in time");
    }
    if let Some(err) = state.error {
        bail!("{err}");
    }
    if let Some(label) = label {
        println!("{label}");
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn main() -> Result<()> {
    env_logger::init();
    anyhow::bail!("built without a camera backend; enable the `camera-nokhwa` feature")
}
