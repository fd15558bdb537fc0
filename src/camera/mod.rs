#[cfg(feature = "camera-nokhwa")]
pub mod native;
pub mod rgba_converter;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::{config::CameraRequest, error::Error, types::Frame};

/// Handle to a running capture thread. Stopping (or dropping) it signals the
/// thread and joins it, which releases the device.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Runs `worker` on its own thread. The worker must return once the flag
    /// it is given becomes true.
    pub fn spawn<F>(worker: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || worker(stop_flag));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host media subsystem. Implementations push decoded frames into `frame_tx`
/// until the returned stream is stopped.
pub trait CameraBackend {
    fn open(&mut self, request: &CameraRequest, frame_tx: Sender<Frame>)
    -> Result<CameraStream, Error>;
}

/// One active camera acquisition.
#[derive(Debug)]
pub struct CameraSession {
    stream: CameraStream,
    frame_rx: Receiver<Frame>,
    latest: Option<Frame>,
}

impl CameraSession {
    /// Newest decoded frame, if the device has delivered one yet.
    pub fn current_frame(&mut self) -> Option<&Frame> {
        while let Ok(newer) = self.frame_rx.try_recv() {
            self.latest = Some(newer);
        }
        self.latest.as_ref()
    }

    fn release(self) {
        self.stream.stop();
    }
}

/// Sole owner of the camera. At most one session exists at a time.
pub struct FrameSource<B> {
    backend: B,
    request: CameraRequest,
    session: Option<CameraSession>,
}

impl<B: CameraBackend> FrameSource<B> {
    pub fn new(backend: B, request: CameraRequest) -> Self {
        Self {
            backend,
            request,
            session: None,
        }
    }

    /// Acquires the camera. An existing session is released first so two
    /// acquisitions never overlap; on failure no session remains.
    pub fn start(&mut self) -> Result<(), Error> {
        self.stop();

        let (frame_tx, frame_rx) = bounded(1);
        let stream = self.backend.open(&self.request, frame_tx)?;
        log::info!(
            "camera started (ideal {}x{}, facing {})",
            self.request.ideal_width,
            self.request.ideal_height,
            self.request.facing.label()
        );

        self.session = Some(CameraSession {
            stream,
            frame_rx,
            latest: None,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.release();
            log::info!("camera stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Option<&mut CameraSession> {
        self.session.as_mut()
    }
}

impl<B> Drop for FrameSource<B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.release();
        }
    }
}
