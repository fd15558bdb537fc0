use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::{
    camera::{CameraBackend, FrameSource},
    capture::Capturer,
    detector::Detector,
    error::{Error, ErrorInfo},
    types::{DetectionResult, StillImage},
};

const CAPTURE_FIRST: &str = "Please capture a photo first";
const ALREADY_DETECTING: &str = "A face detection request is already in progress";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CameraActive,
    Captured,
    Detecting,
    Result,
}

/// Identifies one detection request and the capture it was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectTicket {
    request: u64,
    generation: u64,
}

struct Completion {
    ticket: DetectTicket,
    outcome: Result<DetectionResult, Error>,
}

/// Read-only view handed to whatever renders the session.
#[derive(Clone, Debug)]
pub struct WorkflowState {
    pub camera_active: bool,
    pub captured_image: Option<Arc<StillImage>>,
    pub detection_result: Option<Arc<DetectionResult>>,
    pub busy: bool,
    pub error: Option<ErrorInfo>,
}

/// Drives the capture/detect session and is the only place errors stop.
pub struct WorkflowController<B> {
    source: FrameSource<B>,
    capturer: Capturer,
    detector: Arc<dyn Detector>,
    captured: Option<Arc<StillImage>>,
    result: Option<Arc<DetectionResult>>,
    error: Option<ErrorInfo>,
    // Bumped whenever the held capture is replaced or abandoned.
    generation: u64,
    next_request: u64,
    in_flight: Option<DetectTicket>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl<B: CameraBackend> WorkflowController<B> {
    pub fn new(source: FrameSource<B>, capturer: Capturer, detector: Arc<dyn Detector>) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            source,
            capturer,
            detector,
            captured: None,
            result: None,
            error: None,
            generation: 0,
            next_request: 0,
            in_flight: None,
            completion_tx,
            completion_rx,
        }
    }

    pub fn start(&mut self) {
        if self.source.is_active() {
            log::debug!("start ignored, camera already active");
            return;
        }
        match self.source.start() {
            Ok(()) => self.error = None,
            Err(err) => self.fail(err),
        }
    }

    /// Always permitted. Releases the camera and abandons the session; a
    /// request still in flight will be discarded when it lands.
    pub fn stop(&mut self) {
        self.source.stop();
        self.clear_session();
    }

    pub fn capture(&mut self) {
        match self.capturer.capture(self.source.session_mut()) {
            Ok(still) => {
                self.captured = Some(Arc::new(still));
                self.result = None;
                self.error = None;
                self.generation += 1;
            }
            Err(err) => self.fail(err),
        }
    }

    /// Clears capture, result and error. Camera activity is untouched.
    pub fn reset(&mut self) {
        self.clear_session();
    }

    /// Submits the held capture on a worker thread. The outcome is applied by
    /// [`poll`](Self::poll) or [`wait_for_detection`](Self::wait_for_detection).
    pub fn detect(&mut self) {
        let Some((ticket, image)) = self.begin_detect() else {
            return;
        };

        let detector = self.detector.clone();
        let completion_tx = self.completion_tx.clone();
        thread::spawn(move || {
            let outcome = detector.detect(&image);
            let _ = completion_tx.send(Completion { ticket, outcome });
        });
    }

    /// Guards and records the start of a detection request, returning the
    /// image to submit.
    pub fn begin_detect(&mut self) -> Option<(DetectTicket, Arc<StillImage>)> {
        if self.in_flight.is_some() {
            self.fail(Error::InvalidTransition(ALREADY_DETECTING));
            return None;
        }
        let Some(image) = self.captured.clone() else {
            self.fail(Error::InvalidTransition(CAPTURE_FIRST));
            return None;
        };

        self.next_request += 1;
        let ticket = DetectTicket {
            request: self.next_request,
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        self.result = None;
        self.error = None;
        log::debug!("detection request {} dispatched", ticket.request);
        Some((ticket, image))
    }

    /// Applies a finished request. Returns false when the outcome was dropped
    /// because the capture it belongs to is gone.
    pub fn complete_detect(
        &mut self,
        ticket: DetectTicket,
        outcome: Result<DetectionResult, Error>,
    ) -> bool {
        if self.in_flight != Some(ticket) {
            log::warn!("ignoring completion for unknown request {}", ticket.request);
            return false;
        }
        self.in_flight = None;

        if ticket.generation != self.generation {
            log::warn!(
                "discarding stale detection response for request {}",
                ticket.request
            );
            return false;
        }

        match outcome {
            Ok(result) => {
                log::info!("{}", result.label());
                self.result = Some(Arc::new(result));
                self.error = None;
            }
            Err(err) => self.fail(err),
        }
        true
    }

    /// Applies every completion that has already arrived.
    #[allow(dead_code)]
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            if self.complete_detect(completion.ticket, completion.outcome) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks until no request is outstanding or `timeout` passes. Returns
    /// whether the controller is idle.
    pub fn wait_for_detection(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completion_rx.recv_timeout(remaining) {
                Ok(completion) => {
                    self.complete_detect(completion.ticket, completion.outcome);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                // We hold a sender ourselves, so this cannot happen.
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn phase(&self) -> Phase {
        let detecting_current = self
            .in_flight
            .is_some_and(|ticket| ticket.generation == self.generation);

        if self.captured.is_some() && detecting_current {
            Phase::Detecting
        } else if self.result.is_some() {
            Phase::Result
        } else if self.captured.is_some() {
            Phase::Captured
        } else if self.source.is_active() {
            Phase::CameraActive
        } else {
            Phase::Idle
        }
    }

    pub fn state(&self) -> WorkflowState {
        WorkflowState {
            camera_active: self.source.is_active(),
            captured_image: self.captured.clone(),
            detection_result: self.result.clone(),
            busy: self.is_busy(),
            error: self.error.clone(),
        }
    }

    pub fn result_label(&self) -> Option<String> {
        self.result.as_ref().map(|result| result.label())
    }

    fn clear_session(&mut self) {
        self.captured = None;
        self.result = None;
        self.error = None;
        self.generation += 1;
    }

    /// Records a failure. A held result never outlives a later error; the
    /// capture stays so the user can retry.
    fn fail(&mut self, err: Error) {
        let info = ErrorInfo::new(&err);
        log::warn!("{info}");
        self.result = None;
        self.error = Some(info);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crossbeam_channel::bounded;

    use super::*;
    use crate::{
        camera::testing::{FakeBackend, solid_frame},
        config::CameraRequest,
        detector::interpret_response,
        error::ErrorKind,
    };

    const WAIT: Duration = Duration::from_secs(5);

    /// Blocks each request until the test releases a reply for it.
    struct ScriptedDetector {
        calls: Arc<AtomicUsize>,
        replies: Receiver<Result<DetectionResult, Error>>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _image: &StillImage) -> Result<DetectionResult, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .recv()
                .unwrap_or_else(|_| Err(Error::Transport("script ended".into())))
        }
    }

    struct Harness {
        controller: WorkflowController<FakeBackend>,
        backend: FakeBackend,
        calls: Arc<AtomicUsize>,
        replies: Sender<Result<DetectionResult, Error>>,
    }

    impl Harness {
        fn with_backend(backend: FakeBackend) -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let (replies, replies_rx) = bounded(8);
            let detector = ScriptedDetector {
                calls: calls.clone(),
                replies: replies_rx,
            };
            let controller = WorkflowController::new(
                FrameSource::new(backend.clone(), CameraRequest::default()),
                Capturer::default(),
                Arc::new(detector),
            );
            Self {
                controller,
                backend,
                calls,
                replies,
            }
        }

        fn new() -> Self {
            Self::with_backend(FakeBackend::with_frame(solid_frame(16, 8, 90)))
        }

        fn reply(&self, body: &[u8]) {
            self.replies.send(interpret_response(Ok(()), body)).unwrap();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn error_kind(controller: &WorkflowController<FakeBackend>) -> Option<ErrorKind> {
        controller.state().error.map(|err| err.kind)
    }

    #[test]
    fn full_session_reaches_result_and_resets() {
        let mut h = Harness::new();
        assert_eq!(h.controller.phase(), Phase::Idle);

        h.controller.start();
        assert_eq!(h.controller.phase(), Phase::CameraActive);

        h.controller.capture();
        assert_eq!(h.controller.phase(), Phase::Captured);
        let captured = h.controller.state().captured_image.unwrap();
        assert_eq!((captured.width, captured.height), (16, 8));

        h.controller.detect();
        assert_eq!(h.controller.phase(), Phase::Detecting);
        assert!(h.controller.state().busy);

        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":3}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        assert_eq!(h.controller.phase(), Phase::Result);
        assert!(!state.busy);
        assert!(state.error.is_none());
        let result = state.detection_result.unwrap();
        assert_eq!(result.face_count, 3);
        assert_eq!(result.image.base64, "AAA");
        assert_eq!(h.controller.result_label().as_deref(), Some("3 Faces Detected"));

        h.controller.reset();
        let state = h.controller.state();
        assert!(state.captured_image.is_none());
        assert!(state.detection_result.is_none());
        assert!(state.error.is_none());
        assert!(state.camera_active);
        assert_eq!(h.controller.phase(), Phase::CameraActive);
    }

    #[test]
    fn success_round_trip_stores_result() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        h.controller.detect();
        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":2}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        let result = state.detection_result.unwrap();
        assert_eq!(result.image.base64, "AAA");
        assert_eq!(result.face_count, 2);
        assert!(!state.busy);
    }

    #[test]
    fn service_failure_keeps_capture_for_retry() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        let captured = h.controller.state().captured_image.unwrap();

        h.controller.detect();
        h.reply(br#"{"success":false,"message":"no face"}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        let error = state.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Service);
        assert!(error.message.contains("no face"));
        assert!(state.detection_result.is_none());
        assert!(!state.busy);
        assert!(Arc::ptr_eq(&state.captured_image.unwrap(), &captured));
        assert_eq!(h.controller.phase(), Phase::Captured);

        // Retry without recapturing; the new attempt clears the old error.
        h.controller.detect();
        assert!(h.controller.state().error.is_none());
        h.reply(br#"{"success":true,"imageData":"AAAA","faceCount":1}"#);
        assert!(h.controller.wait_for_detection(WAIT));
        assert_eq!(h.controller.phase(), Phase::Result);
        assert_eq!(h.calls(), 2);
    }

    #[test]
    fn detect_without_capture_sends_nothing() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.detect();

        assert_eq!(error_kind(&h.controller), Some(ErrorKind::InvalidTransition));
        assert_eq!(
            h.controller.state().error.unwrap().message,
            "Please capture a photo first"
        );
        assert!(!h.controller.is_busy());
        assert_eq!(h.calls(), 0);
    }

    #[test]
    fn detect_while_busy_is_rejected() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        h.controller.detect();
        h.controller.detect();
        assert_eq!(error_kind(&h.controller), Some(ErrorKind::InvalidTransition));

        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":1}"#);
        assert!(h.controller.wait_for_detection(WAIT));
        assert_eq!(h.calls(), 1);
        // The successful reply supersedes the guard rejection.
        assert!(h.controller.state().error.is_none());
        assert_eq!(h.controller.phase(), Phase::Result);
    }

    #[test]
    fn capture_without_camera_fails_and_keeps_state() {
        let mut h = Harness::new();
        h.controller.capture();

        assert_eq!(error_kind(&h.controller), Some(ErrorKind::NoFrameAvailable));
        assert!(h.controller.state().captured_image.is_none());
        assert_eq!(h.controller.phase(), Phase::Idle);
    }

    #[test]
    fn capture_before_first_frame_stays_camera_active() {
        let mut h = Harness::with_backend(FakeBackend::default());
        h.controller.start();
        h.controller.capture();

        assert_eq!(error_kind(&h.controller), Some(ErrorKind::NoFrameAvailable));
        assert_eq!(h.controller.phase(), Phase::CameraActive);
    }

    #[test]
    fn denied_camera_stays_idle_with_error() {
        let mut h = Harness::with_backend(FakeBackend::denied());
        h.controller.start();

        let state = h.controller.state();
        assert!(!state.camera_active);
        let error = state.error.unwrap();
        assert_eq!(error.kind, ErrorKind::DeviceAccess);
        assert!(error.message.starts_with("Failed to access camera:"));
        assert_eq!(h.controller.phase(), Phase::Idle);
    }

    #[test]
    fn repeated_start_keeps_a_single_session() {
        let mut h = Harness::new();
        for _ in 0..3 {
            h.controller.start();
            h.controller.start();
            assert_eq!(h.backend.live(), 1);
            h.controller.stop();
            assert_eq!(h.backend.live(), 0);
        }
        assert_eq!(h.backend.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_response_after_stop_is_discarded() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        h.controller.detect();

        h.controller.stop();
        assert_eq!(h.controller.phase(), Phase::Idle);
        assert_eq!(h.backend.live(), 0);

        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":5}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        assert!(state.detection_result.is_none());
        assert!(state.captured_image.is_none());
        assert!(state.error.is_none());
        assert!(!state.busy);
        assert_eq!(h.controller.phase(), Phase::Idle);
    }

    fn assert_error_excludes_result(controller: &WorkflowController<FakeBackend>) {
        let state = controller.state();
        assert!(
            !(state.error.is_some() && state.detection_result.is_some()),
            "error and result held together: {state:?}"
        );
    }

    #[test]
    fn failed_retry_from_result_falls_back_to_captured() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        let captured = h.controller.state().captured_image.unwrap();
        h.controller.detect();
        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":2}"#);
        assert!(h.controller.wait_for_detection(WAIT));
        assert_eq!(h.controller.phase(), Phase::Result);

        h.controller.detect();
        assert_eq!(h.controller.phase(), Phase::Detecting);
        assert!(h.controller.state().detection_result.is_none());
        assert_error_excludes_result(&h.controller);

        // Rejected while the retry is outstanding.
        h.controller.detect();
        assert_eq!(error_kind(&h.controller), Some(ErrorKind::InvalidTransition));
        assert_error_excludes_result(&h.controller);

        h.reply(br#"{"success":false,"message":"no face"}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        assert!(state.error.as_ref().unwrap().message.contains("no face"));
        assert!(state.detection_result.is_none());
        assert!(Arc::ptr_eq(&state.captured_image.unwrap(), &captured));
        assert_eq!(h.controller.phase(), Phase::Captured);
        assert_eq!(h.calls(), 2);
    }

    #[test]
    fn failed_capture_from_result_drops_the_result() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        let (ticket, _image) = h.controller.begin_detect().unwrap();
        let outcome = interpret_response(
            Ok(()),
            br#"{"success":true,"imageData":"AAA","faceCount":1}"#,
        );
        assert!(h.controller.complete_detect(ticket, outcome));

        // Without a camera the next capture has no frame.
        h.controller.source.stop();
        h.controller.capture();

        assert_eq!(error_kind(&h.controller), Some(ErrorKind::NoFrameAvailable));
        assert_error_excludes_result(&h.controller);
        assert!(h.controller.state().captured_image.is_some());
    }

    #[test]
    fn late_failure_after_reset_is_discarded() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        h.controller.detect();
        h.controller.reset();

        // The abandoned request still counts as outstanding.
        h.controller.capture();
        h.controller.detect();
        assert_eq!(error_kind(&h.controller), Some(ErrorKind::InvalidTransition));

        h.reply(br#"{"success":false,"message":"no face"}"#);
        assert!(h.controller.wait_for_detection(WAIT));

        let state = h.controller.state();
        assert!(state.error.as_ref().is_some_and(|e| !e.message.contains("no face")));
        assert!(state.detection_result.is_none());
        assert!(state.captured_image.is_some());
        assert_eq!(h.controller.phase(), Phase::Captured);
        assert_eq!(h.calls(), 1);
    }

    #[test]
    fn completion_for_replaced_capture_is_ignored() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        let (ticket, _image) = h.controller.begin_detect().unwrap();

        h.controller.capture();
        let outcome = interpret_response(
            Ok(()),
            br#"{"success":true,"imageData":"AAA","faceCount":4}"#,
        );
        assert!(!h.controller.complete_detect(ticket, outcome));
        assert!(h.controller.state().detection_result.is_none());
        assert!(!h.controller.is_busy());

        // A ticket that was never issued changes nothing either.
        let bogus = DetectTicket {
            request: 99,
            generation: 0,
        };
        assert!(!h.controller.complete_detect(bogus, Err(Error::Transport("x".into()))));
        assert!(h.controller.state().error.is_none());
    }

    #[test]
    fn poll_applies_arrived_completions() {
        let mut h = Harness::new();
        h.controller.start();
        h.controller.capture();
        h.controller.detect();
        h.reply(br#"{"success":true,"imageData":"AAA","faceCount":0}"#);

        let deadline = Instant::now() + WAIT;
        while h.controller.poll() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(h.controller.result_label().as_deref(), Some("0 Faces Detected"));
    }

    #[test]
    fn dropping_the_controller_releases_the_camera() {
        let h = Harness::new();
        let backend = h.backend.clone();
        let mut controller = h.controller;
        controller.start();
        assert_eq!(backend.live(), 1);
        drop(controller);
        assert_eq!(backend.live(), 0);
    }
}
