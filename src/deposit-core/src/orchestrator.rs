//! Capture session orchestrator
//!
//! Sequences camera acquisition, the detection loop, the countdown, still
//! capture and field extraction for one capture session. Everything runs on
//! a single task: commands, timer ticks and collaborator completions are
//! multiplexed in one `select!` loop, so every state transition happens in
//! one place.
//!
//! Collaborator calls run as local tasks and report back tagged with the
//! session epoch. Retake, cancel and page hide bump the epoch, which makes
//! any result still in flight stale on arrival.

use std::rc::Rc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use deposit_capture::{
    CameraBackend, CameraSessionManager, CaptureError, Frame, HandleId, PreviewSink,
    ReleaseReason, VideoStream,
};
use deposit_ocr::{FieldExtractor, MicrFields, OcrEngine, OcrError};
use deposit_vision::{ContourReport, CropRequest, DetectionResult, DocumentDetector, VisionError};

use crate::config::CaptureConfig;
use crate::countdown::{CaptureCountdown, CountdownTick};
use crate::detection::{Classification, DetectionStatus};
use crate::handoff::{CaptureHandoff, NextScreen};
use crate::ready::Readiness;
use crate::session::{CameraState, Phase, SessionSnapshot, SessionState, Step};

const EVENT_CAPACITY: usize = 128;

/// Input from the screen hosting the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Retake,
    Cancel,
    Back,
    Continue,
    PageHidden,
    PageVisible,
    NavigatedAway,
    Unload,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    HandedOff,
    Cancelled,
    Back,
    NavigatedAway,
    Unloaded,
    /// The controller was dropped
    TornDown,
}

/// Notable things that happened in a session, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(DetectionStatus),
    CameraAcquired(HandleId),
    CameraDenied(String),
    CameraReleased(ReleaseReason),
    CountdownTick(u8),
    CountdownCancelled,
    CaptureSkipped,
    Captured { width: u32, height: u32, cropped: bool },
    FieldsExtracted(MicrFields),
    Completed,
    HandedOff,
    Ended(SessionOutcome),
}

/// Results of collaborator calls, tagged with the epoch that started them
enum Completion<S> {
    CameraOpened {
        epoch: u64,
        result: Result<S, CaptureError>,
    },
    Detected {
        epoch: u64,
        frame_area: u64,
        result: Result<ContourReport, VisionError>,
    },
    Cropped {
        epoch: u64,
        original: Frame,
        result: Result<Frame, VisionError>,
    },
    Extracted {
        epoch: u64,
        result: Result<MicrFields, OcrError>,
    },
}

/// Handle used by the hosting screen. Dropping it tears the session down.
pub struct CaptureController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl CaptureController {
    pub fn send(&self, command: Command) -> bool {
        let sent = self.commands.send(command).is_ok();
        if !sent {
            debug!("{:?} ignored: session already ended", command);
        }
        sent
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn retake(&self) {
        self.send(Command::Retake);
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    pub fn back(&self) {
        self.send(Command::Back);
    }

    /// Hand the capture to the next screen. Ignored until capture completes.
    pub fn continue_to_next(&self) {
        self.send(Command::Continue);
    }

    pub fn page_hidden(&self) {
        self.send(Command::PageHidden);
    }

    pub fn page_visible(&self) {
        self.send(Command::PageVisible);
    }

    pub fn navigated_away(&self) {
        self.send(Command::NavigatedAway);
    }

    pub fn unload(&self) {
        self.send(Command::Unload);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Coordinator for one capture session
pub struct CaptureOrchestrator<B, D, E, N>
where
    B: CameraBackend,
{
    config: CaptureConfig,
    camera: CameraSessionManager<B>,
    detector: Readiness<D>,
    ocr: Readiness<E>,
    extractor: FieldExtractor,
    next_screen: N,
    state: SessionState,
    countdown: CaptureCountdown,
    detection_timer: Option<Interval>,
    countdown_timer: Option<Interval>,
    completions_tx: mpsc::UnboundedSender<Completion<B::Stream>>,
    completions_rx: mpsc::UnboundedReceiver<Completion<B::Stream>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
    outcome: Option<SessionOutcome>,
}

impl<B, D, E, N> CaptureOrchestrator<B, D, E, N>
where
    B: CameraBackend + 'static,
    D: DocumentDetector + 'static,
    E: OcrEngine + 'static,
    N: NextScreen + 'static,
{
    pub fn new(
        config: CaptureConfig,
        camera: B,
        preview: Rc<dyn PreviewSink>,
        detector: Readiness<D>,
        ocr: Readiness<E>,
        next_screen: N,
    ) -> Self {
        let camera = CameraSessionManager::new(camera, config.camera.constraints(), preview);
        let extractor = config.ocr.extractor();
        let countdown = CaptureCountdown::new(config.countdown.start);
        let state = SessionState::default();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            camera,
            detector,
            ocr,
            extractor,
            next_screen,
            state,
            countdown,
            detection_timer: None,
            countdown_timer: None,
            completions_tx,
            completions_rx,
            snapshot_tx,
            events_tx,
            outcome: None,
        }
    }

    /// Run the session as a local task. Must be called inside a
    /// `tokio::task::LocalSet`.
    pub fn spawn(self) -> (CaptureController, JoinHandle<SessionOutcome>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let controller = CaptureController {
            commands: commands_tx,
            snapshot: self.snapshot_tx.subscribe(),
            events: self.events_tx.clone(),
        };

        let handle = tokio::task::spawn_local(self.run(commands_rx));
        (controller, handle)
    }

    /// Process commands, ticks and completions until the session ends
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> SessionOutcome {
        debug!("capture session task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.end(SessionOutcome::TornDown, ReleaseReason::Teardown),
                },
                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
                _ = next_tick(&mut self.detection_timer) => self.on_detection_tick(),
                _ = next_tick(&mut self.countdown_timer) => self.on_countdown_tick(),
            }

            self.snapshot_tx.send_replace(self.state.snapshot());

            if let Some(outcome) = self.outcome {
                info!("capture session ended: {:?}", outcome);
                return outcome;
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        debug!("{:?} in {:?}", command, self.state.phase);

        match command {
            Command::Start => self.start(),
            Command::Retake => self.retake(),
            Command::Cancel => self.end(SessionOutcome::Cancelled, ReleaseReason::Cancel),
            Command::Back => self.end(SessionOutcome::Back, ReleaseReason::Back),
            Command::Continue => self.hand_off(),
            Command::PageHidden => self.suspend(),
            Command::PageVisible => self.resume(),
            Command::NavigatedAway => {
                self.end(SessionOutcome::NavigatedAway, ReleaseReason::NavigatedAway)
            }
            Command::Unload => self.end(SessionOutcome::Unloaded, ReleaseReason::Unload),
        }
    }

    fn handle_completion(&mut self, done: Completion<B::Stream>) {
        match done {
            Completion::CameraOpened { epoch, result } => self.on_camera_opened(epoch, result),
            Completion::Detected {
                epoch,
                frame_area,
                result,
            } => self.on_detected(epoch, frame_area, result),
            Completion::Cropped {
                epoch,
                original,
                result,
            } => self.on_cropped(epoch, original, result),
            Completion::Extracted { epoch, result } => self.on_extracted(epoch, result),
        }
    }

    // ---- session control ----

    fn start(&mut self) {
        match self.state.phase {
            Phase::Idle | Phase::CameraDenied => self.acquire_camera(),
            phase => debug!("start ignored in {:?}", phase),
        }
    }

    fn retake(&mut self) {
        info!("retake requested in {:?}", self.state.phase);

        self.state.next_epoch();
        self.stop_countdown();
        self.release_camera(ReleaseReason::Retake);
        self.state.clear_capture();
        self.acquire_camera();
    }

    fn end(&mut self, outcome: SessionOutcome, reason: ReleaseReason) {
        self.state.next_epoch();
        self.stop_countdown();
        self.release_camera(reason);
        self.state.phase = Phase::Cancelled;

        self.emit(SessionEvent::Ended(outcome));
        self.outcome = Some(outcome);
    }

    fn hand_off(&mut self) {
        if self.state.step != Step::Complete || self.state.phase != Phase::Complete {
            debug!("continue ignored in {:?}", self.state.phase);
            return;
        }

        let Some(image) = self.state.front_image.clone() else {
            warn!("capture complete without a still image, continue ignored");
            return;
        };

        let front_image_data_uri = match image.to_data_uri(self.config.capture.jpeg_quality) {
            Ok(uri) => uri,
            Err(e) => {
                error!("failed to encode captured still: {}", e);
                return;
            }
        };

        self.release_camera(ReleaseReason::Continue);
        self.next_screen.present(CaptureHandoff {
            front_image_data_uri,
            front_fields: self.state.front_fields.clone(),
        });
        info!("capture handed to next screen");

        self.state.phase = Phase::Finished;
        self.emit(SessionEvent::HandedOff);
        self.emit(SessionEvent::Ended(SessionOutcome::HandedOff));
        self.outcome = Some(SessionOutcome::HandedOff);
    }

    fn suspend(&mut self) {
        if !self.state.phase.uses_camera() {
            // A still being cropped no longer needs the stream
            if self.camera.is_live() {
                self.release_camera(ReleaseReason::PageHidden);
            }
            return;
        }

        info!("page hidden, pausing camera");
        self.state.next_epoch();
        self.stop_countdown();
        self.release_camera(ReleaseReason::PageHidden);
        self.state.phase = Phase::Suspended;
        self.set_status(DetectionStatus::Paused);
    }

    fn resume(&mut self) {
        if self.state.phase == Phase::Suspended && self.state.step != Step::Complete {
            info!("page visible, restarting camera");
            self.acquire_camera();
        }
    }

    // ---- camera ----

    fn acquire_camera(&mut self) {
        let epoch = self.state.epoch;
        self.state.phase = Phase::CameraInitializing;
        self.state.camera = CameraState::Initializing;
        self.set_status(DetectionStatus::InitializingCamera);

        let open = self.camera.open_stream();
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            let result = open.await;
            if let Err(mpsc::error::SendError(Completion::CameraOpened {
                result: Ok(mut stream),
                ..
            })) = tx.send(Completion::CameraOpened { epoch, result })
            {
                // Session is gone; nobody else will stop this stream
                if let Err(e) = stream.stop() {
                    warn!("failed to stop orphaned stream: {}", e);
                }
            }
        });
    }

    fn on_camera_opened(&mut self, epoch: u64, result: Result<B::Stream, CaptureError>) {
        if !self.state.is_current(epoch) || self.state.phase != Phase::CameraInitializing {
            debug!("camera result for stale epoch {} ignored", epoch);
            if let Ok(stream) = result {
                self.camera.discard(stream);
            }
            return;
        }

        match result {
            Ok(stream) => {
                let id = self.camera.install(stream);
                self.state.camera = CameraState::Ready;
                self.state.phase = Phase::Detecting;
                self.emit(SessionEvent::CameraAcquired(id));
                self.set_status(DetectionStatus::PositionDocument);
                self.start_detection_timer();
            }
            Err(e) => {
                warn!("camera unavailable: {}", e);
                self.state.camera = CameraState::Denied;
                self.state.phase = Phase::CameraDenied;
                self.emit(SessionEvent::CameraDenied(e.to_string()));
                self.set_status(DetectionStatus::CameraDenied);
            }
        }
    }

    /// Single release path for every exit route
    fn release_camera(&mut self, reason: ReleaseReason) {
        self.detection_timer = None;

        if self.camera.release(reason) {
            self.emit(SessionEvent::CameraReleased(reason));
        }
        if self.state.camera != CameraState::Uninitialized {
            self.state.camera = CameraState::Released;
        }
    }

    // ---- detection loop ----

    fn start_detection_timer(&mut self) {
        let period = self.config.detection.interval();
        let mut timer = time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.detection_timer = Some(timer);
    }

    fn on_detection_tick(&mut self) {
        if !self.state.detection_eligible() {
            if let Some(running) = self.state.detection_in_flight {
                debug!("detection from epoch {} still running, tick skipped", running);
            }
            return;
        }

        let Some(detector) = self.detector.get() else {
            debug!("detector not initialized yet");
            return;
        };

        let Some(frame) = self.camera.current_frame().filter(|frame| !frame.is_empty()) else {
            debug!("stream has no frame data yet");
            return;
        };

        let epoch = self.state.epoch;
        self.state.detection_in_flight = Some(epoch);
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            let frame_area = frame.area();
            let result = detector.detect(&frame).await;
            let _ = tx.send(Completion::Detected {
                epoch,
                frame_area,
                result,
            });
        });
    }

    fn on_detected(
        &mut self,
        epoch: u64,
        frame_area: u64,
        result: Result<ContourReport, VisionError>,
    ) {
        // Whatever its epoch, the call is over
        self.state.detection_in_flight = None;

        if !self.state.is_current(epoch) {
            debug!("detection for stale epoch {} ignored", epoch);
            return;
        }

        if self.state.phase != Phase::Detecting {
            return;
        }

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                debug!("detection failed, treated as no detection: {}", e);
                return;
            }
        };

        let detection = DetectionResult::from_report(&report, frame_area);
        let class = Classification::of(&detection, self.config.detection.min_document_ratio);
        debug!(
            "detected={} ratio={:.3} -> {:?}",
            detection.detected, detection.size_ratio, class
        );

        self.set_status(class.status());

        if class == Classification::Capture && !self.countdown.is_active() {
            self.state.crop_hint = detection.bounds;
            self.begin_countdown();
        }
    }

    // ---- countdown ----

    fn begin_countdown(&mut self) {
        let Some(value) = self.countdown.start() else {
            return;
        };

        info!("document in frame, counting down from {}", value);
        self.state.phase = Phase::CountingDown;
        self.state.countdown = Some(value);
        self.emit(SessionEvent::CountdownTick(value));

        let period = self.config.countdown.tick();
        let mut timer = time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.countdown_timer = Some(timer);
    }

    fn on_countdown_tick(&mut self) {
        if self.state.phase != Phase::CountingDown {
            self.stop_countdown();
            return;
        }

        match self.countdown.tick() {
            CountdownTick::Remaining(value) => {
                self.state.countdown = Some(value);
                self.emit(SessionEvent::CountdownTick(value));
            }
            CountdownTick::Finished => {
                self.countdown_timer = None;
                self.state.countdown = None;
                self.emit(SessionEvent::CountdownTick(0));
                self.set_status(DetectionStatus::Extracting);
                self.capture_still();
            }
            CountdownTick::Inactive => {
                self.countdown_timer = None;
            }
        }
    }

    fn stop_countdown(&mut self) {
        let was_counting = self.countdown.is_active();
        self.countdown.cancel();
        self.countdown_timer = None;
        self.state.countdown = None;

        if was_counting {
            self.emit(SessionEvent::CountdownCancelled);
        }
    }

    // ---- still capture ----

    fn capture_still(&mut self) {
        let Some(frame) = self.camera.current_frame().filter(|frame| !frame.is_empty()) else {
            warn!("capture skipped: stream has no frame data, waiting for next detection");
            self.emit(SessionEvent::CaptureSkipped);
            self.state.phase = Phase::Detecting;
            self.set_status(DetectionStatus::PositionDocument);
            return;
        };

        self.state.phase = Phase::Capturing;
        self.camera.freeze_preview(&frame);

        let Some(detector) = self.detector.get() else {
            debug!("cropping unavailable, keeping full frame");
            self.on_still_ready(frame, false);
            return;
        };

        let request = CropRequest {
            hint: self.state.crop_hint,
            padding: self.config.capture.crop_padding_px,
        };
        let epoch = self.state.epoch;
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            let result = detector.crop_to_bounds(&frame, request).await;
            let _ = tx.send(Completion::Cropped {
                epoch,
                original: frame,
                result,
            });
        });
    }

    fn on_cropped(&mut self, epoch: u64, original: Frame, result: Result<Frame, VisionError>) {
        if !self.state.is_current(epoch) || self.state.phase != Phase::Capturing {
            debug!("crop for stale epoch {} ignored", epoch);
            return;
        }

        match result {
            Ok(cropped) if !cropped.is_empty() => self.on_still_ready(cropped, true),
            Ok(_) => {
                debug!("crop produced an empty image, keeping full frame");
                self.on_still_ready(original, false);
            }
            Err(e) => {
                debug!("crop failed, keeping full frame: {}", e);
                self.on_still_ready(original, false);
            }
        }
    }

    fn on_still_ready(&mut self, image: Frame, cropped: bool) {
        info!("captured {}x{} still (cropped: {})", image.width, image.height, cropped);
        self.emit(SessionEvent::Captured {
            width: image.width,
            height: image.height,
            cropped,
        });

        let image = Rc::new(image);
        self.state.front_image = Some(Rc::clone(&image));

        // Front capture is final
        self.release_camera(ReleaseReason::CaptureComplete);

        if self.state.step != Step::Front {
            return;
        }
        self.state.phase = Phase::Extracting;

        let Some(engine) = self.ocr.get() else {
            warn!("OCR engine unavailable, completing without fields");
            self.complete(MicrFields::default());
            return;
        };

        let extractor = self.extractor.clone();
        let epoch = self.state.epoch;
        let tx = self.completions_tx.clone();
        tokio::task::spawn_local(async move {
            let result = extractor.extract(engine.as_ref(), &image).await;
            let _ = tx.send(Completion::Extracted { epoch, result });
        });
    }

    fn on_extracted(&mut self, epoch: u64, result: Result<MicrFields, OcrError>) {
        if !self.state.is_current(epoch) || self.state.phase != Phase::Extracting {
            debug!("extraction for stale epoch {} ignored", epoch);
            return;
        }

        let fields = match result {
            Ok(fields) => fields,
            Err(OcrError::EmptyResult) => {
                warn!("OCR returned no text, fields left empty");
                MicrFields::default()
            }
            Err(e) => {
                warn!("field extraction failed, fields left empty: {}", e);
                MicrFields::default()
            }
        };

        self.complete(fields);
    }

    fn complete(&mut self, fields: MicrFields) {
        self.emit(SessionEvent::FieldsExtracted(fields.clone()));
        self.state.front_fields = fields;
        self.state.step = Step::Complete;
        self.state.phase = Phase::Complete;
        self.set_status(DetectionStatus::Complete);
        self.emit(SessionEvent::Completed);
        info!("capture complete");
    }

    // ---- observers ----

    fn set_status(&mut self, status: DetectionStatus) {
        if self.state.status != status {
            debug!("status: {}", status);
            self.state.status = status.clone();
            self.emit(SessionEvent::Status(status));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready::Initializer;
    use deposit_capture::{NullPreview, StreamConstraints};
    use deposit_ocr::RecognitionRegion;
    use deposit_vision::Bounds;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::task::LocalSet;

    const FRAME_WIDTH: u32 = 100;
    const FRAME_HEIGHT: u32 = 50;
    const MICR_TEXT: &str = "PAY TO THE ORDER OF\n123456789 9876543 001234 56.78\n";

    fn picture() -> Frame {
        Frame::from_rgba(
            FRAME_WIDTH,
            FRAME_HEIGHT,
            vec![200; (FRAME_WIDTH * FRAME_HEIGHT * 4) as usize],
        )
        .unwrap()
    }

    fn blank() -> Frame {
        Frame::from_rgba(0, 0, Vec::new()).unwrap()
    }

    /// Contour covering `ratio` of the test frame
    fn report(ratio: f64) -> ContourReport {
        ContourReport {
            has_contour: ratio > 0.0,
            area: ratio * (FRAME_WIDTH * FRAME_HEIGHT) as f64,
            corner_count: 4,
            bounds: Some(Bounds { x: 10, y: 5, width: 80, height: 40 }),
        }
    }

    // ---- fakes ----

    struct CameraRig {
        opened: Cell<u32>,
        stopped: Cell<u32>,
        deny: Cell<bool>,
        open_delay: Cell<Duration>,
        picture: RefCell<Frame>,
    }

    impl CameraRig {
        fn live(&self) -> u32 {
            self.opened.get() - self.stopped.get()
        }
    }

    struct FakeStream {
        rig: Rc<CameraRig>,
        live: bool,
    }

    impl VideoStream for FakeStream {
        fn current_frame(&self) -> Option<Frame> {
            self.live.then(|| self.rig.picture.borrow().clone())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            if self.live {
                self.live = false;
                self.rig.stopped.set(self.rig.stopped.get() + 1);
            }
            Ok(())
        }

        fn is_live(&self) -> bool {
            self.live
        }

        fn track_count(&self) -> usize {
            1
        }
    }

    struct FakeCamera(Rc<CameraRig>);

    impl CameraBackend for FakeCamera {
        type Stream = FakeStream;

        async fn open(&self, _constraints: &StreamConstraints) -> Result<FakeStream, CaptureError> {
            let delay = self.0.open_delay.get();
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            if self.0.deny.get() {
                return Err(CaptureError::AccessDenied("permission dismissed".into()));
            }
            self.0.opened.set(self.0.opened.get() + 1);
            Ok(FakeStream {
                rig: Rc::clone(&self.0),
                live: true,
            })
        }
    }

    struct DetectorRig {
        calls: Cell<u32>,
        reports: RefCell<VecDeque<ContourReport>>,
        fallback: Cell<ContourReport>,
        delay: Cell<Duration>,
        /// Detection calls running right now, and the most ever seen at once
        running: Cell<u32>,
        max_running: Cell<u32>,
        crop_delay: Cell<Duration>,
        crop_fails: Cell<bool>,
    }

    struct FakeDetector(Rc<DetectorRig>);

    impl DocumentDetector for FakeDetector {
        async fn detect(&self, _frame: &Frame) -> Result<ContourReport, VisionError> {
            self.0.calls.set(self.0.calls.get() + 1);
            self.0.running.set(self.0.running.get() + 1);
            self.0
                .max_running
                .set(self.0.max_running.get().max(self.0.running.get()));

            let delay = self.0.delay.get();
            if !delay.is_zero() {
                time::sleep(delay).await;
            }

            self.0.running.set(self.0.running.get() - 1);
            let next = self.0.reports.borrow_mut().pop_front();
            Ok(next.unwrap_or_else(|| self.0.fallback.get()))
        }

        async fn crop_to_bounds(
            &self,
            _frame: &Frame,
            request: CropRequest,
        ) -> Result<Frame, VisionError> {
            let delay = self.0.crop_delay.get();
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            if self.0.crop_fails.get() {
                return Err(VisionError::NoDocument);
            }
            let bounds = request.hint.ok_or(VisionError::NoDocument)?;
            Ok(Frame::from_rgba(
                bounds.width,
                bounds.height,
                vec![255; bounds.area() as usize * 4],
            )
            .unwrap())
        }
    }

    struct OcrRig {
        calls: Cell<u32>,
        delay: Cell<Duration>,
        text: RefCell<Option<String>>,
    }

    struct FakeOcr(Rc<OcrRig>);

    impl OcrEngine for FakeOcr {
        async fn recognize(
            &self,
            _image: &Frame,
            _region: RecognitionRegion,
            _whitelist: &str,
        ) -> Result<String, OcrError> {
            self.0.calls.set(self.0.calls.get() + 1);
            let delay = self.0.delay.get();
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            self.0
                .text
                .borrow()
                .clone()
                .ok_or_else(|| OcrError::Unavailable("engine crashed".into()))
        }
    }

    struct RecordingScreen(Rc<RefCell<Vec<CaptureHandoff>>>);

    impl NextScreen for RecordingScreen {
        fn present(&self, handoff: CaptureHandoff) {
            self.0.borrow_mut().push(handoff);
        }
    }

    // ---- harness ----

    struct Rigs {
        camera: Rc<CameraRig>,
        detector: Rc<DetectorRig>,
        ocr: Rc<OcrRig>,
        handoffs: Rc<RefCell<Vec<CaptureHandoff>>>,
    }

    impl Rigs {
        fn new(detection: ContourReport) -> Self {
            Self {
                camera: Rc::new(CameraRig {
                    opened: Cell::new(0),
                    stopped: Cell::new(0),
                    deny: Cell::new(false),
                    open_delay: Cell::new(Duration::ZERO),
                    picture: RefCell::new(picture()),
                }),
                detector: Rc::new(DetectorRig {
                    calls: Cell::new(0),
                    reports: RefCell::new(VecDeque::new()),
                    fallback: Cell::new(detection),
                    delay: Cell::new(Duration::ZERO),
                    running: Cell::new(0),
                    max_running: Cell::new(0),
                    crop_delay: Cell::new(Duration::ZERO),
                    crop_fails: Cell::new(false),
                }),
                ocr: Rc::new(OcrRig {
                    calls: Cell::new(0),
                    delay: Cell::new(Duration::ZERO),
                    text: RefCell::new(Some(MICR_TEXT.to_string())),
                }),
                handoffs: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn detector(&self) -> Readiness<FakeDetector> {
            Readiness::ready(FakeDetector(Rc::clone(&self.detector)))
        }

        fn ocr(&self) -> Readiness<FakeOcr> {
            Readiness::ready(FakeOcr(Rc::clone(&self.ocr)))
        }

        fn spawn_with(
            &self,
            detector: Readiness<FakeDetector>,
            ocr: Readiness<FakeOcr>,
        ) -> Session {
            let orchestrator = CaptureOrchestrator::new(
                CaptureConfig::default(),
                FakeCamera(Rc::clone(&self.camera)),
                Rc::new(NullPreview),
                detector,
                ocr,
                RecordingScreen(Rc::clone(&self.handoffs)),
            );
            let (controller, handle) = orchestrator.spawn();
            let events = controller.subscribe();
            Session {
                controller,
                handle,
                events,
            }
        }

        fn spawn(&self) -> Session {
            self.spawn_with(self.detector(), self.ocr())
        }
    }

    struct Session {
        controller: CaptureController,
        handle: JoinHandle<SessionOutcome>,
        events: broadcast::Receiver<SessionEvent>,
    }

    impl Session {
        /// Collect events up to and including the first one matching `want`
        async fn until(&mut self, want: impl Fn(&SessionEvent) -> bool) -> Vec<SessionEvent> {
            let mut seen = Vec::new();
            loop {
                let event = time::timeout(Duration::from_secs(120), self.events.recv())
                    .await
                    .expect("timed out waiting for session event")
                    .expect("event stream closed");
                let done = want(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut seen = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                seen.push(event);
            }
            seen
        }

        async fn run_to_complete(&mut self) -> Vec<SessionEvent> {
            self.controller.start();
            self.until(|e| *e == SessionEvent::Completed).await
        }

        async fn settle(&self) {
            // Let the session task process what was sent
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn countdown_values(events: &[SessionEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::CountdownTick(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    // ---- end to end ----

    #[tokio::test(start_paused = true)]
    async fn test_detection_countdown_capture_extract() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.controller.start();

                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                let acquired_at = Instant::now();

                let mut ticks = Vec::new();
                loop {
                    let event = session
                        .until(|e| {
                            matches!(e, SessionEvent::CountdownTick(_) | SessionEvent::Completed)
                        })
                        .await;
                    match event.last() {
                        Some(SessionEvent::CountdownTick(v)) => ticks.push((*v, Instant::now())),
                        _ => break,
                    }
                }

                let values: Vec<u8> = ticks.iter().map(|(v, _)| *v).collect();
                assert_eq!(values, vec![3, 2, 1, 0]);
                assert_eq!(ticks[0].1 - acquired_at, Duration::from_millis(2000));
                for pair in ticks.windows(2) {
                    assert_eq!(pair[1].1 - pair[0].1, Duration::from_millis(750));
                }

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.step, Step::Complete);
                assert_eq!(snapshot.phase, Phase::Complete);
                assert_eq!(snapshot.camera, CameraState::Released);
                assert_eq!(snapshot.status, DetectionStatus::Complete);
                assert_eq!(snapshot.front_fields.routing_number.as_deref(), Some("123456789"));
                assert_eq!(snapshot.front_fields.account_number.as_deref(), Some("9876543"));
                assert_eq!(snapshot.front_fields.check_number.as_deref(), Some("001234"));
                assert_eq!(snapshot.front_fields.amount.as_deref(), Some("56.78"));

                // Cropped to the detection hint
                let image = snapshot.front_image.expect("still stored");
                assert_eq!((image.width, image.height), (80, 40));

                // No detection ran during the countdown
                assert_eq!(rigs.detector.calls.get(), 1);
                assert_eq!(rigs.ocr.calls.get(), 1);
                assert_eq!(rigs.camera.live(), 0);

                session.controller.continue_to_next();
                assert_eq!(session.handle.await.unwrap(), SessionOutcome::HandedOff);

                let handoffs = rigs.handoffs.borrow();
                assert_eq!(handoffs.len(), 1);
                assert!(handoffs[0].front_image_data_uri.starts_with("data:image/jpeg;base64,"));
                assert_eq!(handoffs[0].front_fields, snapshot.front_fields);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_sequence() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();

                let events = session.run_to_complete().await;
                let statuses: Vec<DetectionStatus> = events
                    .iter()
                    .filter_map(|e| match e {
                        SessionEvent::Status(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect();

                assert_eq!(
                    statuses,
                    vec![
                        DetectionStatus::InitializingCamera,
                        DetectionStatus::PositionDocument,
                        DetectionStatus::HoldStill,
                        DetectionStatus::Extracting,
                        DetectionStatus::Complete,
                    ]
                );
                assert!(events.contains(&SessionEvent::CameraReleased(ReleaseReason::CaptureComplete)));
                assert!(events.contains(&SessionEvent::Captured {
                    width: 80,
                    height: 40,
                    cropped: true
                }));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_document_reports_percentages() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.3));
                let mut session = rigs.spawn();
                session.controller.start();

                let events = session
                    .until(|e| matches!(e, SessionEvent::Status(DetectionStatus::TooSmall { .. })))
                    .await;
                let Some(SessionEvent::Status(status)) = events.last() else {
                    panic!("expected a status event");
                };
                let text = status.to_string();
                assert!(text.contains("30%"), "{}", text);
                assert!(text.contains("45%"), "{}", text);

                time::sleep(Duration::from_millis(4500)).await;
                assert_eq!(rigs.detector.calls.get(), 3);
                assert!(countdown_values(&session.drain()).is_empty());
                assert_eq!(session.controller.snapshot().phase, Phase::Detecting);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_moves_closer() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.6));
                rigs
                    .detector
                    .reports
                    .borrow_mut()
                    .extend([report(0.0), report(0.2)]);
                let mut session = rigs.spawn();

                let events = session.run_to_complete().await;
                assert!(events.contains(&SessionEvent::Status(DetectionStatus::PositionDocument)));
                assert!(events.contains(&SessionEvent::Status(DetectionStatus::TooSmall {
                    observed_pct: 20,
                    required_pct: 45
                })));
                assert_eq!(rigs.detector.calls.get(), 3);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_denied() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.camera.deny.set(true);
                let mut session = rigs.spawn();
                session.controller.start();

                session.until(|e| matches!(e, SessionEvent::CameraDenied(_))).await;
                time::sleep(Duration::from_secs(10)).await;

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.camera, CameraState::Denied);
                assert_eq!(snapshot.phase, Phase::CameraDenied);
                assert_eq!(snapshot.status, DetectionStatus::CameraDenied);
                assert_eq!(rigs.detector.calls.get(), 0);
                assert!(countdown_values(&session.drain()).is_empty());

                // Manual retry succeeds once access is granted
                rigs.camera.deny.set(false);
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                assert_eq!(session.controller.snapshot().camera, CameraState::Ready);
            })
            .await;
    }

    // ---- retake ----

    #[tokio::test(start_paused = true)]
    async fn test_retake_after_complete() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.run_to_complete().await;

                session.controller.retake();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.step, Step::Front);
                assert!(snapshot.front_image.is_none());
                assert_eq!(snapshot.front_fields, MicrFields::default());
                assert_eq!(snapshot.camera, CameraState::Ready);
                assert_eq!(snapshot.phase, Phase::Detecting);
                assert_eq!(rigs.camera.opened.get(), 2);
                assert_eq!(rigs.camera.live(), 1);

                // And the new session captures again
                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(rigs.ocr.calls.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_during_countdown() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| *e == SessionEvent::CountdownTick(2)).await;

                session.controller.retake();
                let events = session
                    .until(|e| matches!(e, SessionEvent::CameraAcquired(_)))
                    .await;
                assert!(events.contains(&SessionEvent::CountdownCancelled));
                assert!(events.contains(&SessionEvent::CameraReleased(ReleaseReason::Retake)));
                assert!(!events.iter().any(|e| matches!(e, SessionEvent::Captured { .. })));

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.countdown, None);
                assert!(!snapshot.is_counting_down);
                assert_eq!(snapshot.step, Step::Front);
                assert_eq!(rigs.camera.live(), 1);

                // The cancelled countdown never fires; a fresh one runs in full
                let events = session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(countdown_values(&events), vec![3, 2, 1, 0]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_discards_inflight_detection() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.detector.delay.set(Duration::from_secs(3));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                // First detection starts at 2s and resolves at 5s
                time::sleep(Duration::from_millis(2500)).await;
                assert_eq!(rigs.detector.calls.get(), 1);

                session.controller.retake();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                // Past the stale result's arrival at 5s; the 4.5s tick was
                // skipped while it was still running
                time::sleep(Duration::from_millis(3000)).await;
                let events = session.drain();
                assert!(countdown_values(&events).is_empty(), "{:?}", events);
                assert_eq!(session.controller.snapshot().phase, Phase::Detecting);
                assert_eq!(rigs.detector.calls.get(), 1);

                let events = session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(countdown_values(&events), vec![3, 2, 1, 0]);
                assert_eq!(rigs.detector.calls.get(), 2);
                assert_eq!(rigs.detector.max_running.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_waits_for_running_detection() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                rigs.detector.delay.set(Duration::from_secs(5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                // First call runs from 2s to 7s
                time::sleep(Duration::from_millis(2100)).await;
                session.controller.retake();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                // New timer ticks at 4.1s and 6.1s while the old call runs
                time::sleep(Duration::from_millis(2100)).await;
                assert_eq!(rigs.detector.calls.get(), 1);
                time::sleep(Duration::from_millis(3300)).await;
                assert_eq!(rigs.detector.calls.get(), 1);

                // 8.1s tick is the first one after the stale call returned
                time::sleep(Duration::from_millis(700)).await;
                assert_eq!(rigs.detector.calls.get(), 2);
                assert_eq!(rigs.detector.max_running.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_hide_and_show_waits_for_running_detection() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                rigs.detector.delay.set(Duration::from_secs(5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                time::sleep(Duration::from_millis(2100)).await;
                session.controller.page_hidden();
                session.controller.page_visible();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                time::sleep(Duration::from_millis(2100)).await;
                assert_eq!(rigs.detector.calls.get(), 1);

                time::sleep(Duration::from_millis(4000)).await;
                assert_eq!(rigs.detector.calls.get(), 2);
                assert_eq!(rigs.detector.max_running.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_after_camera_denied() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.camera.deny.set(true);
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraDenied(_))).await;

                rigs.camera.deny.set(false);
                session.controller.retake();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.camera, CameraState::Ready);
                assert_eq!(snapshot.phase, Phase::Detecting);
                assert_eq!(rigs.camera.live(), 1);

                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(rigs.camera.live(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retake_while_suspended() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                session.controller.page_hidden();
                session
                    .until(|e| *e == SessionEvent::CameraReleased(ReleaseReason::PageHidden))
                    .await;
                session.settle().await;
                assert_eq!(session.controller.snapshot().phase, Phase::Suspended);

                session.controller.retake();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                assert_eq!(rigs.camera.opened.get(), 2);
                assert_eq!(rigs.camera.live(), 1);

                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(session.controller.snapshot().step, Step::Complete);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_hide_while_cropping_keeps_capture() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.detector.crop_delay.set(Duration::from_millis(500));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| *e == SessionEvent::CountdownTick(0)).await;

                session.controller.page_hidden();
                session
                    .until(|e| *e == SessionEvent::CameraReleased(ReleaseReason::PageHidden))
                    .await;
                assert_eq!(rigs.camera.live(), 0);

                let events = session.until(|e| *e == SessionEvent::Completed).await;
                assert!(events.contains(&SessionEvent::Captured {
                    width: 80,
                    height: 40,
                    cropped: true
                }));

                session.controller.page_visible();
                session.settle().await;
                assert_eq!(rigs.camera.opened.get(), 1);
                assert_eq!(session.controller.snapshot().phase, Phase::Complete);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_hide_while_extracting_is_ignored() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.ocr.delay.set(Duration::from_millis(500));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::Captured { .. })).await;

                session.controller.page_hidden();
                session.controller.page_visible();
                let events = session.until(|e| *e == SessionEvent::Completed).await;
                assert!(!events.contains(&SessionEvent::CameraReleased(ReleaseReason::PageHidden)));

                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.front_fields.routing_number.as_deref(), Some("123456789"));
                assert_eq!(rigs.camera.opened.get(), 1);
                assert_eq!(rigs.camera.live(), 0);
            })
            .await;
    }

    // ---- cancel / back / teardown ----

    #[derive(Debug, Clone, Copy)]
    enum Stage {
        Idle,
        Initializing,
        Detecting,
        CountingDown,
        Extracting,
        Complete,
    }

    async fn cancel_at(stage: Stage, back: bool) {
        let rigs = Rigs::new(report(0.5));
        rigs.camera.open_delay.set(Duration::from_millis(300));
        rigs.detector.delay.set(Duration::from_millis(10));
        let mut session = rigs.spawn();

        match stage {
            Stage::Idle => {}
            Stage::Initializing => {
                session.controller.start();
                session
                    .until(|e| *e == SessionEvent::Status(DetectionStatus::InitializingCamera))
                    .await;
            }
            Stage::Detecting => {
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
            }
            Stage::CountingDown => {
                session.controller.start();
                session.until(|e| *e == SessionEvent::CountdownTick(3)).await;
            }
            Stage::Extracting => {
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::Captured { .. })).await;
            }
            Stage::Complete => {
                session.run_to_complete().await;
            }
        }

        if back {
            session.controller.back();
        } else {
            session.controller.cancel();
        }
        let outcome = session.handle.await.unwrap();
        assert_eq!(
            outcome,
            if back { SessionOutcome::Back } else { SessionOutcome::Cancelled },
            "{:?}",
            stage
        );

        // Let any stream still being opened resolve
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rigs.camera.live(), 0, "{:?}", stage);
        assert!(rigs.handoffs.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_from_every_state_releases_camera() {
        LocalSet::new()
            .run_until(async {
                for stage in [
                    Stage::Idle,
                    Stage::Initializing,
                    Stage::Detecting,
                    Stage::CountingDown,
                    Stage::Extracting,
                    Stage::Complete,
                ] {
                    cancel_at(stage, false).await;
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_from_every_state_releases_camera() {
        LocalSet::new()
            .run_until(async {
                for stage in [Stage::Initializing, Stage::Detecting, Stage::CountingDown] {
                    cancel_at(stage, true).await;
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_exits_release_camera() {
        LocalSet::new()
            .run_until(async {
                for (command, outcome) in [
                    (Command::NavigatedAway, SessionOutcome::NavigatedAway),
                    (Command::Unload, SessionOutcome::Unloaded),
                ] {
                    let rigs = Rigs::new(report(0.5));
                    let mut session = rigs.spawn();
                    session.controller.start();
                    session.until(|e| *e == SessionEvent::CountdownTick(3)).await;

                    session.controller.send(command);
                    let events = session.until(|e| matches!(e, SessionEvent::Ended(_))).await;
                    assert_eq!(events.last(), Some(&SessionEvent::Ended(outcome)));
                    assert_eq!(session.handle.await.unwrap(), outcome);
                    assert_eq!(rigs.camera.live(), 0);
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_controller_tears_down() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                assert_eq!(rigs.camera.live(), 1);

                let Session { controller, handle, .. } = session;
                drop(controller);
                assert_eq!(handle.await.unwrap(), SessionOutcome::TornDown);
                assert_eq!(rigs.camera.live(), 0);
            })
            .await;
    }

    // ---- continue ----

    #[tokio::test(start_paused = true)]
    async fn test_continue_before_complete_is_ignored() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                session.settle().await;
                session.drain();

                let before = session.controller.snapshot();
                session.controller.continue_to_next();
                session.settle().await;

                assert_eq!(session.controller.snapshot(), before);
                assert!(session.drain().is_empty());
                assert!(rigs.handoffs.borrow().is_empty());
                assert_eq!(rigs.ocr.calls.get(), 0);
                assert_eq!(rigs.camera.live(), 1);
                assert!(!session.handle.is_finished());
            })
            .await;
    }

    // ---- collaborator failures ----

    #[tokio::test(start_paused = true)]
    async fn test_detector_unavailable_until_initialized() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let (detector, init): (Readiness<FakeDetector>, Initializer<FakeDetector>) =
                    Readiness::pending();
                let mut session = rigs.spawn_with(detector, rigs.ocr());
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                time::sleep(Duration::from_secs(7)).await;
                assert_eq!(rigs.detector.calls.get(), 0);
                assert_eq!(
                    session.controller.snapshot().status,
                    DetectionStatus::PositionDocument
                );

                init.resolve(FakeDetector(Rc::clone(&rigs.detector)));
                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(rigs.detector.calls.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detections_never_overlap() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                rigs.detector.delay.set(Duration::from_secs(5));
                let session = rigs.spawn();
                session.controller.start();

                // Call at 2s resolves at 7s; ticks at 4s and 6s are skipped,
                // the 8s tick starts the second call
                time::sleep(Duration::from_millis(9000)).await;
                assert_eq!(rigs.detector.calls.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_crop_failure_keeps_full_frame() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                rigs.detector.crop_fails.set(true);
                let mut session = rigs.spawn();

                let events = session.run_to_complete().await;
                assert!(events.contains(&SessionEvent::Captured {
                    width: FRAME_WIDTH,
                    height: FRAME_HEIGHT,
                    cropped: false
                }));

                let snapshot = session.controller.snapshot();
                let image = snapshot.front_image.expect("still stored");
                assert_eq!((image.width, image.height), (FRAME_WIDTH, FRAME_HEIGHT));
                assert_eq!(snapshot.step, Step::Complete);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ocr_failures_leave_fields_empty() {
        LocalSet::new()
            .run_until(async {
                for text in [None, Some("  \n".to_string())] {
                    let rigs = Rigs::new(report(0.5));
                    *rigs.ocr.text.borrow_mut() = text;
                    let mut session = rigs.spawn();

                    let events = session.run_to_complete().await;
                    assert!(events.contains(&SessionEvent::FieldsExtracted(MicrFields::default())));

                    let snapshot = session.controller.snapshot();
                    assert_eq!(snapshot.step, Step::Complete);
                    assert_eq!(snapshot.front_fields, MicrFields::default());
                    assert_eq!(rigs.ocr.calls.get(), 1);
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ocr_unavailable_still_completes() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let (ocr, _init): (Readiness<FakeOcr>, Initializer<FakeOcr>) = Readiness::pending();
                let mut session = rigs.spawn_with(rigs.detector(), ocr);

                session.run_to_complete().await;
                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.step, Step::Complete);
                assert_eq!(snapshot.front_fields, MicrFields::default());
                assert!(snapshot.front_image.is_some());
                assert_eq!(rigs.ocr.calls.get(), 0);

                session.controller.continue_to_next();
                assert_eq!(session.handle.await.unwrap(), SessionOutcome::HandedOff);
                assert_eq!(rigs.handoffs.borrow()[0].front_fields, MicrFields::default());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_frame_skips_capture() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| *e == SessionEvent::CountdownTick(1)).await;

                *rigs.camera.picture.borrow_mut() = blank();
                let events = session.until(|e| *e == SessionEvent::CaptureSkipped).await;
                assert!(!events.iter().any(|e| matches!(e, SessionEvent::Captured { .. })));
                assert_eq!(session.controller.snapshot().phase, Phase::Detecting);
                assert_eq!(rigs.camera.live(), 1);

                *rigs.camera.picture.borrow_mut() = picture();
                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(rigs.detector.calls.get(), 2);
            })
            .await;
    }

    // ---- page visibility ----

    #[tokio::test(start_paused = true)]
    async fn test_page_hide_and_show() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.5));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| *e == SessionEvent::CountdownTick(3)).await;

                session.controller.page_hidden();
                let events = session
                    .until(|e| *e == SessionEvent::CameraReleased(ReleaseReason::PageHidden))
                    .await;
                assert!(events.contains(&SessionEvent::CountdownCancelled));

                time::sleep(Duration::from_secs(10)).await;
                let snapshot = session.controller.snapshot();
                assert_eq!(snapshot.phase, Phase::Suspended);
                assert_eq!(snapshot.camera, CameraState::Released);
                assert_eq!(rigs.camera.live(), 0);
                assert_eq!(rigs.detector.calls.get(), 1);

                session.controller.page_visible();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;
                assert_eq!(rigs.camera.opened.get(), 2);
                assert_eq!(rigs.camera.live(), 1);

                session.until(|e| *e == SessionEvent::Completed).await;
                assert_eq!(rigs.camera.live(), 0);

                // Nothing to resume once capture is complete
                session.controller.page_hidden();
                session.controller.page_visible();
                session.settle().await;
                assert_eq!(rigs.camera.opened.get(), 2);
                assert_eq!(session.controller.snapshot().phase, Phase::Complete);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_ignored_while_running() {
        LocalSet::new()
            .run_until(async {
                let rigs = Rigs::new(report(0.1));
                let mut session = rigs.spawn();
                session.controller.start();
                session.until(|e| matches!(e, SessionEvent::CameraAcquired(_))).await;

                session.controller.start();
                session.settle().await;
                assert_eq!(rigs.camera.opened.get(), 1);
                assert_eq!(rigs.camera.live(), 1);
            })
            .await;
    }
}
