//! Single-owner pipeline worker
//!
//! One thread exclusively owns the video source and the orchestrator. The
//! GUI talks to it over channels, so the live tick path and the capture path
//! can never touch the stream concurrently. The source is released exactly
//! once, when the worker exits.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::camera::{FrameSource, StreamError};
use crate::vision::{Detect, ReadText};

use super::{downscale, CaptureReport, Orchestrator};

/// Pause between read retries after a transient stream fault
const RETRY_DELAY: Duration = Duration::from_millis(50);
/// Event channel depth; live frames are dropped when the GUI falls behind
const EVENT_CHANNEL_DEPTH: usize = 16;

/// User intents handled by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run exactly one synchronous capture cycle
    Capture,
    /// Release the video source and stop (terminal)
    Shutdown,
}

/// Results pushed back to the presentation surface
#[derive(Debug)]
pub enum Event {
    /// Downscaled frame for the live view
    Live(image::RgbImage),
    /// Output of one capture cycle
    Captured(Box<CaptureReport>),
    /// The stream died and the worker stopped
    Fatal(String),
}

/// Worker state mirrored for the GUI status line
#[derive(Debug, Clone, Default)]
pub struct PipelineStatus {
    pub connected: bool,
    pub frames_read: u64,
    pub captures: u64,
    pub last_error: Option<String>,
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Live frames are shrunk by this divisor before display
    pub live_divisor: u32,
    /// Transient read faults tolerated before giving up
    pub read_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            live_divisor: 8,
            read_retries: 3,
        }
    }
}

/// Handle the GUI keeps to the running worker
pub struct WorkerHandle {
    pub commands: Sender<Command>,
    pub events: Receiver<Event>,
    pub status: Arc<RwLock<PipelineStatus>>,
    pub thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to stop and wait for it to release the source.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the pipeline worker thread, handing it exclusive ownership of the
/// video source and the orchestrator.
pub fn spawn<S, D, R>(
    source: S,
    orchestrator: Orchestrator<D, R>,
    config: WorkerConfig,
) -> WorkerHandle
where
    S: FrameSource + Send + 'static,
    D: Detect + Send + 'static,
    R: ReadText + Send + 'static,
{
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = bounded(EVENT_CHANNEL_DEPTH);
    let status = Arc::new(RwLock::new(PipelineStatus::default()));

    let worker_status = status.clone();
    let thread = std::thread::Builder::new()
        .name("pipeline-worker".to_string())
        .spawn(move || run(source, orchestrator, config, command_rx, event_tx, worker_status))
        .expect("failed to spawn pipeline worker thread");

    WorkerHandle {
        commands: command_tx,
        events: event_rx,
        status,
        thread: Some(thread),
    }
}

fn run<S, D, R>(
    mut source: S,
    mut orchestrator: Orchestrator<D, R>,
    config: WorkerConfig,
    commands: Receiver<Command>,
    events: Sender<Event>,
    status: Arc<RwLock<PipelineStatus>>,
) where
    S: FrameSource,
    D: Detect,
    R: ReadText,
{
    status.write().connected = true;
    info!("pipeline worker started");

    loop {
        match commands.try_recv() {
            Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Ok(Command::Capture) => {
                let frame = match read_with_retry(&mut source, &config, &status) {
                    Ok(frame) => frame,
                    Err(e) => {
                        fail(&events, &status, e);
                        break;
                    }
                };

                let report = orchestrator.run_capture(frame);
                status.write().captures += 1;
                if events.send(Event::Captured(Box::new(report))).is_err() {
                    break;
                }
            }
            Err(TryRecvError::Empty) => {
                let frame = match read_with_retry(&mut source, &config, &status) {
                    Ok(frame) => frame,
                    Err(e) => {
                        fail(&events, &status, e);
                        break;
                    }
                };

                let live = downscale(&frame.image, config.live_divisor);
                // Dropping a live frame when the GUI lags is fine; the next
                // one replaces it. A closed channel means the GUI is gone.
                match events.try_send(Event::Live(live)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    status.write().connected = false;
    info!("pipeline worker stopped, video source released");
}

/// Read one frame, retrying transient faults a bounded number of times.
/// A cleanly ended stream is not retried.
fn read_with_retry<S: FrameSource>(
    source: &mut S,
    config: &WorkerConfig,
    status: &Arc<RwLock<PipelineStatus>>,
) -> Result<crate::camera::Frame, StreamError> {
    let mut attempt = 0u32;
    loop {
        match source.read() {
            Ok(frame) => {
                status.write().frames_read += 1;
                return Ok(frame);
            }
            Err(StreamError::Ended) => return Err(StreamError::Ended),
            Err(e) if attempt < config.read_retries => {
                attempt += 1;
                warn!(attempt, retries = config.read_retries, error = %e, "frame read failed, retrying");
                std::thread::sleep(RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

fn fail(events: &Sender<Event>, status: &Arc<RwLock<PipelineStatus>>, error: StreamError) {
    error!(error = %error, "video stream failed, stopping worker");
    {
        let mut s = status.write();
        s.connected = false;
        s.last_error = Some(error.to_string());
    }
    let _ = events.send(Event::Fatal(error.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use crate::vision::{
        ClassRegistry, DetectError, Detection, OcrError, PinInspector,
    };
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    struct NullDetector;
    impl Detect for NullDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
            Ok(vec![])
        }
    }

    struct NullReader;
    impl ReadText for NullReader {
        fn read(&mut self, _crop: &RgbImage) -> Result<String, OcrError> {
            Ok(String::new())
        }
    }

    /// Source that repeats the same frame forever
    struct EndlessSource {
        index: u64,
    }
    impl FrameSource for EndlessSource {
        fn read(&mut self) -> Result<Frame, StreamError> {
            self.index += 1;
            Ok(Frame::new(
                RgbImage::from_pixel(32, 24, Rgb([80, 80, 80])),
                self.index,
            ))
        }
    }

    /// Source that always fails with a transport error
    struct BrokenSource;
    impl FrameSource for BrokenSource {
        fn read(&mut self) -> Result<Frame, StreamError> {
            Err(StreamError::Read(std::io::Error::other("link down")))
        }
    }

    /// Source that ends after `remaining` frames
    struct FiniteSource {
        remaining: u32,
    }
    impl FrameSource for FiniteSource {
        fn read(&mut self) -> Result<Frame, StreamError> {
            if self.remaining == 0 {
                return Err(StreamError::Ended);
            }
            self.remaining -= 1;
            Ok(Frame::new(RgbImage::new(16, 16), 0))
        }
    }

    fn orchestrator() -> Orchestrator<NullDetector, NullReader> {
        Orchestrator::new(
            NullDetector,
            NullReader,
            PinInspector::default(),
            std::sync::Arc::new(ClassRegistry::from_names(vec!["CN7".to_string()])),
            3,
        )
    }

    fn recv_until<F: Fn(&Event) -> bool>(rx: &Receiver<Event>, pred: F) -> Option<Event> {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        None
    }

    #[test]
    fn test_live_frames_are_downscaled() {
        let mut handle = spawn(
            EndlessSource { index: 0 },
            orchestrator(),
            WorkerConfig {
                live_divisor: 8,
                read_retries: 0,
            },
        );

        let event = recv_until(&handle.events, |e| matches!(e, Event::Live(_)))
            .expect("live frame expected");
        if let Event::Live(img) = event {
            assert_eq!(img.dimensions(), (4, 3));
        }

        handle.shutdown();
        assert!(!handle.status.read().connected);
    }

    #[test]
    fn test_capture_command_produces_report() {
        let mut handle = spawn(
            EndlessSource { index: 0 },
            orchestrator(),
            WorkerConfig::default(),
        );

        handle.commands.send(Command::Capture).unwrap();
        let event = recv_until(&handle.events, |e| matches!(e, Event::Captured(_)))
            .expect("capture report expected");
        if let Event::Captured(report) = event {
            assert!(report.detections.is_empty());
        }
        assert!(handle.status.read().captures >= 1);

        handle.shutdown();
    }

    #[test]
    fn test_broken_stream_is_fatal_after_retries() {
        let mut handle = spawn(
            BrokenSource,
            orchestrator(),
            WorkerConfig {
                live_divisor: 8,
                read_retries: 1,
            },
        );

        let event = recv_until(&handle.events, |e| matches!(e, Event::Fatal(_)))
            .expect("fatal event expected");
        if let Event::Fatal(message) = event {
            assert!(message.contains("read failed"));
        }

        if let Some(thread) = handle.thread.take() {
            thread.join().unwrap();
        }
        let status = handle.status.read();
        assert!(!status.connected);
        assert!(status.last_error.is_some());
    }

    #[test]
    fn test_ended_stream_stops_worker_without_retries() {
        let mut handle = spawn(
            FiniteSource { remaining: 2 },
            orchestrator(),
            WorkerConfig {
                live_divisor: 2,
                read_retries: 3,
            },
        );

        let event = recv_until(&handle.events, |e| matches!(e, Event::Fatal(_)))
            .expect("fatal event expected");
        if let Event::Fatal(message) = event {
            assert!(message.contains("ended"));
        }
        if let Some(thread) = handle.thread.take() {
            thread.join().unwrap();
        }
    }

    #[test]
    fn test_shutdown_joins_worker() {
        let mut handle = spawn(
            EndlessSource { index: 0 },
            orchestrator(),
            WorkerConfig::default(),
        );
        handle.shutdown();
        assert!(handle.thread.is_none());
        assert!(!handle.status.read().connected);
    }
}
