//! Camera stream layer
//!
//! Wraps an MJPEG-over-HTTP network camera (e.g. the IP Webcam app) behind a
//! small read-one-frame interface. The video source is exclusively owned by
//! the pipeline worker thread; nothing else touches the transport.

pub mod frame;
pub mod mjpeg;

pub use frame::Frame;

use std::time::Duration;

use thiserror::Error;
use tracing::info;

use mjpeg::MjpegStream;

/// How long to wait for the initial TCP connection before failing fast
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by the video source
#[derive(Debug, Error)]
pub enum StreamError {
    /// Stream unreachable at open time. Fatal: the application refuses to
    /// start without a camera.
    #[error("failed to connect to video stream at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The transport was exhausted with no further frames
    #[error("video stream ended")]
    Ended,
    /// Transport-level read fault mid-stream
    #[error("stream read failed")]
    Read(#[from] std::io::Error),
    /// A JPEG part arrived but could not be decoded
    #[error("frame decode failed")]
    Decode(#[from] image::ImageError),
    /// Marker-less data exceeded the per-part budget
    #[error("stream part exceeded {bytes} bytes without a complete image")]
    OversizedPart { bytes: usize },
}

/// Seam for anything that can hand out frames, so the pipeline worker can be
/// exercised against scripted sources in tests.
pub trait FrameSource {
    fn read(&mut self) -> Result<Frame, StreamError>;
}

/// A live MJPEG video source.
///
/// `open` must succeed before any `read`; open failure is a launch abort.
pub struct VideoSource {
    stream: MjpegStream<reqwest::blocking::Response>,
    next_index: u64,
}

impl VideoSource {
    /// Connect to the camera stream at `url`.
    pub fn open(url: &str) -> Result<Self, StreamError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            // The body is an endless stream; a total-request timeout would
            // kill it mid-run.
            .timeout(None)
            .build()
            .map_err(|source| StreamError::Connection {
                url: url.to_string(),
                source,
            })?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|source| StreamError::Connection {
                url: url.to_string(),
                source,
            })?;

        info!(url, "connected to camera stream");

        Ok(Self {
            stream: MjpegStream::new(response),
            next_index: 0,
        })
    }

    /// Pull and decode the next frame from the stream.
    pub fn read(&mut self) -> Result<Frame, StreamError> {
        let jpeg = self.stream.next_jpeg()?;
        let image = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)?.to_rgb8();

        let frame = Frame::new(image, self.next_index);
        self.next_index += 1;
        Ok(frame)
    }
}

impl FrameSource for VideoSource {
    fn read(&mut self) -> Result<Frame, StreamError> {
        VideoSource::read(self)
    }
}
