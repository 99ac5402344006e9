//! MJPEG stream demuxing
//!
//! IP webcams serve MJPEG as a multipart HTTP body: JPEG images separated by
//! boundary lines. Rather than parsing the multipart headers we scan the byte
//! stream for JPEG start/end markers, which also tolerates cameras that omit
//! or mangle the boundary declaration.

use std::io::Read;

use super::StreamError;

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Read chunk size for pulling bytes off the transport
const READ_CHUNK: usize = 16 * 1024;
/// Upper bound on a single JPEG part; protects against marker-less garbage
const MAX_PART_BYTES: usize = 32 * 1024 * 1024;

/// Pull-based MJPEG demuxer over any byte stream.
///
/// Generic over `Read` so tests can drive it from in-memory buffers.
pub struct MjpegStream<R: Read> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: Read> MjpegStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Extract the next complete JPEG part from the stream.
    ///
    /// Returns `StreamError::Ended` once the transport is exhausted without a
    /// further complete image.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, StreamError> {
        loop {
            // Discard any inter-part bytes (multipart boundaries, headers)
            // before the next SOI. Keep the last byte in case a marker is
            // split across read chunks.
            match find_marker(&self.buf, &SOI) {
                Some(start) => {
                    if start > 0 {
                        self.buf.drain(..start);
                    }
                    if let Some(end) = find_marker(&self.buf[SOI.len()..], &EOI) {
                        let part_len = SOI.len() + end + EOI.len();
                        let part: Vec<u8> = self.buf.drain(..part_len).collect();
                        return Ok(part);
                    }
                }
                None => {
                    if self.buf.len() > 1 {
                        let keep = self.buf.len() - 1;
                        self.buf.drain(..keep);
                    }
                }
            }

            if self.buf.len() > MAX_PART_BYTES {
                return Err(StreamError::OversizedPart {
                    bytes: self.buf.len(),
                });
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Err(StreamError::Ended);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Find the first occurrence of a two-byte marker in `haystack`.
fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack
        .windows(2)
        .position(|w| w[0] == marker[0] && w[1] == marker[1])
}
