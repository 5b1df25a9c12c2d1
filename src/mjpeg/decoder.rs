//! Incremental `multipart/x-mixed-replace` MJPEG decoder.

use bytes::{Buf, Bytes, BytesMut};

/// Upper bound on a single part's header block.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete image payload cut from the MJPEG stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sequence: u64,
    data: Bytes,
}

impl Frame {
    /// Position of this frame in its stream, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload starts with a JPEG start-of-image marker.
    pub fn is_jpeg(&self) -> bool {
        self.data.starts_with(&SOI)
    }
}

/// Errors reported while cutting frames. None of them are fatal: the decoder
/// has already resynchronised when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("part header exceeds {MAX_HEADER_BYTES} bytes")]
    HeaderTooLarge,
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("invalid Content-Length '{0}'")]
    InvalidContentLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete part header block.
    Headers,
    /// Reading a payload of known length.
    Body { len: usize },
    /// Reading a payload delimited by JPEG markers; `from` is where the
    /// end-of-image search resumes.
    Scan { from: usize },
    /// Discarding the rest of a rejected payload.
    Skip { remaining: usize },
    /// Discarding up to the next boundary line.
    Resync,
}

/// Cuts frames out of a continuous MJPEG byte stream.
///
/// Feed chunks with [`MjpegDecoder::extend`] and drain with
/// [`MjpegDecoder::next_frame`] until it returns `Ok(None)`.
#[derive(Debug)]
pub struct MjpegDecoder {
    buf: BytesMut,
    state: State,
    max_frame_bytes: usize,
    frames: u64,
}

impl MjpegDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(64 * 1024),
            state: State::Headers,
            max_frame_bytes,
            frames: 0,
        }
    }

    /// Append a chunk of the upstream body.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of frames emitted so far.
    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    /// Bytes held back waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Cut the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            match self.state {
                State::Headers => {
                    let blank = self
                        .buf
                        .iter()
                        .take_while(|b| **b == b'\r' || **b == b'\n')
                        .count();
                    self.buf.advance(blank);

                    if self.buf.len() < SOI.len() {
                        return Ok(None);
                    }
                    // Bare JPEG concatenation without multipart headers.
                    if self.buf.starts_with(&SOI) {
                        self.state = State::Scan { from: SOI.len() };
                        continue;
                    }

                    let Some((end, terminator)) = find_header_end(&self.buf) else {
                        if self.buf.len() > MAX_HEADER_BYTES {
                            self.buf.clear();
                            self.state = State::Resync;
                            return Err(DecodeError::HeaderTooLarge);
                        }
                        return Ok(None);
                    };
                    if end > MAX_HEADER_BYTES {
                        let header = self.buf.split_to(end + terminator);
                        // The payload of a rejected part must not surface as a frame.
                        self.state = match content_length(&header[..end]) {
                            Ok(Some(len)) => State::Skip { remaining: len },
                            _ => State::Resync,
                        };
                        return Err(DecodeError::HeaderTooLarge);
                    }

                    let header = self.buf.split_to(end + terminator);
                    match content_length(&header[..end]) {
                        Ok(Some(0)) => {}
                        Ok(Some(len)) if len > self.max_frame_bytes => {
                            self.state = State::Skip { remaining: len };
                            return Err(DecodeError::FrameTooLarge {
                                len,
                                max: self.max_frame_bytes,
                            });
                        }
                        Ok(Some(len)) => self.state = State::Body { len },
                        Ok(None) => self.state = State::Scan { from: SOI.len() },
                        Err(e) => {
                            self.state = State::Scan { from: SOI.len() };
                            return Err(e);
                        }
                    }
                }
                State::Body { len } => {
                    if self.buf.len() < len {
                        self.buf.reserve(len - self.buf.len());
                        return Ok(None);
                    }
                    let data = self.buf.split_to(len).freeze();
                    self.state = State::Headers;
                    return Ok(Some(self.emit(data)));
                }
                State::Scan { from } => {
                    if !self.buf.starts_with(&SOI) {
                        match find(&self.buf, &SOI) {
                            Some(start) => self.buf.advance(start),
                            None => {
                                // Keep a trailing 0xFF that may begin the marker.
                                let keep = usize::from(self.buf.last() == Some(&SOI[0]));
                                let drop = self.buf.len() - keep;
                                self.buf.advance(drop);
                                return Ok(None);
                            }
                        }
                        self.state = State::Scan { from: SOI.len() };
                        continue;
                    }

                    if let Some(pos) = find(&self.buf[from..], &EOI) {
                        let data = self.buf.split_to(from + pos + EOI.len()).freeze();
                        self.state = State::Headers;
                        return Ok(Some(self.emit(data)));
                    }

                    if self.buf.len() > self.max_frame_bytes {
                        let len = self.buf.len();
                        self.buf.clear();
                        self.state = State::Headers;
                        return Err(DecodeError::FrameTooLarge {
                            len,
                            max: self.max_frame_bytes,
                        });
                    }
                    self.state = State::Scan {
                        from: (self.buf.len() - 1).max(SOI.len()),
                    };
                    return Ok(None);
                }
                State::Skip { remaining } => {
                    let n = remaining.min(self.buf.len());
                    self.buf.advance(n);
                    if n < remaining {
                        self.state = State::Skip { remaining: remaining - n };
                        return Ok(None);
                    }
                    self.state = State::Headers;
                }
                State::Resync => match find(&self.buf, b"\n--") {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.state = State::Headers;
                    }
                    None => {
                        // Keep a tail that may begin the boundary line.
                        let drop = self.buf.len().saturating_sub(2);
                        self.buf.advance(drop);
                        return Ok(None);
                    }
                },
            }
        }
    }

    fn emit(&mut self, data: Bytes) -> Frame {
        let frame = Frame {
            sequence: self.frames,
            data,
        };
        self.frames += 1;
        frame
    }
}

/// Locate the blank line ending a header block: `(offset, terminator length)`.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(header: &[u8]) -> Result<Option<usize>, DecodeError> {
    let text = String::from_utf8_lossy(header);
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            return value
                .parse()
                .map(Some)
                .map_err(|_| DecodeError::InvalidContentLength(value.to_string()));
        }
    }
    Ok(None)
}
