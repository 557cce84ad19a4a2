//! STOMP frame decoder

use bytes::Bytes;

use crate::protocol::{header, DecodeError, Frame};

use super::DEFAULT_MAX_FRAME_SIZE;

/// Incremental frame decoder.
///
/// `decode` inspects the front of a read buffer and either produces one
/// complete frame plus the number of bytes it consumed, or reports that more
/// data is needed. The caller owns the buffer and advances it.
#[derive(Debug, Clone)]
pub struct Decoder {
    max_frame_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Attempt to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        let mut pos = 0;

        // Skip end-of-line bytes between frames. This also swallows the
        // optional newline emitted after the previous frame's NUL.
        while pos < buf.len() && (buf[pos] == b'\n' || buf[pos] == b'\r') {
            pos += 1;
        }
        if pos == buf.len() {
            return self.incomplete(buf);
        }

        let command = match read_line(buf, &mut pos)? {
            Some(line) => line.to_string(),
            None => return self.incomplete(buf),
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        let mut content_length: Option<usize> = None;
        loop {
            let line = match read_line(buf, &mut pos)? {
                Some(line) => line,
                None => return self.incomplete(buf),
            };
            if line.is_empty() {
                break;
            }
            let (key, value) = line.split_once(':').ok_or(DecodeError::MalformedHeader)?;
            // Keys are lowercased and values whitespace-trimmed on ingress.
            let key = key.to_ascii_lowercase();
            let value = value.trim().to_string();
            if key == header::CONTENT_LENGTH {
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| DecodeError::InvalidContentLength)?,
                );
            }
            headers.push((key, value));
        }

        let (body, end) = match content_length {
            // Exactly `len` body bytes followed by one NUL separator.
            Some(len) => {
                if buf.len() < pos + len + 1 {
                    return self.incomplete(buf);
                }
                if buf[pos + len] != 0 {
                    return Err(DecodeError::MissingNullTerminator);
                }
                (Bytes::copy_from_slice(&buf[pos..pos + len]), pos + len + 1)
            }
            // Body runs to the next NUL; embedded newlines are preserved.
            None => match buf[pos..].iter().position(|&b| b == 0) {
                Some(nul) => (Bytes::copy_from_slice(&buf[pos..pos + nul]), pos + nul + 1),
                None => return self.incomplete(buf),
            },
        };

        Ok(Some((
            Frame {
                command,
                headers,
                body,
            },
            end,
        )))
    }

    fn incomplete(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() > self.max_frame_size {
            Err(DecodeError::FrameTooLarge)
        } else {
            Ok(None)
        }
    }
}

/// Read one `\n`-terminated line starting at `*pos`, stripping a trailing
/// `\r`. Advances `*pos` past the terminator. `Ok(None)` means the line is
/// not complete yet.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a str>, DecodeError> {
    let start = *pos;
    match buf[start..].iter().position(|&b| b == b'\n') {
        Some(offset) => {
            let mut line = &buf[start..start + offset];
            if let Some((&b'\r', rest)) = line.split_last() {
                line = rest;
            }
            *pos = start + offset + 1;
            std::str::from_utf8(line)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8)
        }
        None => Ok(None),
    }
}
