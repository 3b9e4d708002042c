use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};

use bytes::BytesMut;

/// One frame is 25 data bytes followed by CRLF.
pub const CHUNK_SIZE: usize = 27;
pub const TERMINATOR: &[u8] = b"\r\n";
pub const DATA_PREFIX: &[u8] = b"CO2";
/// Unterminated input beyond this length is dropped.
pub const MAX_LINE_LEN: usize = 256;

pub struct LineReader<R> {
    inner: R,
    buffer: BytesMut,
    lines: VecDeque<String>,
    // Set after an overlong line was cut; input is dropped up to the next
    // terminator.
    discarding: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(MAX_LINE_LEN),
            lines: VecDeque::new(),
            discarding: false,
        }
    }

    /// Next line starting with [`DATA_PREFIX`], without its terminator.
    /// `Ok(None)` when one read completed no such line.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        let n = match self.inner.read(&mut chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "device closed the connection",
                ));
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.buffer.extend_from_slice(&chunk[..n]);
        self.split_lines();

        Ok(self.lines.pop_front())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn split_lines(&mut self) {
        while let Some(end) = find_terminator(&self.buffer) {
            let frame = self.buffer.split_to(end + TERMINATOR.len());
            let line = &frame[..end];
            if self.discarding {
                self.discarding = false;
                log::debug!(
                    "Discarding tail of overlong line {:?}",
                    String::from_utf8_lossy(line)
                );
            } else if line.starts_with(DATA_PREFIX) {
                self.lines
                    .push_back(String::from_utf8_lossy(line).into_owned());
            } else {
                log::debug!("Discarding line {:?}", String::from_utf8_lossy(line));
            }
        }

        if self.buffer.len() > MAX_LINE_LEN {
            log::debug!(
                "Discarding {} bytes without line terminator",
                self.buffer.len()
            );
            let keep = usize::from(self.buffer.ends_with(b"\r"));
            let _ = self.buffer.split_to(self.buffer.len() - keep);
            self.discarding = true;
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}
