//! Side-band framing.
//!
//! With `side-band-64k` every pkt-line payload starts with a band byte:
//! 1 carries the primary stream, 2 progress text and 3 a fatal error.

use crate::pktline::{PktLine, PktLineReader};
use crate::{GitError, Result};
use std::io::{self, Read, Write};
use tracing::trace;

/// Primary payload band.
pub const BAND_DATA: u8 = 1;
/// Progress messages.
pub const BAND_PROGRESS: u8 = 2;
/// Fatal error message, ends the stream.
pub const BAND_ERROR: u8 = 3;

/// Writes `data` as pkt-lines of at most `packet_max` bytes each.
///
/// With `band` set every packet is prefixed with that band byte; with `None`
/// the data is split into plain pkt-lines, which is how stateless RPC frames
/// a request body. Empty data writes nothing.
pub fn send_sideband<W: Write + ?Sized>(
    out: &mut W,
    band: Option<u8>,
    data: &[u8],
    packet_max: usize,
) -> Result<()> {
    let header_len = if band.is_some() { 5 } else { 4 };
    if packet_max <= header_len {
        return Err(GitError::InvalidPktLine(format!(
            "packet size {packet_max} leaves no room for data"
        )));
    }

    let mut header = [0u8; 5];
    for chunk in data.chunks(packet_max - header_len) {
        let len = chunk.len() + header_len;
        header[..4].copy_from_slice(format!("{len:04x}").as_bytes());
        if let Some(band) = band {
            header[4] = band;
        }
        out.write_all(&header[..header_len])?;
        out.write_all(chunk)?;
    }
    Ok(())
}

/// Demultiplexes a side-band stream into a plain byte stream.
///
/// Band 1 payload is returned by `read`, band 2 text is copied to the
/// progress sink and band 3 turns into an error. A flush ends the stream.
pub struct SidebandReader<R, P> {
    packets: PktLineReader<R>,
    progress: P,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read, P: Write> SidebandReader<R, P> {
    /// Wraps `reader`, sending progress text to `progress`.
    pub fn new(reader: R, progress: P) -> Self {
        Self {
            packets: PktLineReader::new(reader),
            progress,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Returns the progress sink.
    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Consumes the reader and returns the underlying stream.
    pub fn into_inner(self) -> R {
        self.packets.into_inner()
    }

    fn fill(&mut self) -> io::Result<()> {
        while self.pos >= self.buf.len() && !self.done {
            let pkt = self.packets.read().map_err(into_io)?;
            match pkt {
                None | Some(PktLine::Flush) => self.done = true,
                Some(PktLine::Data(data)) => {
                    let Some((&band, payload)) = data.split_first() else {
                        continue;
                    };
                    match band {
                        BAND_DATA => {
                            self.buf = payload.to_vec();
                            self.pos = 0;
                        }
                        BAND_PROGRESS => {
                            trace!(bytes = payload.len(), "side-band progress");
                            self.progress.write_all(payload)?;
                        }
                        BAND_ERROR => {
                            let msg = String::from_utf8_lossy(payload).trim_end().to_string();
                            return Err(into_io(GitError::Remote(msg)));
                        }
                        other => {
                            return Err(into_io(GitError::Protocol(format!(
                                "bad band #{other}"
                            ))))
                        }
                    }
                }
                Some(other) => {
                    return Err(into_io(GitError::Protocol(format!(
                        "unexpected packet {other:?} in side-band stream"
                    ))))
                }
            }
        }
        Ok(())
    }
}

fn into_io(err: GitError) -> io::Error {
    match err {
        GitError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Recovers a [`GitError`] that travelled through an [`io::Error`].
pub(crate) fn from_io(err: io::Error) -> GitError {
    if err.get_ref().is_some_and(|inner| inner.is::<GitError>()) {
        match err.into_inner().map(|inner| inner.downcast::<GitError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => GitError::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
            None => GitError::Protocol("side-band stream failed".to_string()),
        }
    } else {
        GitError::Io(err)
    }
}

impl<R: Read, P: Write> Read for SidebandReader<R, P> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.fill()?;
        let available = &self.buf[self.pos..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
