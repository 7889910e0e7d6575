//! pkt-line framing.
//!
//! A packet is a 4-digit hex length, counting itself, followed by the
//! payload. Lengths 0, 1 and 2 are control packets: flush, delimiter and
//! response end. Length 3 is never valid.

use crate::{GitError, Result};
use std::io::{ErrorKind, Read, Write};

/// Largest packet, length prefix included.
pub const LARGE_PACKET_MAX: usize = 65520;

/// Largest payload a single data packet can carry.
pub const LARGE_PACKET_DATA_MAX: usize = LARGE_PACKET_MAX - PREFIX_LEN;

const PREFIX_LEN: usize = 4;

/// One packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Payload bytes, newline included if the sender sent one.
    Data(Vec<u8>),
    /// `0000`: end of a section or message.
    Flush,
    /// `0001`: section separator.
    Delimiter,
    /// `0002`: end of a stateless response.
    ResponseEnd,
}

impl PktLine {
    /// Payload of a data packet.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Payload as UTF-8 without its trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(chomp(self.data()?)).ok()
    }
}

/// Strips one trailing newline, if present.
pub fn chomp(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\n").unwrap_or(data)
}

fn decode_len(prefix: [u8; PREFIX_LEN]) -> Result<usize> {
    let mut be = [0u8; 2];
    hex::decode_to_slice(prefix, &mut be).map_err(|_| {
        GitError::InvalidPktLine(format!(
            "bad length prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))
    })?;
    Ok(u16::from_be_bytes(be).into())
}

/// Reads packets from a byte stream. Reads exactly one packet's bytes at a
/// time, so whatever follows the last packet stays in the inner reader.
pub struct PktLineReader<R> {
    inner: R,
}

impl<R: Read> PktLineReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// The next packet. `None` when the stream ends cleanly between
    /// packets; ending inside one is an error.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut prefix = [0u8; PREFIX_LEN];
        if let Err(e) = self.inner.read_exact(&mut prefix) {
            return match e.kind() {
                ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(e.into()),
            };
        }

        let len = decode_len(prefix)?;
        let packet = match len {
            0 => PktLine::Flush,
            1 => PktLine::Delimiter,
            2 => PktLine::ResponseEnd,
            3 => return Err(GitError::InvalidPktLine("packet length 3".to_string())),
            n if n > LARGE_PACKET_MAX => {
                return Err(GitError::InvalidPktLine(format!(
                    "packet length {n} over the {LARGE_PACKET_MAX} limit"
                )))
            }
            n => {
                let mut data = vec![0u8; n - PREFIX_LEN];
                self.inner.read_exact(&mut data).map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => GitError::InvalidPktLine(format!(
                        "stream ended inside a {n} byte packet"
                    )),
                    _ => e.into(),
                })?;
                PktLine::Data(data)
            }
        };
        Ok(Some(packet))
    }

    /// Like [`read`](Self::read), but the stream must not end here.
    pub fn read_packet(&mut self) -> Result<PktLine> {
        self.read()?
            .ok_or_else(|| GitError::Protocol("the remote end hung up unexpectedly".to_string()))
    }

    /// One data line without its newline, or `None` at a flush. Other
    /// control packets and end of stream are errors.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_packet()? {
            PktLine::Data(mut data) => {
                if data.ends_with(b"\n") {
                    data.pop();
                }
                Ok(Some(data))
            }
            PktLine::Flush => Ok(None),
            other => Err(GitError::Protocol(format!("unexpected packet {other:?}"))),
        }
    }

    /// Packets up to the next flush (or end of stream), flush excluded.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut section = Vec::new();
        while let Some(packet) = self.read()? {
            if packet == PktLine::Flush {
                break;
            }
            section.push(packet);
        }
        Ok(section)
    }

    /// The wrapped reader, for reading unframed data that follows.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwraps the reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes packets to a byte sink. Over a `Vec<u8>` it accumulates a
/// request batch to send later.
pub struct PktLineWriter<W> {
    inner: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    fn write_parts(&mut self, parts: &[&[u8]]) -> Result<()> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if len > LARGE_PACKET_DATA_MAX {
            return Err(GitError::InvalidPktLine(format!(
                "{len} byte payload over the {LARGE_PACKET_DATA_MAX} limit"
            )));
        }
        write!(self.inner, "{:04x}", len + PREFIX_LEN)?;
        for part in parts {
            self.inner.write_all(part)?;
        }
        Ok(())
    }

    /// Writes any packet.
    pub fn write(&mut self, packet: &PktLine) -> Result<()> {
        let control: &[u8] = match packet {
            PktLine::Data(data) => return self.write_parts(&[data.as_slice()]),
            PktLine::Flush => b"0000",
            PktLine::Delimiter => b"0001",
            PktLine::ResponseEnd => b"0002",
        };
        self.inner.write_all(control)?;
        Ok(())
    }

    /// Writes `data` as one data packet, unchanged.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write_parts(&[data])
    }

    /// Writes `line` as one data packet, adding a newline unless it
    /// already ends with one.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if line.ends_with('\n') {
            self.write_parts(&[line.as_bytes()])
        } else {
            self.write_parts(&[line.as_bytes(), b"\n".as_slice()])
        }
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Flushes the wrapped writer.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.inner.flush()?)
    }

    /// The wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwraps the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
