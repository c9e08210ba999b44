use crate::io::{Chunk, Stream};
use docker_engine::frame::{self, HEADER_LEN};
use std::io;
use std::os::fd::{AsRawFd, RawFd};

/// Strips the engine's stream framing, yielding stdout and stderr payload
/// as one byte stream.
///
/// Reads never go past the current frame, so the only state carried between
/// calls is a partially received header and the payload still owed by the
/// current frame.
#[derive(Debug)]
pub struct FrameDemuxer {
    stream: Stream,
    header: Vec<u8>,
    remain: usize,
}

impl FrameDemuxer {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            header: Vec::with_capacity(HEADER_LEN),
            remain: 0,
        }
    }

    /// Read up to `n` payload bytes.
    ///
    /// [`Chunk::Eof`] is returned once the transport ends, including in the
    /// middle of a header.
    pub fn read(&mut self, n: usize) -> io::Result<Chunk> {
        while self.remain == 0 {
            while self.header.len() < HEADER_LEN {
                match self.stream.read(HEADER_LEN - self.header.len())? {
                    Chunk::Data(data) => self.header.extend_from_slice(&data),
                    other => return Ok(other),
                }
            }

            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&self.header);
            self.header.clear();
            let (_, len) = frame::parse_header(&header);
            self.remain = len;
        }

        let chunk = self.stream.read(n.min(self.remain))?;
        if let Chunk::Data(data) = &chunk {
            self.remain -= data.len();
        }
        Ok(chunk)
    }

    pub fn needs_write(&self) -> bool {
        self.stream.needs_write()
    }

    pub fn do_write(&mut self) -> io::Result<usize> {
        self.stream.do_write()
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.stream.close()
    }
}

impl AsRawFd for FrameDemuxer {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
