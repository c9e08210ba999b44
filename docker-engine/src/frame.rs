//! Framing of multiplexed (non-TTY) attach and exec streams.
//!
//! Every payload chunk is preceded by an 8 byte header: one byte naming the
//! channel (0 stdin, 1 stdout, 2 stderr), three reserved bytes, then the
//! payload length as a big-endian `u32`. TTY-allocated connections carry raw
//! bytes instead.

/// Size of the frame header.
pub const HEADER_LEN: usize = 8;

/// Channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
    Unknown(u8),
}

impl From<u8> for Channel {
    fn from(byte: u8) -> Self {
        match byte {
            0 => Channel::Stdin,
            1 => Channel::Stdout,
            2 => Channel::Stderr,
            other => Channel::Unknown(other),
        }
    }
}

/// Decode a complete header into its channel and payload length.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> (Channel, usize) {
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    (Channel::from(header[0]), len as usize)
}

/// Strip framing from a fully buffered stream, concatenating every payload.
///
/// A trailing partial frame is kept as far as it goes.
pub fn demux_all(mut raw: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(raw.len());
    while raw.len() >= HEADER_LEN {
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        let (_, len) = parse_header(&header);
        raw = &raw[HEADER_LEN..];
        let take = len.min(raw.len());
        payload.extend_from_slice(&raw[..take]);
        raw = &raw[take..];
    }
    payload
}

/// Frame `payload` for `channel`. Used by tests and fakes of the engine.
pub fn encode(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(channel);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
