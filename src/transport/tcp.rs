//! TCP Push Channels
//!
//! Frame layout:
//!
//! ```text
//! [len: u32 BE][crc32: u32 BE][payload: len bytes]
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Connector, PushChannel};

/// Largest payload a frame may carry
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one frame
pub fn write_frame<W: Write>(out: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    let len = payload.len() as u32;
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&len.to_be_bytes());
    header[4..8].copy_from_slice(&crc32fast::hash(payload).to_be_bytes());
    out.write_all(&header)?;
    out.write_all(payload)?;
    out.flush()
}

/// Read one frame, verifying its checksum
pub fn read_frame<R: Read>(input: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; 8];
    input.read_exact(&mut header)?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds {}", len, MAX_FRAME_LEN),
        ));
    }

    let mut payload = vec![0u8; len];
    input.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != crc {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame checksum mismatch"));
    }
    Ok(payload)
}

/// Opens write-only TCP connections
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl Connector for TcpConnector {
    type Channel = TcpPushChannel;

    fn connect(&self, address: &str) -> io::Result<TcpPushChannel> {
        let mut last_err = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.shutdown(Shutdown::Read)?;
                    return Ok(TcpPushChannel {
                        stream: Mutex::new(stream),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{} resolved to nothing", address))
        }))
    }
}

/// Write half of a TCP connection; pushes are serialized
pub struct TcpPushChannel {
    stream: Mutex<TcpStream>,
}

impl PushChannel for TcpPushChannel {
    fn push(&self, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut *self.stream.lock(), payload)
    }
}
