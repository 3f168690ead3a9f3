// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::{Read, Write};
use std::time::Duration;

use log::info;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{MountError, MountResult};

// Longest reply we accept before declaring the stream garbled.
pub const MAX_REPLY_LEN: usize = 1024;

pub const BAUD_RATE: u32 = 9600;

/// Byte-level access to the mount's serial line. Implementations are not
/// required to be thread safe; the dispatcher provides the exclusion.
pub trait Transport: Send {
    /// Discards any unread input and unsent output.
    fn clear_buffers(&mut self) -> MountResult<()>;

    fn transmit(&mut self, bytes: &[u8]) -> MountResult<()>;

    /// Reads exactly `count` bytes.
    fn receive_counted(&mut self, count: usize) -> MountResult<Vec<u8>>;

    /// Reads up to and including `terminator`, returning the text before it.
    fn receive_terminated(&mut self, terminator: u8) -> MountResult<String>;
}

pub struct SerialTransport {
    device: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Opens `device` (e.g. "/dev/ttyUSB0" or "COM3") at 9600-8-N-1.
    pub fn open(device: &str, timeout: Duration) -> MountResult<Self> {
        let port = serialport::new(device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()?;
        info!("Opened serial port {} at {} baud", device, BAUD_RATE);
        Ok(SerialTransport { device: device.to_string(), port })
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport").field("device", &self.device).finish()
    }
}

impl Transport for SerialTransport {
    fn clear_buffers(&mut self) -> MountResult<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8]) -> MountResult<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive_counted(&mut self, count: usize) -> MountResult<Vec<u8>> {
        let mut buf = vec![0_u8; count];
        self.port.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn receive_terminated(&mut self, terminator: u8) -> MountResult<String> {
        read_terminated(&mut self.port, terminator)
    }
}

// Shared by every transport that sits on a byte stream.
pub fn read_terminated<R: Read + ?Sized>(reader: &mut R, terminator: u8)
                                         -> MountResult<String> {
    let mut buf = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == terminator {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_REPLY_LEN {
            return Err(MountError::Protocol(format!(
                "reply exceeds {} bytes without terminator", MAX_REPLY_LEN)));
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_read_terminated() {
        let mut reader = Cursor::new(b"10:30:00#+20*00:00#".to_vec());
        assert_eq!(read_terminated(&mut reader, b'#').unwrap(), "10:30:00");
        assert_eq!(read_terminated(&mut reader, b'#').unwrap(), "+20*00:00");
    }

    #[test]
    fn test_read_terminated_errors() {
        // Stream ends before the terminator.
        let mut reader = Cursor::new(b"10:30".to_vec());
        assert!(matches!(read_terminated(&mut reader, b'#'),
                         Err(MountError::Io(_))));

        let mut reader = Cursor::new(vec![b'x'; MAX_REPLY_LEN + 10]);
        assert!(matches!(read_terminated(&mut reader, b'#'),
                         Err(MountError::Protocol(_))));
    }
}
