// src/gps/gps2ip.rs
//! GPS2IP device connection and line framing

use crate::error::{GpsError, Result};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Default TCP port of a GPS2IP device.
pub const DEFAULT_DEVICE_PORT: u16 = 11123;

/// Request line that asks the device for a live sentence stream.
pub const LIVE_REQUEST: &str = "GET /?request=live\r\n";

/// Open a TCP connection to the device.
pub async fn connect_device(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| GpsError::Connection(format!("Failed to connect to GPS device at {}:{}: {}", host, port, e)))?;

    // Sentences are small and latency matters more than throughput
    stream.set_nodelay(true)?;

    Ok(stream)
}

/// Send the initiating request line.
pub async fn send_request(stream: &mut TcpStream, request: &str) -> Result<()> {
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| GpsError::Connection(format!("Failed to send request line: {}", e)))?;

    stream.flush().await?;
    Ok(())
}

/// The peer sent more than the allowed number of bytes without a delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("line exceeds {limit} bytes without a delimiter")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Splits a byte stream into lines on a single delimiter byte.
///
/// Bytes after the last delimiter stay buffered until more data arrives.
/// A trailing `\r` is stripped from each line and empty lines are skipped.
#[derive(Debug)]
pub struct LineFramer {
    delimiter: u8,
    max_line_length: usize,
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new(delimiter: u8, max_line_length: usize) -> Self {
        Self {
            delimiter,
            max_line_length,
            buffer: Vec::new(),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete line, if any.
    pub fn next_line(&mut self) -> std::result::Result<Option<Vec<u8>>, LineTooLong> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == self.delimiter) else {
                if self.buffer.len() > self.max_line_length {
                    return Err(LineTooLong { limit: self.max_line_length });
                }
                return Ok(None);
            };

            if pos > self.max_line_length {
                return Err(LineTooLong { limit: self.max_line_length });
            }

            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    /// Number of buffered bytes not yet terminated by a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
