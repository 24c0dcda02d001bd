//! # Transport contract
//!
//! Sessions never open, configure or close the communication medium
//! themselves. They only need one capability: send the request bytes and
//! receive exactly `response_len` bytes back. The capability comes in a
//! blocking flavour ([`ModbusProtocol`]) and an async flavour
//! ([`AsyncModbusProtocol`]); both report "nothing received" as `Ok(None)`.
//!
//! [`StreamProtocol`] implements the contract over any byte stream:
//! - blocking for `std::io::Read + Write` (e.g. `std::net::TcpStream`),
//! - async for Tokio `AsyncRead + AsyncWrite` (e.g. `tokio::net::TcpStream`,
//!   `tokio_serial::SerialStream`).
//!
//! ## Reading rules
//!
//! | Outcome | Result |
//! |---------|--------|
//! | all `response_len` bytes received | `Ok(Some(bytes))` |
//! | EOF or timeout before the first byte | `Ok(None)` |
//! | EOF after some bytes | `Err(Frame)` |
//! | timeout after some bytes | `Err(Timeout)` |
//!
//! A response that times out may still arrive later. The bytes it still owes
//! are remembered and discarded before the next request is written, so a late
//! answer is never mistaken for the answer to the following request.

use std::future::Future;
use std::io::{self, Read, Write};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;

/// Blocking "send request, receive N bytes" capability.
pub trait ModbusProtocol {
    /// Send `request` and wait for exactly `response_len` bytes.
    ///
    /// Returns `Ok(None)` if the remote side sent nothing.
    fn send_for_result(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> ModbusResult<Option<Vec<u8>>>;
}

/// Async "send request, receive N bytes" capability.
pub trait AsyncModbusProtocol: Send {
    /// Send `request` and wait for exactly `response_len` bytes.
    ///
    /// Returns `Ok(None)` if the remote side sent nothing.
    fn send_for_result_async(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> impl Future<Output = ModbusResult<Option<Vec<u8>>>> + Send;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    /// Requests that were answered with nothing at all
    pub no_responses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Late or unsolicited bytes dropped before a request
    pub discarded_bytes: u64,
}

/// Stream transport configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Deadline for sending a request and for receiving its response.
    /// `None` waits forever. Blocking streams enforce their own timeouts
    /// (e.g. `TcpStream::set_read_timeout`).
    pub response_timeout: Option<Duration>,
    /// Dump every frame through `tracing` at info level
    pub packet_logging: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS)),
            packet_logging: false,
        }
    }
}

impl StreamConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Response timeout, `None` waits forever.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Log every frame sent and received.
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    fn timeout_ms(&self) -> u64 {
        self.response_timeout
            .map(|timeout| timeout.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// How reading a response ended.
enum ReadOutcome {
    Complete,
    Eof,
    TimedOut,
    Failed(io::Error),
}

impl From<io::Result<()>> for ReadOutcome {
    fn from(result: io::Result<()>) -> Self {
        match result {
            Ok(()) => ReadOutcome::Complete,
            Err(e) => match e.kind() {
                io::ErrorKind::UnexpectedEof => ReadOutcome::Eof,
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ReadOutcome::TimedOut,
                _ => ReadOutcome::Failed(e),
            },
        }
    }
}

/// Request/response transport over a byte stream.
#[derive(Debug)]
pub struct StreamProtocol<S> {
    stream: S,
    config: StreamConfig,
    stats: TransportStats,
    label: &'static str,
    /// Bytes still owed by a response abandoned after a timeout
    stale: Option<usize>,
}

impl<S> StreamProtocol<S> {
    /// Wrap `stream` with the given configuration.
    pub fn new(stream: S, config: StreamConfig) -> Self {
        Self {
            stream,
            config,
            stats: TransportStats::default(),
            label: "STREAM",
            stale: None,
        }
    }

    /// Set the transport label shown in packet logs (e.g. `"TCP"`, `"RTU"`).
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    /// Snapshot of the transport statistics
    pub fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable access to the underlying stream
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Release the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn record_sent(&mut self, request: &[u8]) {
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += request.len() as u64;
        if self.config.packet_logging {
            log_packet("send", request, self.label);
        }
    }

    fn record_discarded(&mut self, discarded: usize) {
        if discarded > 0 {
            self.stats.discarded_bytes += discarded as u64;
            debug!(
                "[MODBUS-{}] discarded {} stale bytes before request",
                self.label, discarded
            );
        }
    }

    fn send_failed(&mut self, error: io::Error) -> ModbusError {
        self.stats.errors += 1;
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                self.stats.timeouts += 1;
                ModbusError::timeout("send request", self.config.timeout_ms())
            }
            _ => ModbusError::Io(error),
        }
    }

    fn finish(
        &mut self,
        buffer: Vec<u8>,
        filled: usize,
        outcome: ReadOutcome,
    ) -> ModbusResult<Option<Vec<u8>>> {
        match outcome {
            ReadOutcome::Complete => {
                self.stats.responses_received += 1;
                self.stats.bytes_received += buffer.len() as u64;
                if self.config.packet_logging {
                    log_packet("receive", &buffer, self.label);
                }
                Ok(Some(buffer))
            }
            ReadOutcome::Eof | ReadOutcome::TimedOut if filled == 0 => {
                if matches!(outcome, ReadOutcome::TimedOut) {
                    self.stats.timeouts += 1;
                    self.stale = Some(buffer.len());
                }
                self.stats.no_responses += 1;
                debug!("[MODBUS-{}] no response received", self.label);
                Ok(None)
            }
            ReadOutcome::Eof => {
                self.stats.errors += 1;
                self.stats.bytes_received += filled as u64;
                Err(ModbusError::frame(format!(
                    "Incomplete response: received {} of {} bytes",
                    filled,
                    buffer.len()
                )))
            }
            ReadOutcome::TimedOut => {
                self.stats.errors += 1;
                self.stats.timeouts += 1;
                self.stats.bytes_received += filled as u64;
                self.stale = Some(buffer.len() - filled);
                Err(ModbusError::timeout(
                    format!("read response ({} of {} bytes)", filled, buffer.len()),
                    self.config.timeout_ms(),
                ))
            }
            ReadOutcome::Failed(error) => {
                self.stats.errors += 1;
                Err(ModbusError::Io(error))
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> StreamProtocol<S> {
    /// Shut the write half of the stream down.
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn read_blocking<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    filled: &mut usize,
) -> io::Result<()> {
    while *filled < buffer.len() {
        match reader.read(&mut buffer[*filled..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => *filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn read_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
    filled: &mut usize,
) -> io::Result<()> {
    while *filled < buffer.len() {
        let n = reader.read(&mut buffer[*filled..]).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        *filled += n;
    }
    Ok(())
}

/// Discard whatever is already buffered without waiting for more.
async fn drain_ready<R: AsyncRead + Unpin>(reader: &mut R) -> usize {
    let mut scratch = [0u8; 64];
    let mut discarded = 0;
    loop {
        match tokio::time::timeout(Duration::ZERO, reader.read(&mut scratch)).await {
            Ok(Ok(n)) if n > 0 => discarded += n,
            _ => return discarded,
        }
    }
}

async fn write_async<W: AsyncWrite + Unpin>(writer: &mut W, request: &[u8]) -> io::Result<()> {
    writer.write_all(request).await?;
    writer.flush().await
}

impl<S: Read + Write> ModbusProtocol for StreamProtocol<S> {
    fn send_for_result(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> ModbusResult<Option<Vec<u8>>> {
        // The socket read timeout bounds the wait for a late response
        if let Some(owed) = self.stale.take() {
            let mut scratch = vec![0u8; owed];
            let mut discarded = 0;
            let _ = read_blocking(&mut self.stream, &mut scratch, &mut discarded);
            self.record_discarded(discarded);
        }
        self.record_sent(request);

        let written = self
            .stream
            .write_all(request)
            .and_then(|()| self.stream.flush());
        if let Err(e) = written {
            return Err(self.send_failed(e));
        }

        let mut buffer = vec![0u8; response_len];
        let mut filled = 0;
        let read = read_blocking(&mut self.stream, &mut buffer, &mut filled);
        let outcome = ReadOutcome::from(read);
        self.finish(buffer, filled, outcome)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncModbusProtocol for StreamProtocol<S> {
    async fn send_for_result_async(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> ModbusResult<Option<Vec<u8>>> {
        if let Some(owed) = self.stale.take() {
            let mut scratch = vec![0u8; owed];
            let mut discarded = 0;
            let wait = self.config.response_timeout.unwrap_or(Duration::ZERO);
            let late = read_async(&mut self.stream, &mut scratch, &mut discarded);
            let _ = tokio::time::timeout(wait, late).await;
            discarded += drain_ready(&mut self.stream).await;
            self.record_discarded(discarded);
        }
        self.record_sent(request);

        let written = match self.config.response_timeout {
            Some(limit) => tokio::time::timeout(limit, write_async(&mut self.stream, request))
                .await
                .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
            None => write_async(&mut self.stream, request).await,
        };
        if let Err(e) = written {
            return Err(self.send_failed(e));
        }

        let mut buffer = vec![0u8; response_len];
        let mut filled = 0;
        let outcome = match self.config.response_timeout {
            Some(limit) => {
                let read = read_async(&mut self.stream, &mut buffer, &mut filled);
                match tokio::time::timeout(limit, read).await {
                    Ok(result) => ReadOutcome::from(result),
                    Err(_) => ReadOutcome::TimedOut,
                }
            }
            None => {
                let read = read_async(&mut self.stream, &mut buffer, &mut filled);
                ReadOutcome::from(read.await)
            }
        };
        self.finish(buffer, filled, outcome)
    }
}
