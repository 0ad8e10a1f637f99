// src/link.rs
//! Telemetry link to a GPS-over-network device
//!
//! A [`TelemetryLink`] owns one connection attempt at a time: it connects,
//! sends the device's request line, frames the incoming bytes into lines,
//! decodes each line and reports everything that happens as a [`LinkEvent`]
//! on a caller supplied [`LinkSink`].
//!
//! The link never reconnects on its own. When a connection ends with a
//! terminal event the caller decides whether, and when, to call
//! [`TelemetryLink::start`] again.
//!
//! ```ignore
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let handle = TelemetryLink::new(LinkConfig::default()).start(tx);
//!
//! while let Some(event) = rx.recv().await {
//!     if let LinkEvent::FixReceived(fix) = event {
//!         println!("{}, {}", fix.latitude, fix.longitude);
//!     }
//! }
//! ```

use crate::{
    error::{GpsError, Result},
    gps::{
        gps2ip::{self, LineFramer, DEFAULT_DEVICE_PORT, LIVE_REQUEST},
        nmea::{self, Rejection},
        PositionFix,
    },
};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 1024;

/// Connection settings for one device.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub delimiter: u8,
    pub max_line_length: usize,
    pub request_line: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DEVICE_PORT,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            delimiter: b'\n',
            max_line_length: 4096,
            request_line: LIVE_REQUEST.to_string(),
        }
    }
}

/// Lifecycle of a single connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request line not sent: {0}")]
    Request(String),
    #[error("line too long: more than {0} bytes without a delimiter")]
    LineTooLong(usize),
}

/// Everything the link reports to its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    FixReceived(PositionFix),
    FixRejected(Rejection),
    TimedOut,
    LinkClosed,
    LinkError(LinkFailure),
    ConnectFailed(ConnectFailure),
}

impl LinkEvent {
    /// Whether this event ends the connection attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkEvent::TimedOut
                | LinkEvent::LinkClosed
                | LinkEvent::LinkError(_)
                | LinkEvent::ConnectFailed(_)
        )
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Connected => write!(f, "connected"),
            LinkEvent::FixReceived(fix) => {
                write!(f, "fix {:.6}, {:.6} at {}", fix.latitude, fix.longitude, fix.timestamp())
            }
            LinkEvent::FixRejected(reason) => write!(f, "sentence rejected: {}", reason),
            LinkEvent::TimedOut => write!(f, "no data within the idle timeout"),
            LinkEvent::LinkClosed => write!(f, "device closed the connection"),
            LinkEvent::LinkError(reason) => write!(f, "link error: {}", reason),
            LinkEvent::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
        }
    }
}

/// Receiver of link events.
///
/// `emit` is called from the link's task and should not block.
pub trait LinkSink: Send + Sync + 'static {
    fn emit(&self, event: LinkEvent);
}

impl LinkSink for mpsc::UnboundedSender<LinkEvent> {
    fn emit(&self, event: LinkEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

impl<S: LinkSink + ?Sized> LinkSink for Arc<S> {
    fn emit(&self, event: LinkEvent) {
        (**self).emit(event)
    }
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLinkSink;

impl LinkSink for TracingLinkSink {
    fn emit(&self, event: LinkEvent) {
        match &event {
            LinkEvent::Connected => info!("GPS device connected"),
            LinkEvent::FixReceived(fix) => debug!(
                lat = format!("{:.6}", fix.latitude),
                lon = format!("{:.6}", fix.longitude),
                speed_kmh = format!("{:.1}", fix.speed_kmh),
                "Fix received"
            ),
            LinkEvent::FixRejected(Rejection::FixNotValid) => trace!("No satellite fix yet"),
            LinkEvent::FixRejected(reason) => debug!(reason = %reason, "Sentence rejected"),
            LinkEvent::LinkClosed => info!("GPS device closed the connection"),
            LinkEvent::TimedOut | LinkEvent::LinkError(_) | LinkEvent::ConnectFailed(_) => {
                warn!(event = %event, "GPS link failed")
            }
        }
    }
}

/// Handle to a running connection attempt.
///
/// Dropping the handle stops the link.
pub struct LinkHandle {
    cancel: CancellationToken,
    task: JoinHandle<ConnectionState>,
    _guard: DropGuard,
}

impl LinkHandle {
    /// Request a stop. Pending connects and reads are abandoned right away.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the link to end and return its final state.
    pub async fn join(self) -> Result<ConnectionState> {
        let LinkHandle { task, _guard, .. } = self;
        task.await
            .map_err(|e| GpsError::Other(format!("Telemetry link task failed: {}", e)))
    }

    /// Stop the link and wait for it to wind down.
    pub async fn shutdown(self) -> Result<ConnectionState> {
        self.stop();
        self.join().await
    }
}

/// Telemetry link for one device.
#[derive(Debug, Clone)]
pub struct TelemetryLink {
    config: LinkConfig,
}

impl TelemetryLink {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Start a connection attempt on a new task.
    pub fn start<S: LinkSink>(&self, sink: S) -> LinkHandle {
        let cancel = CancellationToken::new();
        let runner = LinkRunner {
            framer: LineFramer::new(self.config.delimiter, self.config.max_line_length),
            config: self.config.clone(),
            sink,
            cancel: cancel.clone(),
            state: ConnectionState::Disconnected,
        };

        LinkHandle {
            task: tokio::spawn(runner.run()),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Connect, wait for the first valid fix and disconnect.
    ///
    /// Fails if the connection ends, or `deadline` passes, before a fix arrives.
    pub async fn probe(config: LinkConfig, deadline: Duration) -> Result<PositionFix> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TelemetryLink::new(config).start(tx);

        let first_fix = async {
            while let Some(event) = rx.recv().await {
                match event {
                    LinkEvent::FixReceived(fix) => return Ok(fix),
                    event if event.is_terminal() => {
                        return Err(GpsError::Connection(event.to_string()))
                    }
                    _ => {}
                }
            }
            Err(GpsError::Connection("link ended before a fix arrived".to_string()))
        };

        let outcome = match tokio::time::timeout(deadline, first_fix).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GpsError::Connection(format!("no valid fix within {:?}", deadline))),
        };

        handle.shutdown().await?;
        outcome
    }
}

/// What ended a wait inside the link task.
enum Wake<T> {
    Cancelled,
    Ready(T),
}

struct LinkRunner<S> {
    config: LinkConfig,
    framer: LineFramer,
    sink: S,
    cancel: CancellationToken,
    state: ConnectionState,
}

impl<S: LinkSink> LinkRunner<S> {
    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, host = %self.config.host, port = self.config.port, "Link state");
        self.state = next;
    }

    fn fail(&mut self, event: LinkEvent) -> ConnectionState {
        self.transition(ConnectionState::Failed);
        self.sink.emit(event);
        self.state
    }

    async fn run(mut self) -> ConnectionState {
        self.transition(ConnectionState::Connecting);
        let cancel = self.cancel.clone();
        let connect_timeout = self.config.connect_timeout;

        let connect = tokio::time::timeout(
            connect_timeout,
            gps2ip::connect_device(&self.config.host, self.config.port),
        );
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            result = connect => Wake::Ready(result),
        };

        let mut stream = match connected {
            Wake::Cancelled => {
                self.transition(ConnectionState::Disconnected);
                return self.state;
            }
            Wake::Ready(Ok(Ok(stream))) => stream,
            Wake::Ready(Ok(Err(e))) => {
                return self.fail(LinkEvent::ConnectFailed(ConnectFailure::Transport(e.to_string())))
            }
            Wake::Ready(Err(_)) => {
                return self.fail(LinkEvent::ConnectFailed(ConnectFailure::Timeout(connect_timeout)))
            }
        };

        self.transition(ConnectionState::Connected);
        self.sink.emit(LinkEvent::Connected);

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            result = gps2ip::send_request(&mut stream, &self.config.request_line) => Wake::Ready(result),
        };
        match sent {
            Wake::Cancelled => return self.drain(stream).await,
            Wake::Ready(Err(e)) => return self.fail(LinkEvent::LinkError(LinkFailure::Request(e.to_string()))),
            Wake::Ready(Ok(())) => {}
        }

        self.read_loop(stream).await
    }

    async fn read_loop(&mut self, mut stream: TcpStream) -> ConnectionState {
        let cancel = self.cancel.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                result = tokio::time::timeout(idle_timeout, stream.read(&mut buffer)) => Wake::Ready(result),
            };

            match read {
                Wake::Cancelled => return self.drain(stream).await,
                Wake::Ready(Err(_)) => return self.fail(LinkEvent::TimedOut),
                Wake::Ready(Ok(Ok(0))) => {
                    if self.framer.pending() > 0 {
                        trace!(bytes = self.framer.pending(), "Discarding partial line at end of stream");
                        self.framer.clear();
                    }
                    return self.fail(LinkEvent::LinkClosed);
                }
                Wake::Ready(Ok(Ok(n))) => {
                    self.framer.extend(&buffer[..n]);
                    loop {
                        match self.framer.next_line() {
                            Ok(Some(line)) => self.dispatch(&line),
                            Ok(None) => break,
                            Err(e) => return self.fail(LinkEvent::LinkError(LinkFailure::LineTooLong(e.limit))),
                        }
                    }
                }
                Wake::Ready(Ok(Err(e))) => {
                    return self.fail(LinkEvent::LinkError(LinkFailure::Transport(e.to_string())))
                }
            }
        }
    }

    fn dispatch(&self, line: &[u8]) {
        match nmea::decode_raw(line) {
            Ok(fix) => self.sink.emit(LinkEvent::FixReceived(fix)),
            Err(reason) => {
                trace!(reason = %reason, line = %String::from_utf8_lossy(line), "Line did not decode");
                self.sink.emit(LinkEvent::FixRejected(reason));
            }
        }
    }

    /// Stop requested: drop any partial line and close the socket.
    async fn drain(&mut self, mut stream: TcpStream) -> ConnectionState {
        self.transition(ConnectionState::Draining);
        if self.framer.pending() > 0 {
            trace!(bytes = self.framer.pending(), "Discarding partial line on stop");
            self.framer.clear();
        }
        if let Err(e) = stream.shutdown().await {
            trace!(error = %e, "Socket shutdown failed");
        }
        drop(stream);
        self.transition(ConnectionState::Disconnected);
        self.state
    }
}
