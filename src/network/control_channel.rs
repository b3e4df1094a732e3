//! Raw TCP control channel to the emulator monitor.
//!
//! The monitor speaks a line-oriented text protocol without framing: a command is written
//! verbatim and completion is only observable as a marker (usually the prompt) showing up
//! somewhere in the output. The channel therefore polls the output on a fixed tick and
//! scans everything received so far for the marker.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Connected ──await_marker──▶ AwaitingMarker
//!                                              ▲                          │      │
//!                                              └──────── timeout ─────────┘   marker
//!                                                                                │
//!                                                      Closed ◀──────────────────┘
//! ```

use crate::error_handling::types::ChannelError;
use crate::network::types::RetryPolicy;
use log::{debug, info, warn};
use std::borrow::Cow;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};

/// Largest chunk of output read per poll.
pub const OUTPUT_SIZE: usize = 2048;

/// Default number of output polls before giving up on a marker.
pub const MARKER_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    AwaitingMarker,
    Closed,
}

/// A command for the monitor and the marker that signals it has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub text: String,
    pub marker: String,
}

impl ControlCommand {
    pub fn new(text: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marker: marker.into(),
        }
    }

    /// Credential rotation: the command, then the new credential twice (entry and
    /// confirmation), each on its own line.
    pub fn rotate_credential(command: &str, credential: &str, marker: &str) -> Self {
        Self::new(
            format!("{}{}\n{}\n", command, credential, credential),
            marker,
        )
    }
}

pub struct ControlChannel<S = TcpStream> {
    port: u16,
    stream: Option<S>,
    state: ChannelState,
    poll_interval: Duration,
    output: Vec<u8>,
}

impl ControlChannel<TcpStream> {
    /// Connects to `127.0.0.1:port`, retrying once per `policy.interval` for up to
    /// `policy.attempts` tries.
    pub async fn connect(port: u16, policy: RetryPolicy) -> Result<Self, ChannelError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        debug!("Connecting to control port {}", port);

        for attempt in 1..=policy.attempts {
            match timeout(policy.interval, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    info!(
                        "Control channel connected on port {} (attempt {}/{})",
                        port, attempt, policy.attempts
                    );
                    return Ok(Self::from_stream(port, stream, policy.interval));
                }
                Ok(Err(e)) => {
                    debug!(
                        "Control port {} attempt {}/{} failed: {}",
                        port, attempt, policy.attempts, e
                    );
                }
                Err(_) => {
                    debug!(
                        "Control port {} attempt {}/{} timed out",
                        port, attempt, policy.attempts
                    );
                    continue;
                }
            }
            sleep(policy.interval).await;
        }

        warn!(
            "Control port {} unreachable after {} attempts",
            port, policy.attempts
        );
        Err(ChannelError::ConnectionTimeout {
            port,
            attempts: policy.attempts,
        })
    }

    /// Connects, sends `command` and waits for its marker. The channel is closed on every
    /// exit path, whatever the outcome.
    pub async fn with_connection(
        port: u16,
        command: &ControlCommand,
        policy: RetryPolicy,
        marker_attempts: u32,
    ) -> Result<(), ChannelError> {
        let mut channel = Self::connect(port, policy).await?;
        let result = channel.exchange(command, marker_attempts).await;
        channel.close().await;
        result
    }
}

impl<S> ControlChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn from_stream(port: u16, stream: S, poll_interval: Duration) -> Self {
        Self {
            port,
            stream: Some(stream),
            state: ChannelState::Connected,
            poll_interval,
            output: Vec::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Everything read from the monitor so far.
    pub fn output(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// Writes `text` as-is. No line terminator is added.
    pub async fn send(&mut self, text: &str) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.write_all(text.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Polls the output once per tick until `marker` shows up, then closes the channel.
    ///
    /// On timeout the channel stays open; closing it is up to the caller.
    pub async fn await_marker(&mut self, marker: &str, attempts: u32) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        self.state = ChannelState::AwaitingMarker;
        let mut buf = [0u8; OUTPUT_SIZE];

        for attempt in 1..=attempts {
            let tick = Instant::now() + self.poll_interval;
            match timeout_at(tick, stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    self.state = ChannelState::Connected;
                    return Err(ChannelError::PeerClosed);
                }
                Ok(Ok(n)) => {
                    self.output.extend_from_slice(&buf[..n]);
                    if contains_marker(&self.output, marker.as_bytes()) {
                        debug!(
                            "Marker {:?} seen on port {} after {} polls",
                            marker, self.port, attempt
                        );
                        self.close().await;
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    self.state = ChannelState::Connected;
                    return Err(e.into());
                }
                Err(_) => debug!("No output from port {} on poll {}", self.port, attempt),
            }
            sleep_until(tick).await;
        }

        self.state = ChannelState::Connected;
        Err(ChannelError::WaitTimeout {
            marker: marker.to_string(),
            attempts,
        })
    }

    /// Shuts the stream down. Safe to call more than once; a closed channel stays closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of control port {} failed: {}", self.port, e);
            }
            debug!("Control channel on port {} closed", self.port);
        }
        self.state = ChannelState::Closed;
    }

    async fn exchange(
        &mut self,
        command: &ControlCommand,
        marker_attempts: u32,
    ) -> Result<(), ChannelError> {
        self.send(&command.text).await?;
        self.await_marker(&command.marker, marker_attempts).await
    }
}

/// Markers are matched on raw bytes, so a character split between two reads still matches.
fn contains_marker(output: &[u8], marker: &[u8]) -> bool {
    marker.is_empty() || output.windows(marker.len()).any(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::port_allocator::PortAllocator;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(50))
    }

    #[test]
    fn test_rotation_command_repeats_credential() {
        let command = ControlCommand::rotate_credential("change vnc password\n", "abc", "(qemu)");
        assert_eq!(command.text, "change vnc password\nabc\nabc\n");
        assert_eq!(command.marker, "(qemu)");
    }

    #[tokio::test]
    async fn test_connect_times_out_with_nothing_listening() {
        let port = PortAllocator::allocate().unwrap();
        let started = std::time::Instant::now();

        let result = ControlChannel::connect(port, fast(3)).await;

        assert!(matches!(
            result,
            Err(ChannelError::ConnectionTimeout { attempts: 3, .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_connect_succeeds_when_listener_appears() {
        let port = PortAllocator::allocate().unwrap();
        let server = tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();
            let _ = listener.accept().await.unwrap();
        });

        let started = std::time::Instant::now();
        let channel = ControlChannel::connect(port, fast(40)).await.unwrap();

        assert_eq!(channel.state(), ChannelState::Connected);
        assert!(started.elapsed() < Duration::from_secs(1));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_await_marker_across_polls() {
        let stream = Builder::new()
            .write(b"info status\n")
            .read(b"VM status: ")
            .read(b"running\r\n(qemu) ")
            .build();
        let mut channel = ControlChannel::from_stream(0, stream, Duration::from_millis(10));

        channel.send("info status\n").await.unwrap();
        channel.await_marker("(qemu)", MARKER_ATTEMPTS).await.unwrap();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.output().contains("running"));
    }

    #[tokio::test]
    async fn test_marker_split_between_reads() {
        let stream = Builder::new().read(b"done (qe").read(b"mu) ").build();
        let mut channel = ControlChannel::from_stream(0, stream, Duration::from_millis(10));

        channel.await_marker("(qemu)", 3).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_multibyte_marker_split_between_reads() {
        let marker = "Prêt>";
        let bytes = marker.as_bytes();
        // cut inside the two-byte 'ê'
        let stream = Builder::new()
            .read(b"status ok\n")
            .read(&bytes[..3])
            .read(&bytes[3..])
            .build();
        let mut channel = ControlChannel::from_stream(0, stream, Duration::from_millis(10));

        channel.await_marker(marker, 5).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.output().ends_with(marker));
    }

    #[test]
    fn test_contains_marker() {
        assert!(contains_marker(b"abc (qemu) ", b"(qemu)"));
        assert!(!contains_marker(b"(qem", b"(qemu)"));
        assert!(contains_marker(b"", b""));
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_channel_open() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let mut channel = ControlChannel::connect(port, fast(5)).await.unwrap();
        let result = channel.await_marker("(qemu)", 2).await;

        assert!(matches!(
            result,
            Err(ChannelError::WaitTimeout { attempts: 2, .. })
        ));
        assert_eq!(channel.state(), ChannelState::Connected);
        channel.send("still open\n").await.unwrap();

        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.send("again").await,
            Err(ChannelError::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_closed_before_marker() {
        let stream = Builder::new().read(b"bye").build();
        let mut channel = ControlChannel::from_stream(0, stream, Duration::from_millis(10));

        let result = channel.await_marker("(qemu)", 5).await;
        assert!(matches!(result, Err(ChannelError::PeerClosed)));
    }

    #[tokio::test]
    async fn test_with_connection_sends_and_closes() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let command = ControlCommand::rotate_credential("change vnc password\n", "secret", "(qemu)");
        let expected = command.text.clone();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 256];
            while received.len() < expected.len() {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0);
                received.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"(qemu)\n").await.unwrap();
            // the client closes once it has seen the marker
            let n = socket.read(&mut buf).await.unwrap();
            (String::from_utf8(received).unwrap(), n)
        });

        ControlChannel::with_connection(port, &command, fast(5), 10)
            .await
            .unwrap();

        let (received, trailing) = server.await.unwrap();
        assert_eq!(received, "change vnc password\nsecret\nsecret\n");
        assert_eq!(trailing, 0);
    }

    #[tokio::test]
    async fn test_with_connection_propagates_timeout() {
        let port = PortAllocator::allocate().unwrap();
        let command = ControlCommand::new("quit\n", "(qemu)");

        let result = ControlChannel::with_connection(port, &command, fast(2), 2).await;
        assert!(matches!(
            result,
            Err(ChannelError::ConnectionTimeout { .. })
        ));
    }
}
