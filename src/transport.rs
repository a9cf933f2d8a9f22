//! TCP transport layer for EtherNet/IP communication.
//!
//! This module provides the [`TcpTransport`] struct which handles the byte
//! stream to the controller. The transport only knows about sockets and
//! encapsulation frame boundaries; all PCCC knowledge lives in the engine.
//!
//! # Framing
//!
//! TCP delivers a byte stream, so replies may arrive split or batched. The
//! transport accumulates bytes and hands out only the prefix made of complete
//! encapsulation frames (24-byte header plus the declared length at offset 2).
//! A partial trailing frame stays buffered until the rest arrives.
//!
//! # Constants
//!
//! - [`DEFAULT_EIP_PORT`] - EtherNet/IP explicit messaging port (44818)
//! - [`DEFAULT_TIMEOUT`] - Default connect and per-packet timeout (4.5 seconds)
//! - [`READ_BUFFER_SIZE`] - Initial receive buffer capacity
//!
//! # Example
//!
//! The transport is normally driven by the [`Client`](crate::Client), but can
//! be used directly:
//!
//! ```no_run
//! use pccc_eip::{TcpTransport, DEFAULT_TIMEOUT};
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.10", 44818, DEFAULT_TIMEOUT).await?;
//! transport.send(&pccc_eip::register_session_request()).await?;
//! if let Some(frames) = transport.recv().await? {
//!     println!("{} bytes of complete frames", frames.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::header::ENCAP_HEADER_SIZE;

/// Default EtherNet/IP TCP port.
pub const DEFAULT_EIP_PORT: u16 = 44818;

/// Default timeout for connecting and for each request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(4500);

/// Initial capacity of the receive buffer.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Returns the length of the longest prefix of `buf` made of complete
/// encapsulation frames.
///
/// # Example
///
/// ```
/// use pccc_eip::complete_frames_len;
///
/// let mut stream = vec![0x6F, 0x00, 0x02, 0x00];
/// stream.extend_from_slice(&[0u8; 22]); // one 26-byte frame
/// stream.extend_from_slice(&[0x6F, 0x00, 0x10]); // start of the next
/// assert_eq!(complete_frames_len(&stream), 26);
/// ```
pub fn complete_frames_len(buf: &[u8]) -> usize {
    let mut complete = 0;
    while buf.len() - complete >= ENCAP_HEADER_SIZE {
        let declared = usize::from(u16::from_le_bytes([buf[complete + 2], buf[complete + 3]]));
        let frame_len = ENCAP_HEADER_SIZE + declared;
        if buf.len() - complete < frame_len {
            break;
        }
        complete += frame_len;
    }
    complete
}

/// TCP transport for EtherNet/IP communication.
pub struct TcpTransport {
    stream: TcpStream,
    remote_addr: SocketAddr,
    buffer: BytesMut,
}

impl TcpTransport {
    /// Opens a TCP connection to the controller.
    ///
    /// # Arguments
    ///
    /// * `host` - Host name or IP address of the controller
    /// * `port` - TCP port, normally [`DEFAULT_EIP_PORT`]
    /// * `timeout` - Maximum time to wait for the connection
    ///
    /// # Errors
    ///
    /// Returns the connect error, or `ErrorKind::TimedOut` if the timeout
    /// expires first.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {}:{} timed out", host, port),
                )
            })??;
        stream.set_nodelay(true)?;
        let remote_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            remote_addr,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        })
    }

    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await
    }

    /// Waits for at least one complete frame.
    ///
    /// Returns every complete frame received so far as one buffer, or `None`
    /// once the peer has closed the connection. Cancel safe: bytes already
    /// read stay buffered.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            let complete = complete_frames_len(&self.buffer);
            if complete > 0 {
                return Ok(Some(self.buffer.split_to(complete).freeze()));
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Returns the controller address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the number of buffered bytes not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn frame(declared: u16) -> Vec<u8> {
        let mut f = vec![0x6F, 0x00];
        f.extend_from_slice(&declared.to_le_bytes());
        f.resize(ENCAP_HEADER_SIZE + usize::from(declared), 0xAA);
        f
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_EIP_PORT, 44818);
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_millis(4500));
    }

    #[test]
    fn test_complete_frames_len() {
        assert_eq!(complete_frames_len(&[]), 0);
        assert_eq!(complete_frames_len(&frame(4)[..20]), 0);
        assert_eq!(complete_frames_len(&frame(4)), 28);

        let mut two = frame(4);
        two.extend(frame(10));
        assert_eq!(complete_frames_len(&two), 62);

        two.extend(&frame(8)[..30]);
        assert_eq!(complete_frames_len(&two), 62);
    }

    #[tokio::test]
    async fn test_transport_reassembles_split_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = frame(4);
            data.extend(frame(2));
            socket.write_all(&data[..10]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&data[10..40]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&data[40..]).await.unwrap();
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let first = transport.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 28);
        let second = transport.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 26);
        server.await.unwrap();
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_frame_stays_buffered_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = frame(4);
            data.extend(&frame(8)[..10]);
            socket.write_all(&data).await.unwrap();
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        server.await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap().len(), 28);
        assert!(transport.recv().await.unwrap().is_none());
        assert_eq!(transport.buffered(), 10);
    }

    #[tokio::test]
    async fn test_transport_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();

        transport.send(&[1, 2, 3]).await.unwrap();
        let mut received = [0u8; 3];
        socket.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_transport_debug() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = TcpTransport::connect("127.0.0.1", addr.port(), Duration::from_secs(1))
            .await
            .unwrap();
        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("TcpTransport"));
        assert!(debug_str.contains(&addr.to_string()));
        assert_eq!(transport.remote_addr(), addr);
        assert_eq!(transport.buffered(), 0);
    }
}
