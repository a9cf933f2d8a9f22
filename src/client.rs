//! High-level asynchronous client for Allen-Bradley controllers.
//!
//! This module provides the [`Client`] struct, the primary interface for
//! polling and writing PLC data over EtherNet/IP encapsulated PCCC.
//!
//! # Overview
//!
//! A `Client` owns one background driver task on the current tokio runtime.
//! The task holds the socket, the timers and the protocol engine; the
//! `Client` handle only sends it commands and awaits the replies. The driver
//! handles:
//! - Session registration and automatic reconnection
//! - Merging polled items into as few requests as possible
//! - Correlating replies by transaction number
//! - Per-packet timeouts that degrade item quality instead of failing a batch
//!
//! # Example
//!
//! ```no_run
//! use pccc_eip::{Client, ClientConfig, PlcValue};
//!
//! # async fn run() -> pccc_eip::Result<()> {
//! let client = Client::new(ClientConfig::new("192.168.1.20"))?;
//! client.connect().await?;
//!
//! client.add_items(["N7:0", "F8:3", "B3:0/5", "T4:1.ACC"])?;
//! let result = client.read_all().await?;
//! for (address, item) in &result.values {
//!     println!("{} = {} ({})", address, item.value, item.quality);
//! }
//!
//! client.write("N7:10", 1234i16).await?;
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! The [`ClientConfig`] builder covers the endpoint, an identifier attached
//! to every log event of the client, an optional connection path for routed
//! requests, the request optimizer limits, the per-packet timeout and an
//! address translation hook.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::connection::{Action, ConnectionState, TimerKey};
use crate::engine::{
    Command, Engine, EngineConfig, Mutation, ReadResult, Translation, WriteResult,
};
use crate::error::{PcccError, Result};
use crate::optimizer::{OptimizerConfig, DEFAULT_MAX_GAP, DEFAULT_MAX_PDU};
use crate::transport::{TcpTransport, DEFAULT_EIP_PORT, DEFAULT_TIMEOUT};
use crate::value::PlcValue;

/// Default number of requests in flight.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Connection identifier used when none is configured.
pub const DEFAULT_CONNECTION_ID: &str = "UNDEF";

mod defaults {
    pub(super) fn port() -> u16 {
        super::DEFAULT_EIP_PORT
    }

    pub(super) fn connection_id() -> String {
        super::DEFAULT_CONNECTION_ID.to_string()
    }

    pub(super) fn max_parallel() -> usize {
        super::DEFAULT_MAX_PARALLEL
    }

    pub(super) fn max_pdu() -> usize {
        super::DEFAULT_MAX_PDU
    }

    pub(super) fn max_gap() -> usize {
        super::DEFAULT_MAX_GAP
    }

    pub(super) fn optimize() -> bool {
        true
    }

    pub(super) fn timeout() -> std::time::Duration {
        super::DEFAULT_TIMEOUT
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration for creating a client.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// TCP port.
    #[cfg_attr(feature = "serde", serde(default = "defaults::port"))]
    pub port: u16,
    /// Identifier attached to every log event of this client.
    #[cfg_attr(feature = "serde", serde(default = "defaults::connection_id"))]
    pub connection_id: String,
    /// Connection path bytes; empty sends requests unrouted.
    #[cfg_attr(feature = "serde", serde(default))]
    pub routing: Vec<u8>,
    /// Requests in flight at once.
    #[cfg_attr(feature = "serde", serde(default = "defaults::max_parallel"))]
    pub max_parallel: usize,
    /// Largest frame payload assumed for one request.
    #[cfg_attr(feature = "serde", serde(default = "defaults::max_pdu"))]
    pub max_pdu: usize,
    /// Largest gap in bytes bridged when merging reads.
    #[cfg_attr(feature = "serde", serde(default = "defaults::max_gap"))]
    pub max_gap: usize,
    /// Merge nearby reads into shared requests.
    #[cfg_attr(feature = "serde", serde(default = "defaults::optimize"))]
    pub optimize: bool,
    /// Connect, registration and per-packet timeout, in milliseconds when
    /// serialized.
    #[cfg_attr(
        feature = "serde",
        serde(default = "defaults::timeout", with = "duration_ms")
    )]
    pub timeout: Duration,
    /// Address translation applied before every parse.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub translation: Option<Translation>,
}

impl ClientConfig {
    /// Creates a configuration with default settings.
    ///
    /// # Arguments
    ///
    /// * `host` - Controller host name or IP address (port defaults to 44818)
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.20");
    /// assert_eq!(config.port, 44818);
    /// assert_eq!(config.connection_id, "UNDEF");
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: defaults::port(),
            connection_id: defaults::connection_id(),
            routing: Vec::new(),
            max_parallel: defaults::max_parallel(),
            max_pdu: defaults::max_pdu(),
            max_gap: defaults::max_gap(),
            optimize: defaults::optimize(),
            timeout: defaults::timeout(),
            translation: None,
        }
    }

    /// Sets a custom port (default is 44818).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the identifier attached to log events.
    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = id.into();
        self
    }

    /// Routes requests through a connection path, e.g. `[0x01, 0x00]` for
    /// backplane slot 0.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.20").with_routing([0x01, 0x00, 0x01, 0x00]);
    /// ```
    pub fn with_routing(mut self, path: impl Into<Vec<u8>>) -> Self {
        self.routing = path.into();
        self
    }

    /// Sets the number of requests in flight (default is 4).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the assumed frame payload size (default is 220).
    pub fn with_max_pdu(mut self, max_pdu: usize) -> Self {
        self.max_pdu = max_pdu;
        self
    }

    /// Sets the largest gap bridged when merging reads (default is 5 bytes).
    pub fn with_max_gap(mut self, max_gap: usize) -> Self {
        self.max_gap = max_gap;
        self
    }

    /// Enables or disables read merging (default is enabled).
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Sets the timeout (default is 4.5 seconds).
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::new("192.168.1.20").with_timeout(Duration::from_secs(2));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Installs an address translation hook.
    ///
    /// The hook maps every address passed to the client before it is parsed.
    /// Results stay keyed by the caller's original string.
    ///
    /// # Example
    ///
    /// ```
    /// use pccc_eip::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.1.20").with_translation(|name| match name {
    ///     "line_speed" => "N7:12".to_string(),
    ///     other => other.to_string(),
    /// });
    /// ```
    pub fn with_translation<F>(mut self, translate: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.translation = Some(Arc::new(translate));
        self
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::InvalidParameter` for an empty host, a zero
    /// `max_parallel`, a `max_pdu` outside 120..=244 or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(PcccError::invalid_parameter("host", "must not be empty"));
        }
        if self.max_parallel == 0 {
            return Err(PcccError::invalid_parameter(
                "max_parallel",
                "must be at least 1",
            ));
        }
        if self.timeout.is_zero() {
            return Err(PcccError::invalid_parameter("timeout", "must be non-zero"));
        }
        self.optimizer_config().map(|_| ())
    }

    fn optimizer_config(&self) -> Result<OptimizerConfig> {
        OptimizerConfig::new(self.max_pdu, self.max_gap, self.optimize)
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            timeout: self.timeout,
            max_parallel: self.max_parallel,
            optimizer: self.optimizer_config()?,
            routing: Bytes::copy_from_slice(&self.routing),
            translation: self.translation.clone(),
        })
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_id", &self.connection_id)
            .field("routing", &self.routing)
            .field("max_parallel", &self.max_parallel)
            .field("max_pdu", &self.max_pdu)
            .field("max_gap", &self.max_gap)
            .field("optimize", &self.optimize)
            .field("timeout", &self.timeout)
            .field("translation", &self.translation.is_some())
            .finish()
    }
}

/// Client for polling and writing controller data.
///
/// Every call is answered exactly once. Item-level failures show up as bad
/// [`Quality`](crate::Quality) in the result, not as `Err`. Dropping the
/// client closes the connection and ends its driver task.
///
/// # Example
///
/// ```no_run
/// use pccc_eip::{Client, ClientConfig};
///
/// # async fn run() -> pccc_eip::Result<()> {
/// let client = Client::new(ClientConfig::new("192.168.1.20").with_connection_id("press-3"))?;
/// client.connect().await?;
/// client.add_items(["N7:0", "N7:1"])?;
/// let result = client.read_all().await?;
/// assert!(!result.disconnected);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Creates a client and spawns its driver task on the current runtime.
    ///
    /// No connection is made until [`Client::connect`].
    ///
    /// # Errors
    ///
    /// Returns `PcccError::InvalidParameter` if the configuration is invalid,
    /// or `PcccError::NoRuntime` outside a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PcccError::NoRuntime)?;
        let (engine, state) = Engine::new(config.engine_config()?);
        let (commands, receiver) = mpsc::unbounded_channel();

        let span = info_span!("pccc", connection = %config.connection_id);
        let driver = Driver {
            engine,
            commands: receiver,
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            transport: None,
            connecting: None,
            timers: HashMap::new(),
        };
        runtime.spawn(driver.run().instrument(span));

        Ok(Self {
            config,
            commands,
            state,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PcccError::ClientClosed)
    }

    /// Connects and registers a session.
    ///
    /// Once connected the client reconnects by itself after failures until
    /// [`Client::disconnect`] is called.
    ///
    /// # Errors
    ///
    /// Returns the connect error (`PcccError::Io`), `PcccError::Timeout` if
    /// registration is not answered, or `PcccError::Protocol` if the reply is
    /// invalid.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Connect(tx))?;
        rx.await.map_err(|_| PcccError::ClientClosed)?
    }

    /// Adds addresses to the polled set.
    ///
    /// The change takes effect at the start of the next [`Client::read_all`].
    /// Addresses that do not resolve are logged and skipped there.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::ClientClosed` if the driver task is gone.
    pub fn add_items<I, S>(&self, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = addresses.into_iter().map(Into::into).collect();
        self.send(Command::Mutate(Mutation::Add(names)))
    }

    /// Removes addresses from the polled set at the next read.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::ClientClosed` if the driver task is gone.
    pub fn remove_items<I, S>(&self, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = addresses.into_iter().map(Into::into).collect();
        self.send(Command::Mutate(Mutation::Remove(names)))
    }

    /// Clears the polled set at the next read.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::ClientClosed` if the driver task is gone.
    pub fn remove_all_items(&self) -> Result<()> {
        self.send(Command::Mutate(Mutation::RemoveAll))
    }

    /// Reads every polled item.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::ClientClosed` if the driver task is gone. Failed
    /// items are reported through their quality.
    pub async fn read_all(&self) -> Result<ReadResult> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ReadAll(tx))?;
        rx.await.map_err(|_| PcccError::ClientClosed)
    }

    /// Writes one value.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn run(client: pccc_eip::Client) -> pccc_eip::Result<()> {
    /// client.write("B3:0/5", true).await?;
    /// client.write("F8:2", 12.5f32).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `PcccError::WriteInProgress` if another write has not finished.
    pub async fn write(
        &self,
        address: impl Into<String>,
        value: impl Into<PlcValue>,
    ) -> Result<WriteResult> {
        self.write_items([(address.into(), value.into())]).await
    }

    /// Writes several values as one batch.
    ///
    /// Each address is written on its own, never merged with its neighbours.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::WriteInProgress` if another write has not finished.
    pub async fn write_items<I, S, V>(&self, items: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<PlcValue>,
    {
        let values = items
            .into_iter()
            .map(|(address, value)| (address.into(), value.into()))
            .collect();
        let (tx, rx) = oneshot::channel();
        self.send(Command::Write(values, tx))?;
        rx.await.map_err(|_| PcccError::ClientClosed)?
    }

    /// Closes the session and stops reconnecting.
    ///
    /// Requests in flight complete with bad quality.
    ///
    /// # Errors
    ///
    /// Returns `PcccError::ClientClosed` if the driver task is gone.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Returns the configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpTransport>> + Send>>;

/// Background task owning the socket, the timers and the engine.
struct Driver {
    engine: Engine,
    commands: mpsc::UnboundedReceiver<Command>,
    host: String,
    port: u16,
    timeout: Duration,
    transport: Option<TcpTransport>,
    connecting: Option<ConnectFuture>,
    timers: HashMap<TimerKey, Instant>,
}

async fn finish_connect(connecting: &mut Option<ConnectFuture>) -> io::Result<TcpTransport> {
    match connecting.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn recv_frames(transport: &mut Option<TcpTransport>) -> io::Result<Option<Bytes>> {
    match transport.as_mut() {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        let sleep = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(sleep);

        loop {
            self.apply_actions().await;
            if let Some(deadline) = self.timers.values().min() {
                sleep.as_mut().reset(*deadline);
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.engine.handle_command(command, Instant::now()),
                    None => {
                        debug!("client dropped, stopping driver");
                        self.engine.handle_command(Command::Disconnect, Instant::now());
                        self.apply_actions().await;
                        break;
                    }
                },
                result = finish_connect(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(transport) => {
                            debug!(remote = %transport.remote_addr(), "transport connected");
                            self.transport = Some(transport);
                            self.engine.on_connected();
                        }
                        Err(e) => self.engine.on_transport_error(e),
                    }
                }
                received = recv_frames(&mut self.transport) => match received {
                    Ok(Some(data)) => self.engine.on_data(data, Instant::now()),
                    Ok(None) => {
                        if let Some(transport) = self.transport.take() {
                            if transport.buffered() > 0 {
                                warn!(bytes = transport.buffered(), "connection closed mid-frame");
                            }
                        }
                        self.engine.on_end();
                    }
                    Err(e) => {
                        self.transport = None;
                        self.engine.on_transport_error(e);
                    }
                },
                () = &mut sleep, if !self.timers.is_empty() => self.fire_timers().await,
            }
        }
    }

    /// Applies engine actions until the engine has nothing more to say.
    async fn apply_actions(&mut self) {
        loop {
            let actions = self.engine.take_actions();
            if actions.is_empty() {
                return;
            }
            for action in actions {
                match action {
                    Action::Open => {
                        self.transport = None;
                        let (host, port, timeout) = (self.host.clone(), self.port, self.timeout);
                        info!(%host, port, "opening connection");
                        self.connecting = Some(Box::pin(async move {
                            TcpTransport::connect(&host, port, timeout).await
                        }));
                    }
                    Action::Send(frame) => match self.transport.as_mut() {
                        Some(transport) => {
                            if let Err(e) = transport.send(&frame).await {
                                self.transport = None;
                                self.engine.on_transport_error(e);
                            }
                        }
                        None => debug!(len = frame.len(), "transport closed, frame dropped"),
                    },
                    Action::Close => {
                        self.connecting = None;
                        if self.transport.take().is_some() {
                            debug!("transport closed");
                        }
                    }
                    Action::ArmTimer(key, delay) => {
                        self.timers.insert(key, Instant::now() + delay);
                    }
                    Action::CancelTimer(key) => {
                        self.timers.remove(&key);
                    }
                }
            }
        }
    }

    /// Fires expired timers in deadline order, applying actions in between.
    async fn fire_timers(&mut self) {
        loop {
            let now = Instant::now();
            let due = self
                .timers
                .iter()
                .filter(|(_, at)| **at <= now)
                .min_by_key(|(_, at)| **at)
                .map(|(key, _)| *key);
            let Some(key) = due else {
                return;
            };
            self.timers.remove(&key);
            self.engine.on_timer(key, now);
            self.apply_actions().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::testing::{read_reply, registration_reply, write_reply};
    use crate::transport::complete_frames_len;
    use crate::value::{BadReason, Quality};
    use bytes::BytesMut;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Files = Arc<Mutex<HashMap<(u8, u16), Vec<u8>>>>;

    const SESSION: u32 = 0x0BAD_CAFE;
    /// Requests for this file are never answered.
    const SILENT_FILE: u16 = 50;
    /// Requests for this file fail with status 0x10.
    const FAULT_FILE: u16 = 99;

    async fn mock_controller() -> (u16, Files) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let files = Files::default();
        let shared = files.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, shared.clone()));
            }
        });
        (port, files)
    }

    async fn serve(mut socket: TcpStream, files: Files) {
        let mut buf = BytesMut::new();
        loop {
            let complete = complete_frames_len(&buf);
            if complete == 0 {
                match socket.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
            let mut chunk = buf.split_to(complete);
            while !chunk.is_empty() {
                let len = 24 + usize::from(u16::from_le_bytes([chunk[2], chunk[3]]));
                let frame = chunk.split_to(len);
                if let Some(reply) = answer(&frame, &files) {
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn answer(frame: &[u8], files: &Files) -> Option<Vec<u8>> {
        if frame[0] == 0x65 {
            return Some(registration_reply(SESSION));
        }
        let sequence = u16::from_le_bytes([frame[55], frame[56]]);
        let cmd = &frame[57..];
        let size = usize::from(cmd[1]);
        let file = u16::from(cmd[2]);
        let file_type = cmd[3];
        let (element, sub) = (usize::from(cmd[4]), usize::from(cmd[5]));
        if file == SILENT_FILE {
            return None;
        }
        if file == FAULT_FILE {
            return Some(write_reply(SESSION, sequence, 0x10));
        }
        let stride = match file_type {
            0x8A | 0x91 => 4,
            0x86..=0x88 => 6,
            _ => 2,
        };
        let offset = element * stride + sub * 2;
        let mut files = files.lock().unwrap();
        let table = files
            .entry((file_type, file))
            .or_insert_with(|| vec![0; 1024]);
        match cmd[0] {
            0xA2 => Some(read_reply(SESSION, sequence, &table[offset..offset + size])),
            0xAA => {
                table[offset..offset + size].copy_from_slice(&cmd[6..6 + size]);
                Some(write_reply(SESSION, sequence, 0))
            }
            0xAB => {
                let mask = u16::from_le_bytes([cmd[6], cmd[7]]);
                let value = u16::from_le_bytes([cmd[8], cmd[9]]);
                let word = u16::from_le_bytes([table[offset], table[offset + 1]]);
                let word = (word & !mask) | (value & mask);
                table[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
                Some(write_reply(SESSION, sequence, 0))
            }
            _ => Some(write_reply(SESSION, sequence, 0x10)),
        }
    }

    async fn connected_client(config: ClientConfig) -> Client {
        let client = Client::new(config).unwrap();
        client.connect().await.unwrap();
        client
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("10.0.0.5");
        assert_eq!(config.port, 44818);
        assert_eq!(config.connection_id, "UNDEF");
        assert!(config.routing.is_empty());
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.max_pdu, 220);
        assert_eq!(config.max_gap, 5);
        assert!(config.optimize);
        assert_eq!(config.timeout, Duration::from_millis(4500));
        assert!(config.translation.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("plc")
            .with_port(2222)
            .with_connection_id("line-1")
            .with_routing([1, 0])
            .with_max_parallel(1)
            .with_max_pdu(240)
            .with_max_gap(0)
            .with_optimize(false)
            .with_timeout(Duration::from_secs(1))
            .with_translation(|s| s.to_uppercase());
        assert_eq!(config.port, 2222);
        assert_eq!(config.connection_id, "line-1");
        assert_eq!(config.routing, vec![1, 0]);
        assert_eq!(config.max_pdu, 240);
        assert!(!config.optimize);
        assert_eq!((config.translation.as_ref().unwrap())("n7:0"), "N7:0");
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("line-1"));
        assert!(debug_str.contains("translation: true"));
    }

    #[test]
    fn test_config_validation() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("plc").with_max_parallel(0).validate().is_err());
        assert!(ClientConfig::new("plc").with_max_pdu(119).validate().is_err());
        assert!(ClientConfig::new("plc").with_max_pdu(245).validate().is_err());
        assert!(ClientConfig::new("plc").with_max_pdu(244).validate().is_ok());
        assert!(ClientConfig::new("plc")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"host":"10.0.0.5","timeout":1000,"max_pdu":240}"#).unwrap();
        assert_eq!(config.port, 44818);
        assert_eq!(config.connection_id, "UNDEF");
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_pdu, 240);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1000);
        assert!(json.get("translation").is_none());
    }

    #[test]
    fn test_client_requires_runtime() {
        assert!(matches!(
            Client::new(ClientConfig::new("127.0.0.1")),
            Err(PcccError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_client_rejects_invalid_config() {
        assert!(matches!(
            Client::new(ClientConfig::new("127.0.0.1").with_max_pdu(10)),
            Err(PcccError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (port, files) = mock_controller().await;
        let client = connected_client(ClientConfig::new("127.0.0.1").with_port(port)).await;
        assert_eq!(client.state(), ConnectionState::Ready);

        let result = client
            .write_items(vec![
                ("N7:0", PlcValue::Int(42)),
                ("N7:1", PlcValue::Int(-7)),
                ("F8:0", PlcValue::Real(2.5)),
                ("B3:0/2", PlcValue::Bool(true)),
            ])
            .await
            .unwrap();
        assert!(!result.any_bad);
        assert_eq!(result.qualities.len(), 4);
        assert_eq!(files.lock().unwrap()[&(0x89, 7)][..4], [42, 0, 0xF9, 0xFF]);

        client
            .add_items(["N7:0", "N7:1", "F8:0", "B3:0/2", "B3:0/3"])
            .unwrap();
        let read = client.read_all().await.unwrap();
        assert!(!read.any_bad);
        assert!(!read.disconnected);
        assert_eq!(read.values["N7:0"].value, PlcValue::Int(42));
        assert_eq!(read.values["N7:1"].value, PlcValue::Int(-7));
        assert_eq!(read.values["F8:0"].value, PlcValue::Real(2.5));
        assert_eq!(read.values["B3:0/2"].value, PlcValue::Bool(true));
        assert_eq!(read.values["B3:0/3"].value, PlcValue::Bool(false));
    }

    #[tokio::test]
    async fn test_masked_write_keeps_other_bits() {
        let (port, files) = mock_controller().await;
        files
            .lock()
            .unwrap()
            .insert((0x85, 3), {
                let mut table = vec![0; 1024];
                table[2] = 0b1000_0001;
                table
            });
        let client = connected_client(ClientConfig::new("127.0.0.1").with_port(port)).await;
        let result = client.write("B3:1/4", true).await.unwrap();
        assert!(!result.any_bad);
        assert_eq!(files.lock().unwrap()[&(0x85, 3)][2], 0b1001_0001);
    }

    #[tokio::test]
    async fn test_item_failures_do_not_abort_batch() {
        let (port, _files) = mock_controller().await;
        let config = ClientConfig::new("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_millis(300));
        let client = connected_client(config).await;

        client
            .add_items(["N7:0", "N50:0", "N99:0", "bogus"])
            .unwrap();
        let read = client.read_all().await.unwrap();
        assert!(read.any_bad);
        assert_eq!(read.values.len(), 3);
        assert_eq!(read.values["N7:0"].quality, Quality::Good);
        assert_eq!(
            read.values["N50:0"].quality,
            Quality::Bad(BadReason::Timeout)
        );
        assert_eq!(
            read.values["N99:0"].quality,
            Quality::Bad(BadReason::PcccStatus(0x10))
        );
        assert_eq!(read.values["N99:0"].quality.to_string(), "BAD 16");
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_translation_keys_results_by_caller_name() {
        let (port, files) = mock_controller().await;
        files.lock().unwrap().insert((0x89, 7), {
            let mut table = vec![0; 1024];
            table[24] = 99;
            table
        });
        let config = ClientConfig::new("127.0.0.1")
            .with_port(port)
            .with_translation(|name| match name {
                "line_speed" => "N7:12".to_string(),
                other => other.to_string(),
            });
        let client = connected_client(config).await;
        client.add_items(["line_speed"]).unwrap();
        let read = client.read_all().await.unwrap();
        assert_eq!(read.values["line_speed"].value, PlcValue::Int(99));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new(ClientConfig::new("127.0.0.1").with_port(port)).unwrap();
        assert!(matches!(client.connect().await, Err(PcccError::Io(_))));
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (port, _files) = mock_controller().await;
        let client = connected_client(ClientConfig::new("127.0.0.1").with_port(port)).await;
        client.add_items(["N7:0"]).unwrap();

        client.disconnect().unwrap();
        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Idle)
            .await
            .unwrap();

        let read = client.read_all().await.unwrap();
        assert!(read.disconnected);
        assert_eq!(
            read.values["N7:0"].quality,
            Quality::Bad(BadReason::NotConnected)
        );
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let files = Files::default();
        let shared = files.clone();
        tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 28];
            first.read_exact(&mut request).await.unwrap();
            first.write_all(&registration_reply(SESSION)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(first);
            let (second, _) = listener.accept().await.unwrap();
            serve(second, shared).await;
        });

        let client = connected_client(ClientConfig::new("127.0.0.1").with_port(port)).await;
        let mut state = client.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Ready),
        )
        .await
        .unwrap()
        .unwrap();

        client.add_items(["N7:0"]).unwrap();
        assert!(!client.read_all().await.unwrap().any_bad);
    }

    #[tokio::test]
    async fn test_second_write_rejected() {
        let (port, _files) = mock_controller().await;
        let client = connected_client(ClientConfig::new("127.0.0.1").with_port(port)).await;
        let (first, second) = tokio::join!(client.write("N7:0", 1i16), client.write("N7:1", 2i16));
        assert!(first.is_ok());
        assert!(matches!(second, Err(PcccError::WriteInProgress)));
    }
}
