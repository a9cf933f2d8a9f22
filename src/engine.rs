//! Sans-IO protocol engine.
//!
//! The engine owns all per-connection state and reacts to events:
//!
//! | Event | Method |
//! |-------|--------|
//! | user command | [`Engine::handle_command`] |
//! | transport connected | [`Engine::on_connected`] |
//! | bytes received | [`Engine::on_data`] |
//! | transport error | [`Engine::on_transport_error`] |
//! | peer closed | [`Engine::on_end`] |
//! | timer expired | [`Engine::on_timer`] |
//!
//! Side effects are queued as [`Action`]s and collected with
//! [`Engine::take_actions`]. User completions go out through the oneshot
//! senders carried by the commands, exactly once each.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::address::Address;
use crate::connection::{
    Action, Connection, ConnectionState, TimerKey, READ_RETRY_POLL, RECONNECT_BACKOFF, RESET_GRACE,
};
use crate::error::{PcccError, Result};
use crate::header::FrameBuilder;
use crate::ledger::{DispatchLedger, PacketKind, ReplyMatch};
use crate::optimizer::{plan_reads, plan_writes, OptimizerConfig, ReadPlan, WriteItem, WritePlan};
use crate::response::{decode_frames, parse_read_payload, parse_write_payload, DecodedReply};
use crate::transport::DEFAULT_TIMEOUT;
use crate::utils::format_hex_bytes;
use crate::value::{
    bad_item, decode, encode, BadReason, ItemValue, PlcValue, Quality, QUALITY_BAD, QUALITY_GOOD,
};

/// Address translation applied before every parse.
pub type Translation = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Engine settings derived from the client configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Per-packet and registration timeout.
    pub timeout: Duration,
    /// Packets outstanding at once.
    pub max_parallel: usize,
    /// Planning rules.
    pub optimizer: OptimizerConfig,
    /// Connection path; empty sends unrouted frames.
    pub routing: Bytes,
    /// Optional address translation.
    pub translation: Option<Translation>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_parallel: 4,
            optimizer: OptimizerConfig::default(),
            routing: Bytes::new(),
            translation: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("timeout", &self.timeout)
            .field("max_parallel", &self.max_parallel)
            .field("optimizer", &self.optimizer)
            .field("routing", &format_hex_bytes(&self.routing))
            .field("translation", &self.translation.is_some())
            .finish()
    }
}

/// Outcome of one read cycle.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReadResult {
    /// Any item has bad quality.
    pub any_bad: bool,
    /// Values keyed by the address as the caller supplied it.
    pub values: BTreeMap<String, ItemValue>,
    /// The session was not ready when the cycle completed.
    pub disconnected: bool,
}

/// Outcome of one write.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WriteResult {
    /// Any item failed.
    pub any_bad: bool,
    /// Per-address quality.
    pub qualities: BTreeMap<String, Quality>,
}

/// Change to the polled item set, applied at the start of the next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Start polling these addresses.
    Add(Vec<String>),
    /// Stop polling these addresses.
    Remove(Vec<String>),
    /// Stop polling everything.
    RemoveAll,
}

/// Request from the user API.
#[derive(Debug)]
pub enum Command {
    /// Establish the session.
    Connect(oneshot::Sender<Result<()>>),
    /// Queue a change to the polled items.
    Mutate(Mutation),
    /// Read every polled item.
    ReadAll(oneshot::Sender<ReadResult>),
    /// Write values.
    Write(Vec<(String, PlcValue)>, oneshot::Sender<Result<WriteResult>>),
    /// Close the session and stop reconnecting.
    Disconnect,
}

#[derive(Debug, Clone)]
struct PolledItem {
    name: String,
    address: Address,
}

#[derive(Debug)]
struct ReadCycle {
    responder: oneshot::Sender<ReadResult>,
    status: Vec<Quality>,
}

#[derive(Debug)]
struct WriteEntry {
    name: String,
    item: Option<WriteItem>,
}

#[derive(Debug)]
struct PendingWrite {
    entries: Vec<WriteEntry>,
    responder: oneshot::Sender<Result<WriteResult>>,
}

#[derive(Debug)]
struct WriteCycle {
    pending: PendingWrite,
    /// Entry index of each planned write item.
    owners: Vec<usize>,
    plan: WritePlan,
    status: Vec<Quality>,
}

/// Protocol state for one connection.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    conn: Connection,
    ledger: DispatchLedger,
    frames: FrameBuilder,
    items: Vec<PolledItem>,
    mutations: VecDeque<Mutation>,
    plan: Option<ReadPlan>,
    arena: Vec<u8>,
    quality: Vec<u8>,
    read: Option<ReadCycle>,
    deferred_reads: VecDeque<oneshot::Sender<ReadResult>>,
    retry_armed: bool,
    write: Option<WriteCycle>,
    queued_write: Option<PendingWrite>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    out: Vec<Action>,
}

impl Engine {
    /// Creates an idle engine and a receiver for its connection state.
    pub fn new(config: EngineConfig) -> (Self, watch::Receiver<ConnectionState>) {
        let (conn, state_rx) = Connection::new();
        let engine = Self {
            ledger: DispatchLedger::new(config.max_parallel),
            frames: FrameBuilder::new(0, &config.routing),
            config,
            conn,
            items: Vec::new(),
            mutations: VecDeque::new(),
            plan: None,
            arena: Vec::new(),
            quality: Vec::new(),
            read: None,
            deferred_reads: VecDeque::new(),
            retry_armed: false,
            write: None,
            queued_write: None,
            connect_waiters: Vec::new(),
            out: Vec::new(),
        };
        (engine, state_rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Returns and clears the queued actions.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.out)
    }

    /// Handles a user command.
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Connect(waiter) => self.connect(waiter),
            Command::Mutate(mutation) => self.mutations.push_back(mutation),
            Command::ReadAll(responder) => self.read_all(responder, now),
            Command::Write(values, responder) => self.write(values, responder, now),
            Command::Disconnect => self.disconnect(),
        }
    }

    /// The transport finished connecting.
    pub fn on_connected(&mut self) {
        if !self.conn.on_connected(self.config.timeout, &mut self.out) {
            debug!(state = %self.conn.state(), "ignoring late connect completion");
        }
    }

    /// Bytes arrived; `data` holds only complete frames.
    pub fn on_data(&mut self, data: Bytes, now: Instant) {
        trace!(bytes = %format_hex_bytes(&data), "received");
        match self.conn.state() {
            ConnectionState::AwaitingSessionReply => self.on_registration_reply(&data, now),
            ConnectionState::Ready | ConnectionState::ResetPending => {
                for result in decode_frames(data, self.conn.session()) {
                    match result {
                        Ok(reply) => self.on_reply(reply, now),
                        Err(e) if !e.is_fatal() => warn!(error = %e, "dropping reply"),
                        Err(e) => {
                            error!(error = %e, "invalid frame, resetting connection");
                            self.reset();
                            break;
                        }
                    }
                }
            }
            state => warn!(%state, len = data.len(), "dropping data received while not connected"),
        }
    }

    /// The transport failed.
    pub fn on_transport_error(&mut self, err: io::Error) {
        match self.conn.state() {
            ConnectionState::Connecting | ConnectionState::AwaitingSessionReply => {
                error!(error = %err, "connection failed");
                self.conn.close(&mut self.out);
                self.fail_waiters(|| PcccError::Io(io::Error::new(err.kind(), err.to_string())));
            }
            ConnectionState::Ready => {
                error!(error = %err, "transport error, resetting connection");
                self.reset();
            }
            state => debug!(%state, error = %err, "ignoring transport error"),
        }
    }

    /// The controller closed the connection.
    pub fn on_end(&mut self) {
        match self.conn.state() {
            ConnectionState::Connecting | ConnectionState::AwaitingSessionReply => {
                warn!("connection closed during setup");
                self.conn.close(&mut self.out);
                self.fail_waiters(|| PcccError::Disconnected);
            }
            ConnectionState::Ready | ConnectionState::ResetPending => {
                info!("controller closed the connection");
                self.teardown();
            }
            ConnectionState::Idle => {}
        }
    }

    /// A timer armed through [`Action::ArmTimer`] expired.
    pub fn on_timer(&mut self, key: TimerKey, now: Instant) {
        match key {
            TimerKey::Registration => {
                if self.conn.state() == ConnectionState::AwaitingSessionReply {
                    warn!("session registration timed out");
                    self.teardown();
                    self.fail_waiters(|| PcccError::Timeout);
                }
            }
            TimerKey::Packet {
                kind,
                index,
                sequence,
            } => self.on_packet_lost(kind, index, sequence, BadReason::Timeout, now),
            TimerKey::Lost {
                kind,
                index,
                sequence,
            } => self.on_packet_lost(kind, index, sequence, BadReason::NotConnected, now),
            TimerKey::ResetGrace => {
                if self.conn.state() == ConnectionState::ResetPending {
                    self.teardown();
                }
            }
            TimerKey::Reconnect => {
                if self.conn.auto_reconnect() && self.conn.begin_connect(&mut self.out) {
                    info!("reconnecting");
                }
            }
            TimerKey::ReadRetry => self.retry_deferred_read(now),
        }
    }

    fn connect(&mut self, waiter: oneshot::Sender<Result<()>>) {
        if self.conn.is_ready() {
            let _ = waiter.send(Ok(()));
            return;
        }
        self.conn.set_auto_reconnect(true);
        self.connect_waiters.push(waiter);
        self.conn.begin_connect(&mut self.out);
    }

    fn disconnect(&mut self) {
        info!("disconnect requested");
        self.conn.set_auto_reconnect(false);
        self.out.push(Action::CancelTimer(TimerKey::Reconnect));
        self.conn.close(&mut self.out);
        self.lose_outstanding();
        self.fail_waiters(|| PcccError::Disconnected);
    }

    fn fail_waiters(&mut self, make: impl Fn() -> PcccError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(make()));
        }
    }

    fn on_registration_reply(&mut self, data: &[u8], now: Instant) {
        match self.conn.on_registration(data, &mut self.out) {
            Ok(session) => {
                info!(session = format_args!("0x{:08X}", session), "session registered");
                self.frames = FrameBuilder::new(session, &self.config.routing);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.pump(now);
            }
            Err(e) => {
                error!(error = %e, "session registration failed");
                self.teardown();
                self.fail_waiters(|| PcccError::Protocol(e.clone()));
            }
        }
    }

    /// Ready → ResetPending. Teardown waits for an active read to finish.
    fn reset(&mut self) {
        if !self.conn.begin_reset() {
            return;
        }
        if self.read.is_none() {
            self.out
                .push(Action::ArmTimer(TimerKey::ResetGrace, RESET_GRACE));
        }
    }

    fn teardown(&mut self) {
        self.conn.close(&mut self.out);
        self.lose_outstanding();
        if self.conn.auto_reconnect() {
            self.out
                .push(Action::ArmTimer(TimerKey::Reconnect, RECONNECT_BACKOFF));
        }
    }

    /// Schedules every outstanding packet to fail on the next timer pass.
    fn lose_outstanding(&mut self) {
        for kind in [PacketKind::Read, PacketKind::Write] {
            if !self.ledger.is_active(kind) {
                continue;
            }
            for index in self.ledger.outstanding(kind) {
                if let Some(sequence) = self.ledger.packet(kind, index).and_then(|p| p.sequence) {
                    self.out.push(Action::CancelTimer(TimerKey::Packet {
                        kind,
                        index,
                        sequence,
                    }));
                    self.out.push(Action::ArmTimer(
                        TimerKey::Lost {
                            kind,
                            index,
                            sequence,
                        },
                        Duration::ZERO,
                    ));
                }
            }
        }
    }

    fn on_packet_lost(
        &mut self,
        kind: PacketKind,
        index: usize,
        sequence: u16,
        reason: BadReason,
        now: Instant,
    ) {
        let current = self.ledger.packet(kind, index).and_then(|p| p.sequence);
        if current != Some(sequence) || !self.ledger.on_timeout(kind, index) {
            return;
        }
        match reason {
            BadReason::Timeout => warn!(?kind, sequence, "packet timed out"),
            _ => debug!(?kind, sequence, "packet lost while disconnected"),
        }
        self.mark_failed(kind, index, Quality::Bad(reason));
        self.check_cycle(kind, now);
    }

    fn on_reply(&mut self, reply: DecodedReply, now: Instant) {
        let sequence = reply.sequence;
        match self.ledger.on_reply(sequence, now) {
            ReplyMatch::Matched {
                kind,
                index,
                round_trip,
            } => {
                self.out.push(Action::CancelTimer(TimerKey::Packet {
                    kind,
                    index,
                    sequence,
                }));
                debug!(
                    ?kind,
                    sequence,
                    rtt_ms = round_trip.as_millis() as u64,
                    "reply received"
                );
                match kind {
                    PacketKind::Read => self.apply_read_reply(index, &reply.payload),
                    PacketKind::Write => self.apply_write_reply(index, &reply.payload),
                }
                self.check_cycle(kind, now);
            }
            ReplyMatch::Duplicate => debug!(sequence, "ignoring duplicate reply"),
            ReplyMatch::Unknown => warn!(sequence, "reply matches no outstanding packet"),
        }
    }

    fn apply_read_reply(&mut self, index: usize, payload: &[u8]) {
        let (Some(plan), Some(cycle)) = (self.plan.as_ref(), self.read.as_mut()) else {
            return;
        };
        let Some(request) = plan.requests.get(index) else {
            return;
        };
        let start = plan.blocks[request.block].arena_offset + request.byte_offset;
        let range = start..start + request.byte_length;
        match parse_read_payload(payload, request.byte_length) {
            Ok(data) => {
                self.arena[range.clone()].copy_from_slice(data);
                self.quality[range].fill(QUALITY_GOOD);
                cycle.status[index] = Quality::Good;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    file = format_args!("{}{}:{}", request.file_type, request.file, request.element),
                    "read request failed"
                );
                self.quality[range].fill(QUALITY_BAD);
                cycle.status[index] = Quality::Bad(BadReason::from_error(&e));
            }
        }
    }

    fn apply_write_reply(&mut self, index: usize, payload: &[u8]) {
        let Some(cycle) = self.write.as_mut() else {
            return;
        };
        let Some(status) = cycle.status.get_mut(index) else {
            return;
        };
        match parse_write_payload(payload) {
            Ok(()) => *status = Quality::Good,
            Err(e) => {
                warn!(error = %e, "write request failed");
                *status = Quality::Bad(BadReason::from_error(&e));
            }
        }
    }

    fn mark_failed(&mut self, kind: PacketKind, index: usize, quality: Quality) {
        match kind {
            PacketKind::Read => {
                let (Some(plan), Some(cycle)) = (self.plan.as_ref(), self.read.as_mut()) else {
                    return;
                };
                if let Some(request) = plan.requests.get(index) {
                    let start = plan.blocks[request.block].arena_offset + request.byte_offset;
                    self.quality[start..start + request.byte_length].fill(QUALITY_BAD);
                    cycle.status[index] = quality;
                }
            }
            PacketKind::Write => {
                if let Some(status) = self
                    .write
                    .as_mut()
                    .and_then(|cycle| cycle.status.get_mut(index))
                {
                    *status = quality;
                }
            }
        }
    }

    fn check_cycle(&mut self, kind: PacketKind, now: Instant) {
        if !self.ledger.is_complete(kind) {
            self.pump(now);
            return;
        }
        match kind {
            PacketKind::Read if self.read.is_some() => self.complete_read(now),
            PacketKind::Write if self.write.is_some() => self.complete_write(now),
            _ => self.pump(now),
        }
    }

    /// Sends unsent packets while the in-flight cap allows.
    fn pump(&mut self, now: Instant) {
        for kind in [PacketKind::Write, PacketKind::Read] {
            while let Some((index, sequence)) = self.ledger.next_unsent(kind, now) {
                self.send_packet(kind, index, sequence);
            }
        }
    }

    fn send_packet(&mut self, kind: PacketKind, index: usize, sequence: u16) {
        let lost = TimerKey::Lost {
            kind,
            index,
            sequence,
        };
        if !self.conn.is_ready() {
            self.out.push(Action::ArmTimer(lost, Duration::ZERO));
            if self.conn.state() == ConnectionState::Idle
                && self.conn.auto_reconnect()
                && self.conn.begin_connect(&mut self.out)
            {
                info!("reconnecting to send queued requests");
            }
            return;
        }
        let request = match kind {
            PacketKind::Read => self.plan.as_ref().and_then(|p| p.requests.get(index)),
            PacketKind::Write => self.write.as_ref().and_then(|w| w.plan.requests.get(index)),
        };
        match request.map(|r| r.command_bytes()) {
            Some(Ok(command)) => {
                let frame = self.frames.build(sequence, &command);
                debug!(?kind, sequence, len = frame.len(), "sending request");
                trace!(bytes = %format_hex_bytes(&frame), "sent");
                self.out.push(Action::Send(frame));
                self.out.push(Action::ArmTimer(
                    TimerKey::Packet {
                        kind,
                        index,
                        sequence,
                    },
                    self.config.timeout,
                ));
            }
            Some(Err(e)) => {
                error!(error = %e, ?kind, index, "cannot encode request");
                self.out.push(Action::ArmTimer(lost, Duration::ZERO));
            }
            None => {
                error!(?kind, index, "packet has no request");
                self.out.push(Action::ArmTimer(lost, Duration::ZERO));
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Address> {
        match &self.config.translation {
            Some(translate) => Address::parse(&translate(name)),
            None => Address::parse(name),
        }
    }

    fn apply_mutations(&mut self) {
        if self.mutations.is_empty() {
            return;
        }
        while let Some(mutation) = self.mutations.pop_front() {
            match mutation {
                Mutation::Add(names) => {
                    for name in names {
                        if self.items.iter().any(|item| item.name == name) {
                            continue;
                        }
                        match self.resolve(&name) {
                            Ok(address) => self.items.push(PolledItem { name, address }),
                            Err(e) => warn!(address = %name, error = %e, "dropping unresolvable address"),
                        }
                    }
                }
                Mutation::Remove(names) => self.items.retain(|item| !names.contains(&item.name)),
                Mutation::RemoveAll => self.items.clear(),
            }
        }
        self.plan = None;
    }

    fn addresses(&self) -> Vec<Address> {
        self.items.iter().map(|item| item.address).collect()
    }

    fn read_all(&mut self, responder: oneshot::Sender<ReadResult>, now: Instant) {
        if self.read.is_some() || self.write.is_some() {
            debug!("read deferred behind active cycle");
            self.deferred_reads.push_back(responder);
            self.arm_read_retry();
            return;
        }
        self.start_read(responder, now);
    }

    fn arm_read_retry(&mut self) {
        if !self.retry_armed {
            self.retry_armed = true;
            self.out
                .push(Action::ArmTimer(TimerKey::ReadRetry, READ_RETRY_POLL));
        }
    }

    fn retry_deferred_read(&mut self, now: Instant) {
        self.retry_armed = false;
        if self.read.is_none() && self.write.is_none() {
            if let Some(responder) = self.deferred_reads.pop_front() {
                self.start_read(responder, now);
            }
        }
        if !self.deferred_reads.is_empty() {
            self.arm_read_retry();
        }
    }

    fn start_read(&mut self, responder: oneshot::Sender<ReadResult>, now: Instant) {
        self.apply_mutations();
        if self.items.is_empty() {
            let _ = responder.send(ReadResult {
                disconnected: !self.conn.is_ready(),
                ..ReadResult::default()
            });
            return;
        }
        if self.plan.is_none() {
            let plan = plan_reads(&self.addresses(), &self.config.optimizer);
            for &item in &plan.rejected {
                warn!(address = %self.items[item].name, "address beyond the addressable range");
            }
            self.arena = vec![0; plan.arena_len];
            self.quality = vec![QUALITY_BAD; plan.arena_len];
            self.plan = Some(plan);
        }
        let requests = self.plan.as_ref().map_or(0, |plan| plan.requests.len());
        self.quality.fill(QUALITY_BAD);
        self.read = Some(ReadCycle {
            responder,
            status: vec![Quality::Bad(BadReason::Timeout); requests],
        });
        self.ledger.load(PacketKind::Read, requests);
        debug!(items = self.items.len(), requests, "read cycle started");
        self.check_cycle(PacketKind::Read, now);
    }

    fn complete_read(&mut self, now: Instant) {
        self.ledger.clear(PacketKind::Read);
        let Some(cycle) = self.read.take() else {
            return;
        };
        let mut result = ReadResult {
            disconnected: !self.conn.is_ready(),
            ..ReadResult::default()
        };
        if let Some(plan) = &self.plan {
            let addresses = self.addresses();
            for (i, item) in self.items.iter().enumerate() {
                let value = match plan.locate(i, &addresses) {
                    Some(range) => {
                        let (value, good) = decode(
                            &item.address,
                            &self.arena[range.clone()],
                            &self.quality[range],
                        );
                        let quality = if good {
                            Quality::Good
                        } else {
                            Quality::Bad(item_failure(plan, &cycle.status, i))
                        };
                        ItemValue { value, quality }
                    }
                    None => ItemValue {
                        value: bad_item(&item.address),
                        quality: Quality::Bad(BadReason::Rejected),
                    },
                };
                result.any_bad |= !value.is_good();
                result.values.insert(item.name.clone(), value);
            }
        }
        debug!(
            items = result.values.len(),
            any_bad = result.any_bad,
            "read cycle complete"
        );
        if cycle.responder.send(result).is_err() {
            debug!("read result dropped by caller");
        }

        if self.conn.state() == ConnectionState::ResetPending {
            self.teardown();
        }
        if let Some(pending) = self.queued_write.take() {
            self.start_write(pending, now);
        }
        self.pump(now);
    }

    fn write(
        &mut self,
        values: Vec<(String, PlcValue)>,
        responder: oneshot::Sender<Result<WriteResult>>,
        now: Instant,
    ) {
        if self.write.is_some() || self.queued_write.is_some() {
            let _ = responder.send(Err(PcccError::WriteInProgress));
            return;
        }
        let entries = values
            .into_iter()
            .map(|(name, value)| {
                let item = self.resolve(&name).and_then(|address| {
                    Ok(WriteItem {
                        data: encode(&address, &value)?,
                        address,
                    })
                });
                match item {
                    Ok(item) => WriteEntry {
                        name,
                        item: Some(item),
                    },
                    Err(e) => {
                        warn!(address = %name, error = %e, "write item rejected");
                        WriteEntry { name, item: None }
                    }
                }
            })
            .collect();
        let pending = PendingWrite { entries, responder };
        if self.read.is_some() {
            debug!("write queued behind read cycle");
            self.queued_write = Some(pending);
            return;
        }
        self.start_write(pending, now);
    }

    fn start_write(&mut self, pending: PendingWrite, now: Instant) {
        let mut items = Vec::with_capacity(pending.entries.len());
        let mut owners = Vec::with_capacity(pending.entries.len());
        for (e, entry) in pending.entries.iter().enumerate() {
            if let Some(item) = &entry.item {
                items.push(item.clone());
                owners.push(e);
            }
        }
        let plan = plan_writes(&items, &self.config.optimizer);
        for (item, err) in &plan.rejected {
            warn!(address = %pending.entries[owners[*item]].name, error = %err, "write item rejected");
        }
        let requests = plan.requests.len();
        self.write = Some(WriteCycle {
            pending,
            owners,
            plan,
            status: vec![Quality::Bad(BadReason::Timeout); requests],
        });
        self.ledger.load(PacketKind::Write, requests);
        debug!(requests, "write cycle started");
        self.check_cycle(PacketKind::Write, now);
    }

    fn complete_write(&mut self, now: Instant) {
        self.ledger.clear(PacketKind::Write);
        let Some(cycle) = self.write.take() else {
            return;
        };
        let mut qualities =
            vec![Quality::Bad(BadReason::Rejected); cycle.pending.entries.len()];
        for (b, block) in cycle.plan.blocks.iter().enumerate() {
            let quality = cycle
                .plan
                .requests
                .iter()
                .zip(&cycle.status)
                .filter(|(request, _)| request.block == b)
                .map(|(_, status)| *status)
                .find(|status| !status.is_good())
                .unwrap_or(Quality::Good);
            for member in &block.members {
                qualities[cycle.owners[member.item]] = quality;
            }
        }

        let mut result = WriteResult::default();
        for (entry, quality) in cycle.pending.entries.iter().zip(qualities) {
            result.any_bad |= !quality.is_good();
            result.qualities.insert(entry.name.clone(), quality);
        }
        debug!(any_bad = result.any_bad, "write complete");
        if cycle.pending.responder.send(Ok(result)).is_err() {
            debug!("write result dropped by caller");
        }
        self.pump(now);
    }
}

/// First failure among the requests covering an item.
fn item_failure(plan: &ReadPlan, status: &[Quality], item: usize) -> BadReason {
    let found = plan.blocks.iter().enumerate().find_map(|(b, block)| {
        block
            .members
            .iter()
            .find(|m| m.item == item)
            .map(|m| (b, m.byte_offset))
    });
    let Some((block, offset)) = found else {
        return BadReason::Rejected;
    };
    plan.requests
        .iter()
        .zip(status)
        .filter(|(r, _)| r.block == block && r.byte_offset + r.byte_length > offset)
        .find_map(|(_, s)| match s {
            Quality::Bad(reason) => Some(*reason),
            Quality::Good => None,
        })
        .unwrap_or(BadReason::Timeout)
}
