//! Sequence numbers and in-flight bookkeeping for read and write cycles.
//!
//! Each cycle loads one [`Packet`] per wire request. Packets are sent in
//! creation order while fewer than `max_parallel` are outstanding across both
//! kinds. A reply is matched purely by sequence number; a timeout marks the
//! packet received so every packet completes exactly once.

use std::time::Duration;

use tokio::time::Instant;

/// Highest sequence number; the counter wraps back to 1.
pub const MAX_SEQUENCE: u16 = 32767;

/// Rolling transaction number shared by reads and writes.
///
/// Issues 1..=[`MAX_SEQUENCE`], never 0.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    last: u16,
}

impl SequenceCounter {
    /// Creates a counter whose first number is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next number for which `in_use` is false.
    pub fn next(&mut self, in_use: impl Fn(u16) -> bool) -> u16 {
        for _ in 0..MAX_SEQUENCE {
            self.last = if self.last >= MAX_SEQUENCE {
                1
            } else {
                self.last + 1
            };
            if !in_use(self.last) {
                break;
            }
        }
        self.last
    }
}

/// Traffic a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Read cycle.
    Read,
    /// Write cycle.
    Write,
}

/// One wire request of the current cycle.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Sequence number of the latest send.
    pub sequence: Option<u16>,
    /// Handed to the transport (or given up on while disconnected).
    pub sent: bool,
    /// Answered, failed or timed out.
    pub received: bool,
    /// When it was sent.
    pub sent_at: Option<Instant>,
}

impl Packet {
    fn outstanding(&self) -> bool {
        self.sent && !self.received
    }
}

/// Result of matching a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMatch {
    /// The reply completes this packet.
    Matched {
        /// Cycle the packet belongs to.
        kind: PacketKind,
        /// Packet index, equal to the request index in the plan.
        index: usize,
        /// Time since the packet was sent.
        round_trip: Duration,
    },
    /// The packet was already answered or timed out.
    Duplicate,
    /// No packet carries this number.
    Unknown,
}

/// In-flight tracking for one connection.
#[derive(Debug)]
pub struct DispatchLedger {
    max_parallel: usize,
    counter: SequenceCounter,
    reads: Vec<Packet>,
    writes: Vec<Packet>,
}

impl DispatchLedger {
    /// Creates an empty ledger.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            counter: SequenceCounter::new(),
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn packets(&self, kind: PacketKind) -> &Vec<Packet> {
        match kind {
            PacketKind::Read => &self.reads,
            PacketKind::Write => &self.writes,
        }
    }

    fn packets_mut(&mut self, kind: PacketKind) -> &mut Vec<Packet> {
        match kind {
            PacketKind::Read => &mut self.reads,
            PacketKind::Write => &mut self.writes,
        }
    }

    /// Starts a cycle of `count` packets, replacing any previous one.
    pub fn load(&mut self, kind: PacketKind, count: usize) {
        *self.packets_mut(kind) = vec![Packet::default(); count];
    }

    /// Drops the packets of a finished cycle.
    pub fn clear(&mut self, kind: PacketKind) {
        self.packets_mut(kind).clear();
    }

    /// Returns whether a cycle of this kind is loaded.
    pub fn is_active(&self, kind: PacketKind) -> bool {
        !self.packets(kind).is_empty()
    }

    /// Packets sent and not yet received, across both kinds.
    pub fn in_flight(&self) -> usize {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .filter(|p| p.outstanding())
            .count()
    }

    fn sequence_in_use(&self, sequence: u16) -> bool {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .any(|p| p.outstanding() && p.sequence == Some(sequence))
    }

    /// Marks the next unsent packet as sent and assigns its sequence number.
    ///
    /// Returns `None` when every packet is sent or `max_parallel` packets are
    /// already outstanding.
    pub fn next_unsent(&mut self, kind: PacketKind, now: Instant) -> Option<(usize, u16)> {
        if self.in_flight() >= self.max_parallel {
            return None;
        }
        let index = self.packets(kind).iter().position(|p| !p.sent)?;
        let mut counter = std::mem::take(&mut self.counter);
        let sequence = counter.next(|s| self.sequence_in_use(s));
        self.counter = counter;

        let packet = &mut self.packets_mut(kind)[index];
        packet.sequence = Some(sequence);
        packet.sent = true;
        packet.received = false;
        packet.sent_at = Some(now);
        Some((index, sequence))
    }

    /// Matches a reply to its packet, reads first, and marks it received.
    pub fn on_reply(&mut self, sequence: u16, now: Instant) -> ReplyMatch {
        for kind in [PacketKind::Read, PacketKind::Write] {
            let found = self
                .packets_mut(kind)
                .iter_mut()
                .enumerate()
                .find(|(_, p)| p.outstanding() && p.sequence == Some(sequence));
            if let Some((index, packet)) = found {
                packet.received = true;
                let round_trip = packet
                    .sent_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                return ReplyMatch::Matched {
                    kind,
                    index,
                    round_trip,
                };
            }
        }
        let answered = self
            .reads
            .iter()
            .chain(self.writes.iter())
            .any(|p| p.received && p.sequence == Some(sequence));
        if answered {
            ReplyMatch::Duplicate
        } else {
            ReplyMatch::Unknown
        }
    }

    /// Marks a packet received without a reply.
    ///
    /// Returns false if the packet was not outstanding, so a late timer for an
    /// answered packet has no effect.
    pub fn on_timeout(&mut self, kind: PacketKind, index: usize) -> bool {
        match self.packets_mut(kind).get_mut(index) {
            Some(packet) if packet.outstanding() => {
                packet.received = true;
                true
            }
            _ => false,
        }
    }

    /// Returns whether every packet of the cycle is sent and received.
    pub fn is_complete(&self, kind: PacketKind) -> bool {
        self.packets(kind).iter().all(|p| p.sent && p.received)
    }

    /// Indices of outstanding packets of a kind.
    pub fn outstanding(&self, kind: PacketKind) -> Vec<usize> {
        self.packets(kind)
            .iter()
            .enumerate()
            .filter(|(_, p)| p.outstanding())
            .map(|(i, _)| i)
            .collect()
    }

    /// Packet at `index`.
    pub fn packet(&self, kind: PacketKind, index: usize) -> Option<&Packet> {
        self.packets(kind).get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counter_starts_at_one_and_wraps() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(|_| false), 1);
        assert_eq!(counter.next(|_| false), 2);

        counter.last = MAX_SEQUENCE - 1;
        assert_eq!(counter.next(|_| false), MAX_SEQUENCE);
        assert_eq!(counter.next(|_| false), 1);
    }

    #[test]
    fn test_counter_skips_numbers_in_use() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(|s| s == 1 || s == 2), 3);
        counter.last = MAX_SEQUENCE;
        assert_eq!(counter.next(|s| s == 1), 2);
    }

    #[test]
    fn test_counter_range_over_many_draws() {
        let mut counter = SequenceCounter::new();
        let mut previous = 0;
        for _ in 0..(3 * u32::from(MAX_SEQUENCE)) {
            let s = counter.next(|_| false);
            assert!((1..=MAX_SEQUENCE).contains(&s));
            assert!(s == previous + 1 || (previous == MAX_SEQUENCE && s == 1));
            previous = s;
        }
    }

    #[test]
    fn test_max_parallel_cap() {
        let now = Instant::now();
        let mut ledger = DispatchLedger::new(2);
        ledger.load(PacketKind::Read, 3);

        assert_eq!(ledger.next_unsent(PacketKind::Read, now), Some((0, 1)));
        assert_eq!(ledger.next_unsent(PacketKind::Read, now), Some((1, 2)));
        assert_eq!(ledger.next_unsent(PacketKind::Read, now), None);
        assert_eq!(ledger.in_flight(), 2);

        assert!(matches!(
            ledger.on_reply(1, now),
            ReplyMatch::Matched {
                kind: PacketKind::Read,
                index: 0,
                ..
            }
        ));
        assert_eq!(ledger.next_unsent(PacketKind::Read, now), Some((2, 3)));
        assert!(!ledger.is_complete(PacketKind::Read));
    }

    #[test]
    fn test_cap_is_shared_between_kinds() {
        let now = Instant::now();
        let mut ledger = DispatchLedger::new(1);
        ledger.load(PacketKind::Read, 1);
        ledger.load(PacketKind::Write, 1);
        assert!(ledger.next_unsent(PacketKind::Read, now).is_some());
        assert!(ledger.next_unsent(PacketKind::Write, now).is_none());
    }

    #[test]
    fn test_duplicate_and_unknown_replies() {
        let now = Instant::now();
        let mut ledger = DispatchLedger::new(4);
        ledger.load(PacketKind::Write, 1);
        let (_, seq) = ledger.next_unsent(PacketKind::Write, now).unwrap();

        assert!(matches!(
            ledger.on_reply(seq, now),
            ReplyMatch::Matched {
                kind: PacketKind::Write,
                ..
            }
        ));
        assert_eq!(ledger.on_reply(seq, now), ReplyMatch::Duplicate);
        assert_eq!(ledger.on_reply(999, now), ReplyMatch::Unknown);
        assert_eq!(ledger.in_flight(), 0);
        assert!(ledger.is_complete(PacketKind::Write));
    }

    #[test]
    fn test_timeout_completes_once() {
        let now = Instant::now();
        let mut ledger = DispatchLedger::new(4);
        ledger.load(PacketKind::Read, 1);
        let (index, seq) = ledger.next_unsent(PacketKind::Read, now).unwrap();

        assert!(ledger.on_timeout(PacketKind::Read, index));
        assert!(!ledger.on_timeout(PacketKind::Read, index));
        assert_eq!(ledger.on_reply(seq, now), ReplyMatch::Duplicate);
        assert!(ledger.is_complete(PacketKind::Read));
    }

    #[test]
    fn test_outstanding_numbers_never_repeat() {
        let now = Instant::now();
        let mut ledger = DispatchLedger::new(4);
        ledger.counter.last = MAX_SEQUENCE - 2;
        ledger.load(PacketKind::Read, 4);
        let seqs: Vec<u16> = (0..4)
            .filter_map(|_| ledger.next_unsent(PacketKind::Read, now))
            .map(|(_, s)| s)
            .collect();
        assert_eq!(seqs, vec![MAX_SEQUENCE - 1, MAX_SEQUENCE, 1, 2]);

        // next cycle reuses the ledger while packet 2 is still outstanding
        ledger.on_reply(MAX_SEQUENCE - 1, now);
        ledger.load(PacketKind::Write, 1);
        ledger.counter.last = 0;
        let (_, s) = ledger.next_unsent(PacketKind::Write, now).unwrap();
        assert_eq!(s, 3);
    }

    #[test]
    fn test_empty_cycle_is_complete() {
        let ledger = DispatchLedger::new(4);
        assert!(ledger.is_complete(PacketKind::Read));
        assert!(!ledger.is_active(PacketKind::Read));
    }

    fn cyclic_next(last: u16, in_use: &[u16]) -> u16 {
        let mut candidate = last;
        loop {
            candidate = if candidate >= MAX_SEQUENCE { 1 } else { candidate + 1 };
            if !in_use.contains(&candidate) {
                return candidate;
            }
        }
    }

    proptest! {
        #[test]
        fn test_generated_counter_skips_in_use_across_wrap(
            last in (MAX_SEQUENCE - 64)..=MAX_SEQUENCE,
            in_use in prop::collection::vec(
                prop_oneof![1u16..64, (MAX_SEQUENCE - 64)..=MAX_SEQUENCE],
                0..100,
            ),
        ) {
            let mut counter = SequenceCounter { last };
            let s = counter.next(|s| in_use.contains(&s));
            prop_assert!((1..=MAX_SEQUENCE).contains(&s));
            prop_assert!(!in_use.contains(&s));
            prop_assert_eq!(s, cyclic_next(last, &in_use));
        }

        #[test]
        fn test_generated_traffic_never_reuses_outstanding_numbers(
            start in (MAX_SEQUENCE - 40)..=MAX_SEQUENCE,
            max_parallel in 1usize..8,
            sends in prop::collection::vec(any::<bool>(), 1..200),
        ) {
            let now = Instant::now();
            let mut ledger = DispatchLedger::new(max_parallel);
            ledger.counter.last = start;
            ledger.load(PacketKind::Read, sends.len());
            let mut outstanding: Vec<u16> = Vec::new();
            for send in sends {
                if send {
                    if let Some((_, s)) = ledger.next_unsent(PacketKind::Read, now) {
                        prop_assert!((1..=MAX_SEQUENCE).contains(&s));
                        prop_assert!(!outstanding.contains(&s));
                        outstanding.push(s);
                    }
                    prop_assert!(outstanding.len() <= max_parallel);
                } else if !outstanding.is_empty() {
                    let s = outstanding.remove(0);
                    let matched = matches!(ledger.on_reply(s, now), ReplyMatch::Matched { .. });
                    prop_assert!(matched);
                }
            }
            prop_assert_eq!(ledger.in_flight(), outstanding.len());
        }
    }
}
