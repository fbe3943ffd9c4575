//! Record of sent packets awaiting transport-wide feedback.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::DataSize;

/// Classification of a sent packet.
///
/// A packet belongs to exactly one class. Probing packets are often retransmissions of already
/// sent media, but are accounted as probing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketKind {
    /// Regular media.
    #[default]
    Media,
    /// A retransmission (RTX) of previously sent media.
    Retransmission,
    /// Padding or history resent to probe for more bandwidth.
    Probing,
}

/// Record for a packet that carried a transport-wide sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacketRecord {
    /// Transport-wide sequence number.
    pub transport_seq: u32,
    /// SSRC of the RTP stream.
    pub ssrc: u32,
    /// Extended RTP sequence number.
    pub ext_seq: u32,
    /// Bytes on the wire.
    pub size: u32,
    /// Bytes of media payload (no padding, no RTX header).
    pub payload_size: u32,
    /// RTP timestamp.
    pub rtp_timestamp: u32,
    /// Local send time in microseconds.
    pub send_time_us: u64,
    /// RTP marker bit.
    pub marker: bool,
    /// What kind of packet this was.
    pub kind: PacketKind,
}

impl SentPacketRecord {
    fn new(transport_seq: u32, size: u32, send_time_us: u64, kind: PacketKind) -> Self {
        SentPacketRecord {
            transport_seq,
            ssrc: 0,
            ext_seq: 0,
            size,
            payload_size: 0,
            rtp_timestamp: 0,
            send_time_us,
            marker: false,
            kind,
        }
    }

    /// A regular media packet.
    pub fn media(transport_seq: u32, size: u32, send_time_us: u64) -> Self {
        Self::new(transport_seq, size, send_time_us, PacketKind::Media)
    }

    /// A retransmitted packet.
    pub fn retransmission(transport_seq: u32, size: u32, send_time_us: u64) -> Self {
        Self::new(transport_seq, size, send_time_us, PacketKind::Retransmission)
    }

    /// A probing packet.
    pub fn probing(transport_seq: u32, size: u32, send_time_us: u64) -> Self {
        Self::new(transport_seq, size, send_time_us, PacketKind::Probing)
    }

    /// Fill in the RTP header details.
    pub fn with_rtp(mut self, ssrc: u32, ext_seq: u32, rtp_timestamp: u32, marker: bool) -> Self {
        self.ssrc = ssrc;
        self.ext_seq = ext_seq;
        self.rtp_timestamp = rtp_timestamp;
        self.marker = marker;
        self
    }

    /// Set the media payload size.
    pub fn with_payload_size(mut self, payload_size: u32) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Whether this is a retransmission.
    pub fn is_rtx(&self) -> bool {
        self.kind == PacketKind::Retransmission
    }

    /// Whether this is a probing packet.
    pub fn is_probing(&self) -> bool {
        self.kind == PacketKind::Probing
    }

    pub(crate) fn data_size(&self) -> DataSize {
        self.size.into()
    }
}

/// Sent packets keyed by transport-wide sequence number.
///
/// Entries leave the ledger either when feedback consumes them, or when they are pruned for
/// being sent before the oldest live monitor interval.
#[derive(Debug, Default)]
pub(crate) struct SendLedger {
    records: BTreeMap<u32, SentPacketRecord>,
}

impl SendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record. A record with the same sequence number is replaced.
    pub fn insert(&mut self, record: SentPacketRecord) {
        if let Some(prev) = self.records.insert(record.transport_seq, record) {
            trace!(seq = prev.transport_seq, "Replaced sent packet record");
        }
    }

    pub fn get(&self, seq: u32) -> Option<&SentPacketRecord> {
        self.records.get(&seq)
    }

    /// Remove and return the record for `seq`, if still present.
    pub fn take(&mut self, seq: u32) -> Option<SentPacketRecord> {
        self.records.remove(&seq)
    }

    /// Drop records whose send time is before `cutoff_us`.
    ///
    /// The ledger is ordered by sequence number, which follows send order, so pruning stops at
    /// the first record that is recent enough.
    pub fn prune_before(&mut self, cutoff_us: u64) -> usize {
        let mut pruned = 0;
        while let Some(entry) = self.records.first_entry() {
            if entry.get().send_time_us >= cutoff_us {
                break;
            }
            entry.remove();
            pruned += 1;
        }
        if pruned > 0 {
            trace!(pruned, cutoff_us, "Pruned sent packet records");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl<'a> IntoIterator for &'a SendLedger {
    type Item = &'a SentPacketRecord;
    type IntoIter = btree_map::Values<'a, u32, SentPacketRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}
