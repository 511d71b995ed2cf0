//! The frame data model: immutable payload plus mutable delivery metadata
//! (§3's "Frame" entry).

use super::station::AccessCategory;

pub const N_RATES: usize = 4;

pub const TX_CTL_REQ_TX_STATUS: u32 = 1;
pub const TX_CTL_NO_ACK: u32 = 1 << 1;
pub const TX_STAT_ACK: u32 = 1 << 2;

/// One row of a multi-rate-retry table. `idx = -1` terminates the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRate {
    pub idx: i8,
    pub count: u8,
}

impl TxRate {
    /// `count` mirrors the original's `unsigned char`, where a terminator's
    /// `-1` wraps to `255`.
    pub const TERMINATOR: TxRate = TxRate { idx: -1, count: 255 };

    pub fn is_terminator(self) -> bool {
        self.idx < 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Station(usize),
    Multicast,
    /// A real (non-multicast) unicast address that matched no registered
    /// station. Behaves like "matches nobody" at delivery time but still
    /// undergoes normal, non-`noack` MRR retries.
    UnresolvedUnicast,
}

/// An in-flight frame: allocated on ingress, placed in exactly one per-AC
/// queue and exactly one scheduler job, freed after delivery and TX-status
/// reporting.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub sender: usize,
    pub sender_client: usize,
    pub dest: Destination,
    pub ac: AccessCategory,
    pub freq: u32,
    pub tx_rates: [TxRate; N_RATES],
    pub cookie: u64,
    pub flags: u32,
    pub signal: i32,
    pub duration_usec: u32,
    pub start_usec: u64,
    pub acked: bool,
}

impl Frame {
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn set_ack(&mut self, acked: bool) {
        self.acked = acked;
        if acked {
            self.flags |= TX_STAT_ACK;
        } else {
            self.flags &= !TX_STAT_ACK;
        }
    }

    /// Truncates the MRR table after a successful attempt at `row` with
    /// `attempts` tries: `mrr[row].count = attempts`, every later row
    /// becomes `(-1, -1)`.
    pub fn truncate_mrr(&mut self, row: usize, attempts: u8) {
        self.tx_rates[row].count = attempts;
        for r in self.tx_rates.iter_mut().skip(row + 1) {
            *r = TxRate::TERMINATOR;
        }
    }
}
