//! Delivery scheduler (C6): computes each frame's start time from queue-tail
//! dominance plus airtime, and maintains the pending-job priority queue the
//! event loop (C10) drains.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::frame::Frame;
use super::station::{AccessCategory, StationRegistry};

pub type FrameId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Job {
    start_usec: u64,
    seq: u64,
    frame_id: FrameId,
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.start_usec, self.seq).cmp(&(other.start_usec, other.seq))
    }
}
impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Owns every in-flight frame and the min-heap of pending delivery jobs.
/// A frame is always in exactly one station queue and has exactly one entry
/// here, or is absent from both (delivered and freed), per §3's invariant.
#[derive(Default)]
pub struct Scheduler {
    frames: std::collections::HashMap<FrameId, Frame>,
    jobs: BinaryHeap<Reverse<Job>>,
    next_id: FrameId,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes `frame.start_usec` per §4.5 (queue-tail dominance across
    /// every station's queues at-or-above this frame's AC), appends the
    /// frame to `station.queues[ac]`, and registers its delivery job.
    pub fn submit(&mut self, stations: &mut StationRegistry, now_usec: u64, mut frame: Frame, send_time_usec: u32) -> FrameId {
        let ac = frame.ac;
        let tail = stations.max_tail_start_at_or_above(ac).unwrap_or(now_usec);
        let start = tail.max(now_usec) + send_time_usec as u64;

        frame.start_usec = start;
        frame.duration_usec = send_time_usec;

        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        stations.queue_mut(frame.sender, ac).frames.push(frame.clone());
        self.frames.insert(id, frame);
        self.jobs.push(Reverse(Job {
            start_usec: start,
            seq,
            frame_id: id,
        }));
        id
    }

    pub fn next_deadline_usec(&self) -> Option<u64> {
        self.jobs.peek().map(|Reverse(j)| j.start_usec)
    }

    /// Pops and returns every job due at or before `now_usec`, removing the
    /// frame from its station queue. Stale jobs (already cancelled) are
    /// silently skipped.
    pub fn drain_due(&mut self, stations: &mut StationRegistry, now_usec: u64) -> Vec<Frame> {
        let mut fired = Vec::new();
        while let Some(Reverse(job)) = self.jobs.peek() {
            if job.start_usec > now_usec {
                break;
            }
            let job = self.jobs.pop().unwrap().0;
            if let Some(frame) = self.frames.remove(&job.frame_id) {
                let q = stations.queue_mut(frame.sender, frame.ac);
                if let Some(pos) = q.frames.iter().position(|f| f.start_usec == frame.start_usec && f.cookie == frame.cookie) {
                    q.frames.remove(pos);
                }
                fired.push(frame);
            }
        }
        fired
    }

    /// Cancels every pending frame originated by `client`: removes it from
    /// its station queue and deregisters its job, per §4.5's disconnect rule.
    pub fn cancel_client(&mut self, stations: &mut StationRegistry, client: usize) -> usize {
        let cancelled: Vec<FrameId> = self
            .frames
            .iter()
            .filter(|(_, f)| f.sender_client == client)
            .map(|(id, _)| *id)
            .collect();

        let mut removed = 0;
        for id in cancelled {
            if let Some(frame) = self.frames.remove(&id) {
                let q = stations.queue_mut(frame.sender, frame.ac);
                if let Some(pos) = q.frames.iter().position(|f| f.start_usec == frame.start_usec && f.cookie == frame.cookie) {
                    q.frames.remove(pos);
                }
                removed += 1;
            }
        }
        // Lazily drop heap entries for cancelled frames; drain_due skips
        // them because the frame is already absent from `self.frames`.
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::frame::{Destination, TxRate};
    use crate::engine::station::AccessCategory;

    fn frame(ac: AccessCategory, sender: usize, client: usize, cookie: u64) -> Frame {
        Frame {
            data: vec![0u8; 10],
            sender,
            sender_client: client,
            dest: Destination::Multicast,
            ac,
            freq: 2412,
            tx_rates: [TxRate { idx: -1, count: 0 }; 4],
            cookie,
            flags: 0,
            signal: 0,
            duration_usec: 0,
            start_usec: 0,
            acked: false,
        }
    }

    #[test]
    fn queue_tail_dominance_back_to_back() {
        let mut stations = StationRegistry::new();
        stations.add([2, 0, 0, 0, 0, 0], 15.0, (0.0, 0.0));
        let mut sched = Scheduler::new();

        let id1 = sched.submit(&mut stations, 0, frame(AccessCategory::Be, 0, 0, 1), 1000);
        let f1_start = sched.frames.get(&id1).unwrap().start_usec;
        assert_eq!(f1_start, 1000);

        let id2 = sched.submit(&mut stations, 0, frame(AccessCategory::Be, 0, 0, 2), 500);
        let f2_start = sched.frames.get(&id2).unwrap().start_usec;
        assert!(f2_start - f1_start >= 500);
    }

    #[test]
    fn cancel_client_removes_pending_frames() {
        let mut stations = StationRegistry::new();
        stations.add([2, 0, 0, 0, 0, 0], 15.0, (0.0, 0.0));
        let mut sched = Scheduler::new();
        for i in 0..10 {
            sched.submit(&mut stations, 0, frame(AccessCategory::Be, 0, 0, i), 100_000);
        }
        assert_eq!(sched.pending_count(), 10);
        let removed = sched.cancel_client(&mut stations, 0);
        assert_eq!(removed, 10);
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(sched.drain_due(&mut stations, u64::MAX).len(), 0);
    }

    #[test]
    fn drain_due_fires_in_time_order() {
        let mut stations = StationRegistry::new();
        stations.add([2, 0, 0, 0, 0, 0], 15.0, (0.0, 0.0));
        let mut sched = Scheduler::new();
        sched.submit(&mut stations, 0, frame(AccessCategory::Vo, 0, 0, 1), 100);
        sched.submit(&mut stations, 0, frame(AccessCategory::Vo, 0, 0, 2), 100);

        let fired = sched.drain_due(&mut stations, 1000);
        assert_eq!(fired.len(), 2);
        assert!(fired[0].start_usec <= fired[1].start_usec);
    }
}
