//! The medium-arbitration engine: station registry, link matrices, frame
//! ingress, the MRR/airtime engine, the delivery scheduler, interference
//! bookkeeping, and the frame filter (C1–C7, C9). This module owns no
//! transport and no singletons — it is a single value passed explicitly,
//! per §9's "global state" design note.

pub mod delivery;
pub mod filter;
pub mod frame;
pub mod ieee80211;
pub mod link;
pub mod mrr;
pub mod path_loss;
pub mod rates;
pub mod scheduler;
pub mod station;

use rand::Rng;
use rand::rngs::ThreadRng;

use delivery::{Delivery, InterferenceSinkMode, TxStatusReport, deliver};
use filter::{FilterDecision, FrameFilter};
use frame::{Destination, Frame, TxRate};
use link::{InterferenceMatrix, LinkModel};
use rates::ErrorProbModel;
use scheduler::{FrameId, Scheduler};
use station::{Mac, StationRegistry};

/// A frame as it arrives from a client, before access-category
/// classification or station lookup (§4.3).
pub struct IngressFrame {
    pub transmitter_hwaddr: Mac,
    pub data: Vec<u8>,
    pub flags: u32,
    pub tx_rates: [TxRate; 4],
    pub cookie: u64,
    pub freq: Option<u32>,
}

pub enum IngressOutcome {
    Queued(FrameId),
    FilteredDrop,
    UnknownStation,
    Malformed,
}

/// Events produced when a scheduled job fires: zero or more deliveries plus
/// exactly one TX-status report back to the originator (§4.6).
pub struct FiredEvent {
    pub deliveries: Vec<Delivery>,
    pub status: TxStatusReport,
}

pub struct Engine {
    pub stations: StationRegistry,
    pub link_model: LinkModel,
    pub intf: InterferenceMatrix,
    pub error_model: ErrorProbModel,
    pub filters: Vec<FrameFilter>,
    pub sink_mode: InterferenceSinkMode,
    scheduler: Scheduler,
    rng: ThreadRng,
    default_freq: u32,
}

impl Engine {
    pub fn new(stations: StationRegistry, link_model: LinkModel, intf: InterferenceMatrix, error_model: ErrorProbModel) -> Self {
        Self {
            stations,
            link_model,
            intf,
            error_model,
            filters: Vec::new(),
            sink_mode: InterferenceSinkMode::default(),
            scheduler: Scheduler::new(),
            rng: rand::thread_rng(),
            default_freq: 2412,
        }
    }

    pub fn with_intuitive_interference_sink(mut self, intuitive: bool) -> Self {
        self.sink_mode = if intuitive {
            InterferenceSinkMode::Intuitive
        } else {
            InterferenceSinkMode::AsShipped
        };
        self
    }

    pub fn add_filter(&mut self, filter: FrameFilter) {
        self.filters.push(filter);
    }

    /// Frame ingress (C4) + airtime/MRR (C5) + scheduling (C6), run
    /// atomically with respect to other frames (§5).
    pub fn ingress(&mut self, now_usec: u64, client: usize, frame: IngressFrame) -> IngressOutcome {
        let Some(sender_mac) = ieee80211::addr2(&frame.data) else {
            return IngressOutcome::Malformed;
        };
        let Some(sender_idx) = self.stations.lookup_by_mac(&sender_mac) else {
            return IngressOutcome::UnknownStation;
        };

        self.stations.bind_client(sender_idx, client, frame.transmitter_hwaddr);

        for f in self.filters.iter_mut() {
            if f.matches(&sender_mac, &frame.data) == FilterDecision::Drop {
                return IngressOutcome::FilteredDrop;
            }
        }

        let ac = ieee80211::select_access_category(&frame.data);
        let dest_mac = ieee80211::addr1(&frame.data);
        let dest = match dest_mac {
            Some(mac) if ieee80211::is_multicast(&mac) => Destination::Multicast,
            Some(mac) => match self.stations.lookup_by_mac(&mac) {
                Some(idx) => Destination::Station(idx),
                None => Destination::UnresolvedUnicast,
            },
            None => return IngressOutcome::Malformed,
        };

        let sender = self.stations.get(sender_idx).clone();
        let dest_station = match dest {
            Destination::Station(idx) => Some(self.stations.get(idx).clone()),
            Destination::Multicast | Destination::UnresolvedUnicast => None,
        };

        let mut draft = Frame {
            data: frame.data,
            sender: sender_idx,
            sender_client: client,
            dest,
            ac,
            freq: frame.freq.unwrap_or(self.default_freq),
            tx_rates: frame.tx_rates,
            cookie: frame.cookie,
            flags: frame.flags,
            signal: 0,
            duration_usec: 0,
            start_usec: 0,
            acked: false,
        };

        let outcome = mrr::run_mrr(
            &draft,
            &sender,
            dest_station.as_ref(),
            &self.link_model,
            &self.intf,
            &self.error_model,
            &mut self.rng,
        );

        draft.signal = outcome.signal;
        draft.set_ack(outcome.acked);
        if let Some((row, j)) = outcome.success_row {
            if outcome.acked {
                draft.truncate_mrr(row, j + 1);
            }
        }

        let id = self.scheduler.submit(&mut self.stations, now_usec, draft, outcome.send_time_usec);
        IngressOutcome::Queued(id)
    }

    pub fn next_deadline_usec(&self) -> Option<u64> {
        self.scheduler.next_deadline_usec()
    }

    /// Fires every due job at or before `now_usec` (§4.6), updating
    /// interference bookkeeping along the way.
    pub fn fire_due(&mut self, now_usec: u64) -> Vec<FiredEvent> {
        self.scheduler
            .drain_due(&mut self.stations, now_usec)
            .into_iter()
            .map(|frame| {
                let outcome = deliver(
                    &frame,
                    &self.stations,
                    &self.link_model,
                    &mut self.intf,
                    &self.error_model,
                    self.sink_mode,
                    &mut self.rng,
                );
                FiredEvent {
                    deliveries: outcome.deliveries,
                    status: outcome.status,
                }
            })
            .collect()
    }

    /// The periodic 10 ms interference tick (C7).
    pub fn tick_interference(&mut self) {
        self.intf.tick_10ms();
    }

    /// Removes every pending frame originated by `client` and clears its
    /// station bindings, per §4.5's disconnect-cleanup rule.
    pub fn disconnect_client(&mut self, client: usize) -> usize {
        self.stations.unbind_client(client);
        self.scheduler.cancel_client(&mut self.stations, client)
    }

    pub fn pending_frame_count(&self) -> usize {
        self.scheduler.pending_count()
    }
}

pub use station::AccessCategory as Ac;

#[cfg(test)]
mod tests {
    use super::*;
    use link::Matrix;

    fn two_station_registry() -> StationRegistry {
        let mut stations = StationRegistry::new();
        stations.add([2, 0, 0, 0, 0, 0], 15.0, (0.0, 0.0));
        stations.add([2, 0, 0, 0, 0, 1], 15.0, (0.0, 0.0));
        stations
    }

    fn unicast_data_frame(src: Mac, dst: Mac) -> Vec<u8> {
        let mut data = vec![0u8; 100];
        data[0] = 0x08; // data, non-QoS -> AC_BE
        data[4..10].copy_from_slice(&dst);
        data[10..16].copy_from_slice(&src);
        data
    }

    fn mrr_single_attempt() -> [TxRate; 4] {
        let mut table = [TxRate::TERMINATOR; 4];
        table[0] = TxRate { idx: 0, count: 1 };
        table
    }

    /// S1 driven through the full `Engine` API: ingress queues the frame,
    /// `fire_due` at its deadline delivers it to station 1 with the signal
    /// implied by the 50 dB SNR link, and reports a TX-status ACK back to
    /// the originating client.
    #[test]
    fn s1_end_to_end_unicast_through_engine() {
        let mac0 = [2, 0, 0, 0, 0, 0];
        let mac1 = [2, 0, 0, 0, 0, 1];
        let mut snr = Matrix::filled(2, 0i32);
        snr.set(0, 1, 50);
        let link_model = LinkModel::SnrMatrix(snr);
        let intf = InterferenceMatrix::new(2, false);
        let error_model = ErrorProbModel::default();

        let mut engine = Engine::new(two_station_registry(), link_model, intf, error_model);

        let outcome = engine.ingress(
            0,
            7,
            IngressFrame {
                transmitter_hwaddr: mac0,
                data: unicast_data_frame(mac0, mac1),
                flags: frame::TX_CTL_REQ_TX_STATUS,
                tx_rates: mrr_single_attempt(),
                cookie: 42,
                freq: None,
            },
        );
        assert!(matches!(outcome, IngressOutcome::Queued(_)));

        let deadline = engine.next_deadline_usec().expect("one job pending");
        let fired = engine.fire_due(deadline);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].deliveries.len(), 1);
        assert_eq!(fired[0].deliveries[0].receiver, 1);
        assert_eq!(fired[0].deliveries[0].signal, 50 + link::NOISE_LEVEL);
        assert_eq!(fired[0].status.flags & frame::TX_STAT_ACK, frame::TX_STAT_ACK);
        assert_eq!(fired[0].status.sender_client, 7);
        assert_eq!(engine.pending_frame_count(), 0);
    }

    /// S5 driven through the full `Engine` API: ten frames queued by one
    /// client are all cancelled by a disconnect before their deadlines, with
    /// no deliveries produced once their (stale) deadline is reached.
    #[test]
    fn s5_end_to_end_disconnect_cancels_pending_frames() {
        let mac0 = [2, 0, 0, 0, 0, 0];
        let mac1 = [2, 0, 0, 0, 0, 1];
        let link_model = LinkModel::Default;
        let intf = InterferenceMatrix::new(2, false);
        let error_model = ErrorProbModel::default();

        let mut engine = Engine::new(two_station_registry(), link_model, intf, error_model);

        for i in 0..10 {
            let outcome = engine.ingress(
                0,
                3,
                IngressFrame {
                    transmitter_hwaddr: mac0,
                    data: unicast_data_frame(mac0, mac1),
                    flags: frame::TX_CTL_REQ_TX_STATUS,
                    tx_rates: mrr_single_attempt(),
                    cookie: i,
                    freq: None,
                },
            );
            assert!(matches!(outcome, IngressOutcome::Queued(_)));
        }
        assert_eq!(engine.pending_frame_count(), 10);

        let cancelled = engine.disconnect_client(3);
        assert_eq!(cancelled, 10);
        assert_eq!(engine.pending_frame_count(), 0);
        assert!(engine.fire_due(u64::MAX).is_empty());
    }
}
