//! Airtime & multi-rate-retry engine (C5): walks the MRR table, applies
//! contention-window backoff, and decides ACK/no-ACK for one frame.

use rand::Rng;

use super::frame::{Destination, Frame, N_RATES};
use super::ieee80211::is_mgmt;
use super::link::{InterferenceMatrix, LinkModel, NOISE_LEVEL};
use super::rates::{rate_of, ErrorProbModel};
use super::station::{AccessCategory, Station};

pub const SLOT_USEC: u32 = 9;
pub const SIFS_USEC: u32 = 16;
pub const DIFS_USEC: u32 = 2 * SLOT_USEC + SIFS_USEC;

fn div_round(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// `pkt_duration(len, rate)`: preamble + signal + `t_sym * n_sym`, rate in
/// 100 kbps units.
pub fn pkt_duration_usec(len: usize, rate_100kbps: u32) -> u32 {
    16 + 4 + 4 * div_round((16 + 8 * len as u32 + 6) * 10, 4 * rate_100kbps)
}

fn ack_time_usec(freq: u32) -> u32 {
    pkt_duration_usec(14, rate_of(0, freq)) + SIFS_USEC
}

/// Outcome of the MRR walk: cumulative airtime, final ACK decision, and
/// (if acked) which row/attempt succeeded so the caller can truncate the
/// MRR table per §4.4.
pub struct MrrOutcome {
    pub send_time_usec: u32,
    pub acked: bool,
    pub success_row: Option<(usize, u8)>,
    pub signal: i32,
}

/// Runs the MRR walk for `frame` sent by `sender` towards `dest_station`
/// (`None` for multicast), per §4.4.
pub fn run_mrr(
    frame: &Frame,
    sender: &Station,
    dest_station: Option<&Station>,
    link_model: &LinkModel,
    intf: &InterferenceMatrix,
    error_model: &ErrorProbModel,
    rng: &mut impl Rng,
) -> MrrOutcome {
    let ac = frame.ac;
    let (_, cw_max) = ac.cw_bounds();
    let mut cw = ac.cw_bounds().0;

    let mut snr = super::link::SNR_DEFAULT;
    if let Some(dst) = dest_station {
        let offset = intf.interference_offset(sender.index, dst.index, rng);
        snr = link_model.get_link_snr(sender.index, dst.index) - offset;
        // fading_signal defaults to 0 (§4.4: "a caller-supplied integer (default 0)").
    }
    let signal = snr + NOISE_LEVEL;

    let noack = is_mgmt(&frame.data) || matches!(frame.dest, Destination::Multicast);

    let fixed = link_model.uses_fixed_random_value();
    let mut choice: f64 = rng.gen();

    let mut send_time: u32 = 0;
    let mut success_row = None;

    'outer: for (i, row) in frame.tx_rates.iter().enumerate() {
        if row.is_terminator() {
            break;
        }
        let error_prob = match dest_station {
            Some(dst) => link_model
                .error_prob_from_matrix(sender.index, dst.index)
                .unwrap_or_else(|| error_model.error_prob(snr, row.idx)),
            None => error_model.error_prob(snr, row.idx),
        };

        for j in 0..row.count {
            send_time += DIFS_USEC + pkt_duration_usec(frame.data_len(), rate_of(row.idx, frame.freq));

            if noack {
                success_row = Some((i, j));
                break 'outer;
            }

            if j > 0 {
                send_time += (cw * SLOT_USEC) / 2;
                cw = (2 * cw + 1).min(cw_max);
            }

            send_time += ack_time_usec(frame.freq);

            if choice > error_prob {
                success_row = Some((i, j));
                break 'outer;
            }

            if !fixed {
                choice = rng.gen();
            }
        }
    }

    MrrOutcome {
        send_time_usec: send_time,
        acked: success_row.is_some(),
        success_row,
        signal,
    }
}

#[allow(dead_code)]
const _ASSERT_N_RATES_4: [(); 4] = [(); N_RATES];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::frame::{Destination, Frame, TxRate};
    use crate::engine::link::{InterferenceMatrix, LinkModel, Matrix};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn make_station(idx: usize) -> Station {
        Station {
            index: idx,
            addr: [2, 0, 0, 0, 0, idx as u8],
            hwaddr: [2, 0, 0, 0, 0, idx as u8],
            tx_power_dbm: 15.0,
            pos: (0.0, 0.0),
            client: None,
        }
    }

    fn make_frame(ac: AccessCategory, dest: Destination, mrr: [TxRate; 4], data_len: usize) -> Frame {
        Frame {
            data: vec![0u8; data_len],
            sender: 0,
            sender_client: 0,
            dest,
            ac,
            freq: 2412,
            tx_rates: mrr,
            cookie: 0,
            flags: 0,
            signal: 0,
            duration_usec: 0,
            start_usec: 0,
            acked: false,
        }
    }

    #[test]
    fn pkt_duration_matches_known_values() {
        // 100-byte frame at 6 Mbps (60 in 100kbps units) from S1.
        let d = pkt_duration_usec(100, 60);
        assert_eq!(d, 16 + 4 + 4 * div_round((16 + 800 + 6) * 10, 240));
    }

    #[test]
    fn s1_trivial_unicast_perfect_link() {
        let sender = make_station(0);
        let dest = make_station(1);
        let mut snr = Matrix::filled(2, 0i32);
        snr.set(0, 1, 50);
        snr.set(1, 0, 50);
        let link_model = LinkModel::SnrMatrix(snr);
        let intf = InterferenceMatrix::new(2, false);
        let error_model = ErrorProbModel::default();
        let mut rng = StdRng::seed_from_u64(1);

        let mut mrr_table = [TxRate { idx: -1, count: 0 }; 4];
        mrr_table[0] = TxRate { idx: 0, count: 1 };
        let frame = make_frame(AccessCategory::Be, Destination::Station(1), mrr_table, 100);

        let outcome = run_mrr(&frame, &sender, Some(&dest), &link_model, &intf, &error_model, &mut rng);
        assert!(outcome.acked);
        assert_eq!(outcome.signal, 50 + NOISE_LEVEL);
        assert_eq!(outcome.success_row, Some((0, 0)));
    }

    #[test]
    fn s2_deterministic_loss_via_error_prob_matrix() {
        let sender = make_station(0);
        let dest = make_station(1);
        let mut errp = Matrix::filled(2, 0.0f64);
        errp.set(0, 1, 1.0);
        errp.set(1, 0, 1.0);
        let link_model = LinkModel::ErrProbMatrix(errp);
        let intf = InterferenceMatrix::new(2, false);
        let error_model = ErrorProbModel::default();
        let mut rng = StdRng::seed_from_u64(2);

        let mut mrr_table = [TxRate { idx: -1, count: 0 }; 4];
        mrr_table[0] = TxRate { idx: 0, count: 4 };
        let frame = make_frame(AccessCategory::Be, Destination::Station(1), mrr_table, 100);

        let outcome = run_mrr(&frame, &sender, Some(&dest), &link_model, &intf, &error_model, &mut rng);
        assert!(!outcome.acked);
    }

    #[test]
    fn noack_frames_never_retry() {
        let sender = make_station(0);
        let link_model = LinkModel::Default;
        let intf = InterferenceMatrix::new(1, false);
        let error_model = ErrorProbModel::default();
        let mut rng = StdRng::seed_from_u64(3);

        let mut mrr_table = [TxRate { idx: -1, count: 0 }; 4];
        mrr_table[0] = TxRate { idx: 0, count: 4 };
        let mut data = vec![0u8; 100];
        data[0] = 0x00; // management frame type
        let frame = Frame {
            data,
            sender: 0,
            sender_client: 0,
            dest: Destination::Multicast,
            ac: AccessCategory::Vo,
            freq: 2412,
            tx_rates: mrr_table,
            cookie: 0,
            flags: 0,
            signal: 0,
            duration_usec: 0,
            start_usec: 0,
            acked: false,
        };

        let outcome = run_mrr(&frame, &sender, None, &link_model, &intf, &error_model, &mut rng);
        assert!(outcome.acked);
        assert_eq!(outcome.success_row, Some((0, 0)));
    }
}
