//! Link matrices (C2): SNR, optional error-probability, and interference
//! bookkeeping, plus the tagged `LinkModel` variant that replaces the
//! original's function-pointer dispatch (§9 "function pointers for
//! link/error policy").

use rand::Rng;

pub const SNR_DEFAULT: i32 = 30;
pub const NOISE_LEVEL: i32 = -91;
pub const CCA_THRESHOLD: i32 = -90;

/// Per-pair interference bookkeeping entry (§3, §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct IntfEntry {
    pub duration_usec: u64,
    pub latest_signal_dbm: i32,
    pub prob_col: f64,
}

/// Row-major N×N matrix, `[i * n + j]` indexing, diagonal unused.
#[derive(Debug, Clone)]
pub struct Matrix<T> {
    n: usize,
    data: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    pub fn filled(n: usize, value: T) -> Self {
        Self {
            n,
            data: vec![value; n * n],
        }
    }

    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) {
        self.data[i * self.n + j] = value;
    }

    pub fn n(&self) -> usize {
        self.n
    }
}

/// How SNR/error-probability for a pair is resolved, chosen once at
/// configuration time per §4.2's mutually exclusive precedence.
#[derive(Debug, Clone)]
pub enum LinkModel {
    /// No links/error_probs/path_loss configured: constant `SNR_DEFAULT`.
    Default,
    /// Explicit `ifaces.links` or derived `path_loss`: per-pair SNR.
    SnrMatrix(Matrix<i32>),
    /// `ifaces.error_probs`: SNR reads as `SNR_DEFAULT`, error probability
    /// comes straight from the matrix instead of a rate/SNR curve.
    ErrProbMatrix(Matrix<f64>),
}

impl LinkModel {
    pub fn get_link_snr(&self, src: usize, dst: usize) -> i32 {
        match self {
            LinkModel::Default => SNR_DEFAULT,
            LinkModel::SnrMatrix(m) => *m.get(src, dst),
            LinkModel::ErrProbMatrix(_) => SNR_DEFAULT,
        }
    }

    /// Whether a single Bernoulli draw must be taken once per frame and
    /// reused across MRR retries (§3's "fixed random value" invariant).
    pub fn uses_fixed_random_value(&self) -> bool {
        matches!(self, LinkModel::ErrProbMatrix(_))
    }

    pub fn error_prob_from_matrix(&self, src: usize, dst: usize) -> Option<f64> {
        match self {
            LinkModel::ErrProbMatrix(m) => Some(*m.get(src, dst)),
            _ => None,
        }
    }
}

/// Interference matrix (C7) plus the periodic 10 ms conversion tick.
#[derive(Debug, Clone)]
pub struct InterferenceMatrix {
    enabled: bool,
    entries: Matrix<IntfEntry>,
}

impl InterferenceMatrix {
    pub fn new(n: usize, enabled: bool) -> Self {
        Self {
            enabled,
            entries: Matrix::filled(n, IntfEntry::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn entry(&self, src: usize, dst: usize) -> &IntfEntry {
        self.entries.get(src, dst)
    }

    /// `set_interference_duration`: records `dur` against every station `k`
    /// if `signal < CCA_THRESHOLD`; returns whether it was recorded.
    pub fn set_interference_duration(&mut self, src: usize, dur_usec: u32, signal: i32) -> bool {
        if !self.enabled || signal >= CCA_THRESHOLD {
            return false;
        }
        let n = self.entries.n();
        for k in 0..n {
            let e = self.entries.get(src, k);
            let mut e = *e;
            e.duration_usec += dur_usec as u64;
            e.latest_signal_dbm = signal;
            self.entries.set(src, k, e);
        }
        true
    }

    /// Runs every 10 ms: `prob_col = duration / 10000` (dur in µs over a
    /// 10,000 µs window), then zeroes the accumulator.
    pub fn tick_10ms(&mut self) {
        let n = self.entries.n();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let mut e = *self.entries.get(i, j);
                e.prob_col = (e.duration_usec as f64 / 10_000.0).clamp(0.0, 1.0);
                e.duration_usec = 0;
                self.entries.set(i, j, e);
            }
        }
    }

    /// `get_signal_offset_by_interference`: linear-mW sum over every
    /// interferer `k` whose Bernoulli draw succeeds, converted back to dB.
    pub fn interference_offset(&self, src: usize, dst: usize, rng: &mut impl Rng) -> i32 {
        if !self.enabled {
            return 0;
        }
        let n = self.entries.n();
        let mut total_mw = 0.0f64;
        for k in 0..n {
            if k == src || k == dst {
                continue;
            }
            let e = self.entries.get(k, dst);
            if rng.gen::<f64>() < e.prob_col {
                total_mw += dbm_to_mw(e.latest_signal_dbm);
            }
        }
        if total_mw <= 1.0 {
            0
        } else {
            (mw_to_dbm(total_mw) + 0.5) as i32
        }
    }
}

/// `dBm_to_milliwatt`: converts a dBm signal relative to `NOISE_LEVEL` into
/// linear milliwatts, clamping the exponent to ±31 dB (the `INTF_LIMIT` from
/// §9) to avoid `pow()` under/overflow.
pub fn dbm_to_mw(dbm: i32) -> f64 {
    const INTF_LIMIT: i32 = 31;
    let intf_diff = NOISE_LEVEL - dbm;
    if intf_diff >= INTF_LIMIT {
        0.001
    } else if intf_diff <= -INTF_LIMIT {
        1000.0
    } else {
        10f64.powf(-(intf_diff as f64) / 10.0)
    }
}

/// `milliwatt_to_dBm`.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_returns_snr_default() {
        let m = LinkModel::Default;
        assert_eq!(m.get_link_snr(0, 1), SNR_DEFAULT);
        assert!(!m.uses_fixed_random_value());
    }

    #[test]
    fn error_prob_matrix_forces_default_snr_and_fixed_draw() {
        let mut mat = Matrix::filled(2, 0.0);
        mat.set(0, 1, 1.0);
        mat.set(1, 0, 1.0);
        let m = LinkModel::ErrProbMatrix(mat);
        assert_eq!(m.get_link_snr(0, 1), SNR_DEFAULT);
        assert!(m.uses_fixed_random_value());
        assert_eq!(m.error_prob_from_matrix(0, 1), Some(1.0));
    }

    #[test]
    fn interference_tick_computes_prob_col_fraction() {
        let mut intf = InterferenceMatrix::new(2, true);
        intf.set_interference_duration(0, 5_000, -95);
        intf.tick_10ms();
        assert!((intf.entry(0, 1).prob_col - 0.5).abs() < 1e-9);
        assert_eq!(intf.entry(0, 1).duration_usec, 0);
    }

    #[test]
    fn strong_signal_is_not_recorded() {
        let mut intf = InterferenceMatrix::new(2, true);
        let recorded = intf.set_interference_duration(0, 5_000, -50);
        assert!(!recorded);
    }

    #[test]
    fn dbm_to_mw_clamps_exponent() {
        // intf_diff = NOISE_LEVEL - (-200) = 109 >> INTF_LIMIT, clamped to 0.001 mW.
        assert_eq!(dbm_to_mw(-200), 0.001);
        // intf_diff = NOISE_LEVEL - 50 = -141 << -INTF_LIMIT, clamped to 1000.0 mW.
        assert_eq!(dbm_to_mw(50), 1000.0);
    }

    #[test]
    fn mw_to_dbm_matches_log_formula() {
        assert!((mw_to_dbm(100.0) - 20.0).abs() < 1e-9);
    }
}
