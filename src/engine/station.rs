//! Station registry (C1): the ordered set of simulated radios, MAC↔index
//! mapping, and each station's four EDCA queues.

use std::collections::HashMap;

use super::frame::Frame;

pub type Mac = [u8; 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessCategory {
    Bk = 0,
    Be = 1,
    Vi = 2,
    Vo = 3,
}

impl AccessCategory {
    pub const ALL: [AccessCategory; 4] = [
        AccessCategory::Bk,
        AccessCategory::Be,
        AccessCategory::Vi,
        AccessCategory::Vo,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// `(cw_min, cw_max)` per §3: AC_BK/AC_BE (15,1023), AC_VI (7,15), AC_VO (3,7).
    pub fn cw_bounds(self) -> (u32, u32) {
        match self {
            AccessCategory::Bk => (15, 1023),
            AccessCategory::Be => (15, 1023),
            AccessCategory::Vi => (7, 15),
            AccessCategory::Vo => (3, 7),
        }
    }
}

/// A per-station, per-AC FIFO of frames ordered by non-decreasing `start`.
#[derive(Debug, Default)]
pub struct Wqueue {
    pub frames: Vec<Frame>,
}

impl Wqueue {
    /// Absolute start time of the last queued frame, if any.
    pub fn tail_start_usec(&self) -> Option<u64> {
        self.frames.last().map(|f| f.start_usec)
    }
}

/// A simulated radio: stable index, virtual and hardware MAC, position,
/// transmit power, and the four EDCA queues.
#[derive(Debug, Clone)]
pub struct Station {
    pub index: usize,
    pub addr: Mac,
    pub hwaddr: Mac,
    pub tx_power_dbm: f64,
    pub pos: (f64, f64),
    pub client: Option<usize>,
}

#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: Vec<Station>,
    queues: Vec<[Wqueue; 4]>,
    by_mac: HashMap<Mac, usize>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a station; its index equals its position in the registry.
    pub fn add(&mut self, addr: Mac, tx_power_dbm: f64, pos: (f64, f64)) -> usize {
        let index = self.stations.len();
        self.stations.push(Station {
            index,
            addr,
            hwaddr: addr,
            tx_power_dbm,
            pos,
            client: None,
        });
        self.queues.push(Default::default());
        self.by_mac.insert(addr, index);
        index
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn lookup_by_mac(&self, mac: &Mac) -> Option<usize> {
        self.by_mac.get(mac).copied()
    }

    pub fn get(&self, index: usize) -> &Station {
        &self.stations[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Station {
        &mut self.stations[index]
    }

    pub fn for_each(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn queue(&self, station: usize, ac: AccessCategory) -> &Wqueue {
        &self.queues[station][ac.index()]
    }

    pub fn queue_mut(&mut self, station: usize, ac: AccessCategory) -> &mut Wqueue {
        &mut self.queues[station][ac.index()]
    }

    /// Latest `start` among every queued frame of AC `>= ac`, across all
    /// stations, per §4.5's queue-tail dominance rule.
    pub fn max_tail_start_at_or_above(&self, ac: AccessCategory) -> Option<u64> {
        self.queues
            .iter()
            .flat_map(|per_ac| per_ac[ac.index()..].iter())
            .filter_map(|q| q.tail_start_usec())
            .max()
    }

    pub fn bind_client(&mut self, station: usize, client: usize, hwaddr: Mac) {
        let s = self.get_mut(station);
        s.client = Some(client);
        s.hwaddr = hwaddr;
    }

    /// Clears the back-reference of every station bound to `client`.
    pub fn unbind_client(&mut self, client: usize) {
        for s in self.stations.iter_mut() {
            if s.client == Some(client) {
                s.client = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_equals_append_order() {
        let mut reg = StationRegistry::new();
        let a = reg.add([2, 0, 0, 0, 0, 0], 15.0, (0.0, 0.0));
        let b = reg.add([2, 0, 0, 0, 0, 1], 15.0, (1.0, 0.0));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(reg.get(a).index, 0);
        assert_eq!(reg.get(b).index, 1);
    }

    #[test]
    fn lookup_by_mac_roundtrips() {
        let mut reg = StationRegistry::new();
        let mac = [2, 0, 0, 0, 0, 9];
        let idx = reg.add(mac, 15.0, (0.0, 0.0));
        assert_eq!(reg.lookup_by_mac(&mac), Some(idx));
        assert_eq!(reg.lookup_by_mac(&[9; 6]), None);
    }

    #[test]
    fn cw_bounds_match_spec() {
        assert_eq!(AccessCategory::Bk.cw_bounds(), (15, 1023));
        assert_eq!(AccessCategory::Be.cw_bounds(), (15, 1023));
        assert_eq!(AccessCategory::Vi.cw_bounds(), (7, 15));
        assert_eq!(AccessCategory::Vo.cw_bounds(), (3, 7));
    }
}
