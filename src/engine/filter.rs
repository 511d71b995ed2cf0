//! Frame filter (C9): an optional drop rule keyed by (source MAC,
//! management-frame subtype, count), applied before queueing.

use super::ieee80211::{is_action, is_sae_commit, is_sae_confirm};
use super::station::Mac;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSubtype {
    Commit,
    Confirm,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Pass,
    Drop,
}

#[derive(Debug, Clone)]
pub struct FrameFilter {
    mac: Mac,
    subtype: FilterSubtype,
    /// Negative means "unbounded" (the original's sentinel of `-1`).
    count: i64,
}

impl FrameFilter {
    /// Parses a dotted string `"aa:bb:cc:dd:ee:ff.commit.N"`.
    pub fn parse(s: &str) -> Option<FrameFilter> {
        let mut parts = s.split('.');
        let mac_str = parts.next()?;
        let subtype_str = parts.next()?;
        let count = match parts.next() {
            Some(c) => c.parse().ok()?,
            None => -1,
        };

        let mac = parse_mac(mac_str)?;
        let subtype = match subtype_str {
            "commit" => FilterSubtype::Commit,
            "confirm" => FilterSubtype::Confirm,
            "action" => FilterSubtype::Action,
            _ => return None,
        };

        Some(FrameFilter { mac, subtype, count })
    }

    /// Applies the rule to an ingress frame; decrements `count` on a drop
    /// and becomes permanently inert (`Pass`-only) once it reaches zero.
    pub fn matches(&mut self, sender_mac: &Mac, data: &[u8]) -> FilterDecision {
        if self.count == 0 {
            return FilterDecision::Pass;
        }
        if sender_mac != &self.mac {
            return FilterDecision::Pass;
        }

        let hits = match self.subtype {
            FilterSubtype::Commit => is_sae_commit(data),
            FilterSubtype::Confirm => is_sae_confirm(data),
            FilterSubtype::Action => is_action(data),
        };

        if !hits {
            return FilterDecision::Pass;
        }

        if self.count > 0 {
            self.count -= 1;
        }
        FilterDecision::Drop
    }
}

fn parse_mac(s: &str) -> Option<Mac> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for byte in out.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sae_commit_frame(category: u8, action: u8) -> Vec<u8> {
        let mut data = vec![0u8; 26];
        data[0] = 0xd0; // mgmt, subtype ACTION
        data[24] = category;
        data[25] = action;
        data
    }

    #[test]
    fn s4_filter_drops_two_commits_then_passes_confirm() {
        let mut filter = FrameFilter::parse("02:00:00:00:00:00.commit.2").unwrap();
        let mac = [2, 0, 0, 0, 0, 0];

        let commit = sae_commit_frame(3, 1);
        assert_eq!(filter.matches(&mac, &commit), FilterDecision::Drop);
        assert_eq!(filter.matches(&mac, &commit), FilterDecision::Drop);
        // count is now inert at 0
        assert_eq!(filter.matches(&mac, &commit), FilterDecision::Pass);

        let confirm = sae_commit_frame(3, 2);
        let mut filter2 = FrameFilter::parse("02:00:00:00:00:00.commit.2").unwrap();
        assert_eq!(filter2.matches(&mac, &confirm), FilterDecision::Pass);
    }

    #[test]
    fn unbounded_count_when_omitted() {
        let mut filter = FrameFilter::parse("02:00:00:00:00:00.action").unwrap();
        let mac = [2, 0, 0, 0, 0, 0];
        let action = sae_commit_frame(5, 9);
        for _ in 0..10 {
            assert_eq!(filter.matches(&mac, &action), FilterDecision::Drop);
        }
    }

    #[test]
    fn parse_rejects_unknown_subtype() {
        assert!(FrameFilter::parse("02:00:00:00:00:00.bogus.1").is_none());
    }
}
