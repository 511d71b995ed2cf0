//! 802.11 frame header helpers: address extraction, frame-control bit tests,
//! QoS TID extraction and access-category classification, and SAE
//! commit/confirm/action detection used by the frame filter.

use super::station::AccessCategory;

const FCTL_TODS: u8 = 0x01;
const FCTL_FROMDS: u8 = 0x02;
const FCTL_FTYPE_MASK: u8 = 0x0c;
const FTYPE_MGMT: u8 = 0x00;
const FTYPE_DATA: u8 = 0x08;
const STYPE_QOS_DATA: u8 = 0x80;
const QOS_CTL_TAG1D_MASK: u8 = 0x07;
const STYPE_ACTION: u8 = 0xd0;

/// 802.1D user-priority to 802.11e access-category mapping, as used by
/// mac80211 (`ieee802_1d_to_ac`).
const IEEE802_1D_TO_AC: [AccessCategory; 8] = [
    AccessCategory::Be,
    AccessCategory::Bk,
    AccessCategory::Bk,
    AccessCategory::Be,
    AccessCategory::Vi,
    AccessCategory::Vi,
    AccessCategory::Vo,
    AccessCategory::Vo,
];

/// Source MAC (header `addr2`), bytes `[10..16]` of the frame body.
pub fn addr2(data: &[u8]) -> Option<[u8; 6]> {
    data.get(10..16).map(|s| s.try_into().unwrap())
}

/// Destination MAC (header `addr1`), bytes `[4..10]` of the frame body.
pub fn addr1(data: &[u8]) -> Option<[u8; 6]> {
    data.get(4..10).map(|s| s.try_into().unwrap())
}

pub fn is_multicast(addr: &[u8; 6]) -> bool {
    addr[0] & 0x01 != 0
}

fn frame_control(data: &[u8]) -> Option<(u8, u8)> {
    data.get(0..2).map(|fc| (fc[0], fc[1]))
}

fn has_a4(data: &[u8]) -> bool {
    match frame_control(data) {
        Some((_, fc1)) => fc1 & (FCTL_TODS | FCTL_FROMDS) == (FCTL_TODS | FCTL_FROMDS),
        None => false,
    }
}

pub fn is_mgmt(data: &[u8]) -> bool {
    matches!(frame_control(data), Some((fc0, _)) if fc0 & FCTL_FTYPE_MASK == FTYPE_MGMT)
}

fn is_data(data: &[u8]) -> bool {
    matches!(frame_control(data), Some((fc0, _)) if fc0 & FCTL_FTYPE_MASK == FTYPE_DATA)
}

fn is_data_qos(data: &[u8]) -> bool {
    matches!(frame_control(data), Some((fc0, _)) if fc0 & STYPE_QOS_DATA == STYPE_QOS_DATA && fc0 & FCTL_FTYPE_MASK == FTYPE_DATA)
}

fn qos_ctl_offset(data: &[u8]) -> usize {
    if has_a4(data) { 30 } else { 24 }
}

/// Classify a frame into an EDCA access category per §4.3: non-data frames
/// are AC_VO, non-QoS data is AC_BE, QoS data reads the TID from the
/// QoS-control octet and maps it through the 802.1D priority table.
pub fn select_access_category(data: &[u8]) -> AccessCategory {
    if !is_data(data) {
        return AccessCategory::Vo;
    }
    if !is_data_qos(data) {
        return AccessCategory::Be;
    }
    let offset = qos_ctl_offset(data);
    let priority = data.get(offset).copied().unwrap_or(0) & QOS_CTL_TAG1D_MASK;
    IEEE802_1D_TO_AC[priority as usize]
}

/// Any management frame of subtype ACTION.
pub fn is_action(data: &[u8]) -> bool {
    matches!(frame_control(data), Some((fc0, _)) if fc0 & (FCTL_FTYPE_MASK | 0xf0) == (FTYPE_MGMT | STYPE_ACTION))
}

fn action_category_and_action(data: &[u8]) -> Option<(u8, u8)> {
    if !is_action(data) {
        return None;
    }
    data.get(24..26).map(|b| (b[0], b[1]))
}

/// SAE commit: action category 3 (Mesh/SAE), action field 1.
pub fn is_sae_commit(data: &[u8]) -> bool {
    matches!(action_category_and_action(data), Some((3, 1)))
}

/// SAE confirm: action category 3, action field 2.
pub fn is_sae_confirm(data: &[u8]) -> bool {
    matches!(action_category_and_action(data), Some((3, 2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(qos: bool, a4: bool, tid: u8) -> Vec<u8> {
        let mut hdr = vec![0u8; 40];
        hdr[0] = FTYPE_DATA | if qos { STYPE_QOS_DATA } else { 0 };
        if a4 {
            hdr[1] = FCTL_TODS | FCTL_FROMDS;
            hdr[30] = tid;
        } else {
            hdr[24] = tid;
        }
        hdr
    }

    #[test]
    fn non_data_is_vo() {
        let data = vec![0u8; 24];
        assert_eq!(select_access_category(&data), AccessCategory::Vo);
    }

    #[test]
    fn non_qos_data_is_be() {
        let data = data_frame(false, false, 0);
        assert_eq!(select_access_category(&data), AccessCategory::Be);
    }

    #[test]
    fn qos_data_maps_tid_to_ac() {
        let data = data_frame(true, false, 6);
        assert_eq!(select_access_category(&data), AccessCategory::Vo);
        let data = data_frame(true, false, 1);
        assert_eq!(select_access_category(&data), AccessCategory::Bk);
    }

    #[test]
    fn qos_data_with_a4_reads_offset_30() {
        let data = data_frame(true, true, 4);
        assert_eq!(select_access_category(&data), AccessCategory::Vi);
    }

    #[test]
    fn action_frame_detection() {
        let mut data = vec![0u8; 26];
        data[0] = FTYPE_MGMT | STYPE_ACTION;
        data[24] = 3;
        data[25] = 1;
        assert!(is_action(&data));
        assert!(is_sae_commit(&data));
        assert!(!is_sae_confirm(&data));
    }

    #[test]
    fn multicast_detection() {
        assert!(is_multicast(&[0xff; 6]));
        assert!(!is_multicast(&[0x02, 0, 0, 0, 0, 0]));
    }
}
