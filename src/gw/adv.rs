//! Advertisement reports and the retransmission table contract.
//!
//! Every received report is queued on three independent retransmission
//! lists, one per relay target: list 1 for the Ruuvi HTTP target, list 2
//! for the custom HTTP target and list 3 for MQTT. Draining one list does
//! not affect the others.

use serde::{Deserialize, Deserializer};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// BLE MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

/// Errors from parsing a textual MAC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError(String);

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address '{}'", self.0)
    }
}

impl std::error::Error for MacParseError {}

impl FromStr for MacAddr {
    type Err = MacParseError;

    /// Accepts `AA:BB:CC:DD:EE:FF` and `AABBCCDDEEFF`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| *c != ':').collect();
        if hex.len() != 12 || !hex.is_ascii() {
            return Err(MacParseError(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvReport {
    pub mac: MacAddr,
    pub rssi: i8,
    /// Unix time if NTP is in use, otherwise the received-advs counter.
    pub timestamp: i64,
    pub data: Vec<u8>,
}

/// Consumer contract of the advertisement store.
pub trait AdvTable: Send + Sync {
    /// Queue a report on all three retransmission lists.
    fn put(&self, report: AdvReport);

    /// Take everything queued for the Ruuvi HTTP target.
    fn read_retransmission_list1_and_clear(&self) -> Vec<AdvReport>;

    /// Take everything queued for the custom HTTP target.
    fn read_retransmission_list2_and_clear(&self) -> Vec<AdvReport>;

    /// Take everything queued for MQTT.
    fn read_retransmission_list3_and_clear(&self) -> Vec<AdvReport>;

    /// Take the oldest report queued for MQTT.
    fn read_retransmission_list3_head(&self) -> Option<AdvReport>;

    /// Check whether nothing is queued for MQTT.
    fn is_retransmission_list3_empty(&self) -> bool;

    /// Drop everything on every list.
    fn clear(&self);

    /// Number of reports seen since the last clear, for statistics.
    fn statistics_count(&self) -> usize;
}

/// In-memory table with a per-list capacity. The oldest report is dropped
/// when a list is full.
pub struct MemAdvTable {
    capacity: usize,
    lists: Mutex<Lists>,
}

#[derive(Default)]
struct Lists {
    list1: VecDeque<AdvReport>,
    list2: VecDeque<AdvReport>,
    list3: VecDeque<AdvReport>,
    seen: usize,
}

/// Default per-list capacity.
pub const DEFAULT_ADV_TABLE_CAPACITY: usize = 100;

impl MemAdvTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lists: Mutex::new(Lists::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(list: &mut VecDeque<AdvReport>, capacity: usize, report: AdvReport) {
        if list.len() >= capacity {
            list.pop_front();
        }
        list.push_back(report);
    }
}

impl Default for MemAdvTable {
    fn default() -> Self {
        Self::new(DEFAULT_ADV_TABLE_CAPACITY)
    }
}

impl AdvTable for MemAdvTable {
    fn put(&self, report: AdvReport) {
        let mut lists = self.lock();
        Self::push(&mut lists.list1, self.capacity, report.clone());
        Self::push(&mut lists.list2, self.capacity, report.clone());
        Self::push(&mut lists.list3, self.capacity, report);
        lists.seen += 1;
    }

    fn read_retransmission_list1_and_clear(&self) -> Vec<AdvReport> {
        self.lock().list1.drain(..).collect()
    }

    fn read_retransmission_list2_and_clear(&self) -> Vec<AdvReport> {
        self.lock().list2.drain(..).collect()
    }

    fn read_retransmission_list3_and_clear(&self) -> Vec<AdvReport> {
        self.lock().list3.drain(..).collect()
    }

    fn read_retransmission_list3_head(&self) -> Option<AdvReport> {
        self.lock().list3.pop_front()
    }

    fn is_retransmission_list3_empty(&self) -> bool {
        self.lock().list3.is_empty()
    }

    fn clear(&self) {
        let mut lists = self.lock();
        lists.list1.clear();
        lists.list2.clear();
        lists.list3.clear();
        lists.seen = 0;
    }

    fn statistics_count(&self) -> usize {
        self.lock().seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(last: u8) -> AdvReport {
        AdvReport {
            mac: MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last]),
            rssi: -60,
            timestamp: last as i64,
            data: vec![0x99, 0x04, last],
        }
    }

    // ==================== MacAddr Tests ====================

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(mac, MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]));
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:01");

        let compact: MacAddr = "AABBCCDDEE01".parse().unwrap();
        assert_eq!(compact, mac);
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("AA:BB:CC".parse::<MacAddr>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_deserialize() {
        let macs: Vec<MacAddr> = serde_json::from_str(r#"["11:22:33:44:55:66"]"#).unwrap();
        assert_eq!(macs, vec![MacAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])]);
        assert!(serde_json::from_str::<Vec<MacAddr>>(r#"["nope"]"#).is_err());
    }

    // ==================== MemAdvTable Tests ====================

    #[test]
    fn test_lists_are_independent() {
        let table = MemAdvTable::new(10);
        table.put(report(1));
        table.put(report(2));

        assert_eq!(table.read_retransmission_list1_and_clear().len(), 2);
        assert!(table.read_retransmission_list1_and_clear().is_empty());
        assert_eq!(table.read_retransmission_list2_and_clear().len(), 2);
        assert!(!table.is_retransmission_list3_empty());
    }

    #[test]
    fn test_list3_head_pops_in_order() {
        let table = MemAdvTable::new(10);
        table.put(report(1));
        table.put(report(2));

        assert_eq!(table.read_retransmission_list3_head(), Some(report(1)));
        assert_eq!(table.read_retransmission_list3_head(), Some(report(2)));
        assert_eq!(table.read_retransmission_list3_head(), None);
        assert!(table.is_retransmission_list3_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let table = MemAdvTable::new(2);
        table.put(report(1));
        table.put(report(2));
        table.put(report(3));

        let list = table.read_retransmission_list1_and_clear();
        assert_eq!(list, vec![report(2), report(3)]);
        assert_eq!(table.statistics_count(), 3);
    }

    #[test]
    fn test_clear_empties_everything() {
        let table = MemAdvTable::default();
        table.put(report(1));
        table.clear();
        assert!(table.read_retransmission_list1_and_clear().is_empty());
        assert!(table.read_retransmission_list2_and_clear().is_empty());
        assert!(table.is_retransmission_list3_empty());
        assert_eq!(table.statistics_count(), 0);
    }
}
