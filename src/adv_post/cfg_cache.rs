//! Config-derived values read by the advertisement intake path.

use crate::cfg_cache::CfgCacheError;
use crate::gw::cfg::ScanFilterCfg;
use crate::gw::MacAddr;

/// Cached NTP flag and scan filter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdvPostCfg {
    pub use_ntp: bool,
    pub scan_filter_allow_listed: bool,
    pub scan_filter: Vec<MacAddr>,
}

impl AdvPostCfg {
    /// Rebuild every field from the config.
    ///
    /// The new MAC list is fully built before anything is replaced, so on
    /// allocation failure the cache keeps its previous contents.
    pub fn rebuild(&mut self, use_ntp: bool, filter: &ScanFilterCfg) -> Result<(), CfgCacheError> {
        let mut list = Vec::new();
        list.try_reserve_exact(filter.list.len())
            .map_err(|_| CfgCacheError::OutOfMemory {
                what: "scan filter",
                len: filter.list.len(),
            })?;
        list.extend_from_slice(&filter.list);

        self.use_ntp = use_ntp;
        self.scan_filter_allow_listed = filter.allow_listed;
        self.scan_filter = list;
        Ok(())
    }

    /// Release the scan filter (configuration mode).
    pub fn clear_scan_filter(&mut self) {
        self.scan_filter = Vec::new();
    }

    /// Apply the scan filter to one MAC.
    pub fn is_mac_allowed(&self, mac: &MacAddr) -> bool {
        let listed = self.scan_filter.contains(mac);
        if self.scan_filter_allow_listed {
            listed
        } else {
            !listed
        }
    }
}
