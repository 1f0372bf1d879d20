//! Config-derived values read on every received advertisement.

use crate::gw::GwCfg;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdvMqttCfg {
    pub use_ntp: bool,
    /// Publish every advertisement as it arrives instead of periodically.
    pub mqtt_instant_mode_active: bool,
}

impl AdvMqttCfg {
    pub fn rebuild(&mut self, cfg: &GwCfg) {
        self.use_ntp = cfg.ntp_use;
        self.mqtt_instant_mode_active = cfg.mqtt_instant_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_mode_needs_mqtt_and_zero_interval() {
        let mut cache = AdvMqttCfg::default();
        let mut cfg = GwCfg::default();
        cache.rebuild(&cfg);
        assert!(cache.use_ntp);
        assert!(!cache.mqtt_instant_mode_active);

        cfg.mqtt.use_mqtt = true;
        cache.rebuild(&cfg);
        assert!(cache.mqtt_instant_mode_active);

        cfg.mqtt.sending_interval_secs = 10;
        cfg.ntp_use = false;
        cache.rebuild(&cfg);
        assert!(!cache.use_ntp);
        assert!(!cache.mqtt_instant_mode_active);
    }
}
