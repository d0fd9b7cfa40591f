use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    pub normal_interval: u32,
    pub retry_interval: u32,
    pub retry_times: u32,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            normal_interval: 30_000,
            retry_interval: 300,
            retry_times: 3,
        }
    }
}

impl AdvertiseSettings {
    /// Wall-clock time between refreshes of a server ticking at `tick_rate`.
    pub fn refresh_period(&self, tick_rate: u32) -> Duration {
        let millis = u64::from(self.normal_interval) * 1000 / u64::from(tick_rate.max(1));
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseAction {
    Register,
    Unregister,
}

/// Decides when to (re)register with the master server, counted in frames.
/// Registration is repeated a few times until acknowledged, then refreshed
/// on the long interval.
#[derive(Debug, Clone)]
pub struct Advertiser {
    settings: AdvertiseSettings,
    enabled: bool,
    need_advertise: bool,
    retries: u32,
    last_frame: u32,
}

impl Advertiser {
    pub fn new(settings: AdvertiseSettings, enabled: bool) -> Self {
        Self {
            settings,
            enabled,
            need_advertise: enabled,
            retries: 0,
            last_frame: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn retries_left(&self) -> u32 {
        self.retries
    }

    pub fn poll(&mut self, frame: u32) -> Option<AdvertiseAction> {
        if !self.enabled {
            return None;
        }

        if self.need_advertise {
            self.need_advertise = false;
            self.retries = self.settings.retry_times;
        } else {
            if self.retries == 0 {
                if self.last_frame.saturating_add(self.settings.normal_interval) > frame {
                    return None;
                }
                self.retries = self.settings.retry_times;
            }

            if self.last_frame.saturating_add(self.settings.retry_interval) > frame {
                return None;
            }
        }

        self.retries = self.retries.saturating_sub(1);
        self.last_frame = frame;
        Some(AdvertiseAction::Register)
    }

    pub fn on_ack(&mut self) -> Option<AdvertiseAction> {
        self.retries = 0;
        if self.enabled {
            None
        } else {
            Some(AdvertiseAction::Unregister)
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Option<AdvertiseAction> {
        let was = self.enabled;
        self.enabled = enabled;
        match (was, enabled) {
            (false, true) => {
                self.need_advertise = true;
                None
            }
            (true, false) => {
                self.retries = 0;
                Some(AdvertiseAction::Unregister)
            }
            _ => None,
        }
    }
}
