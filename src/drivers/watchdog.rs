//! Task Watchdog Timer (TWDT) driver.
//!
//! `G99 T<ms>` arms the watchdog with the requested timeout and `G100`
//! pets it; `M999` re-arms it after the Stopped latch is cleared. Until
//! armed, `feed()` is a no-op so the host can run without petting.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::info;

#[derive(Debug, Default)]
pub struct Watchdog {
    timeout_ms: Option<u32>,
    #[cfg(not(target_os = "espidf"))]
    feeds: u32,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the watchdog and subscribe the current task.
    pub fn start(&mut self, timeout_ms: u32) {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: TWDT calls from the single main task.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!("TWDT reconfigure returned {} (may already be configured)", ret);
                }
                if self.timeout_ms.is_none() {
                    let ret = esp_task_wdt_add(core::ptr::null_mut());
                    if ret != ESP_OK {
                        log::warn!("Watchdog: failed to subscribe ({})", ret);
                        return;
                    }
                }
            }
        }

        self.timeout_ms = Some(timeout_ms);
        info!("Watchdog: armed ({} ms, panic on trigger)", timeout_ms);
    }

    /// Re-arm with the last timeout, if one was ever set.
    pub fn restart(&mut self) {
        if let Some(ms) = self.timeout_ms {
            self.start(ms);
        }
    }

    /// Feed the watchdog. Must be called within the armed timeout.
    pub fn feed(&mut self) {
        if self.timeout_ms.is_none() {
            return;
        }

        #[cfg(target_os = "espidf")]
        unsafe {
            esp_task_wdt_reset();
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.feeds += 1;
        }
    }

    pub fn timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u32 {
        self.feeds
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn feed_is_noop_until_armed() {
        let mut wd = Watchdog::new();
        wd.feed();
        assert_eq!(wd.feeds(), 0);
        wd.start(500);
        wd.feed();
        assert_eq!(wd.feeds(), 1);
        assert_eq!(wd.timeout_ms(), Some(500));
    }
}
