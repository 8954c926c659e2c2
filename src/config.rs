//! Controller configuration and its EEPROM-shaped persistence.
//!
//! The stored image mirrors the classic EEPROM layout: a 3-byte version tag
//! at [`EEPROM_OFFSET`] followed by the `postcard` body. Saving invalidates
//! the tag first, writes the body, then writes the real tag, so a save that
//! is interrupted half way reads back as "no config" and falls to defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};

/// Byte offset of the version tag inside the image.
pub const EEPROM_OFFSET: usize = 100;
/// Bump whenever the serialized layout changes.
pub const EEPROM_VERSION: &[u8; 3] = b"V10";
const INVALID_TAG: &[u8; 3] = b"000";

const NAMESPACE: &str = "robocore";
const IMAGE_KEY: &str = "eeprom";
const MAX_IMAGE: usize = 256;

/// Runtime tunables of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Stream unsolicited sensor telemetry after every command.
    pub realtime_output: bool,
    /// Watchdog timeout used by `G99` when no `T` is given (ms).
    pub watchdog_timeout_ms: u32,
    /// Baud rate of the smart controller link.
    pub smart_baud: u32,
    /// Baud rate of the command console.
    pub console_baud: u32,
    /// Level cap applied by PWM-only drivers.
    pub max_pwm_level: u16,
    /// Default `M47` battery threshold (raw ADC counts).
    pub battery_threshold: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            realtime_output: false,
            watchdog_timeout_ms: 2000,
            smart_baud: crate::pins::SMART_BAUD,
            console_baud: crate::pins::CONSOLE_BAUD,
            max_pwm_level: 2000,
            battery_threshold: 0,
        }
    }
}

impl ControllerConfig {
    /// Field values in `M503` order, one numbered line each.
    pub fn report_lines(&self) -> [u32; 6] {
        [
            u32::from(self.realtime_output),
            self.watchdog_timeout_ms,
            self.smart_baud,
            self.console_baud,
            u32::from(self.max_pwm_level),
            u32::from(self.battery_threshold),
        ]
    }
}

const STANDARD_BAUDS: [u32; 8] = [9600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600];

pub fn validate_config(cfg: &ControllerConfig) -> Result<(), ConfigError> {
    if !(15..=8000).contains(&cfg.watchdog_timeout_ms) {
        return Err(ConfigError::ValidationFailed("watchdog_timeout_ms must be 15-8000"));
    }
    if !STANDARD_BAUDS.contains(&cfg.smart_baud) {
        return Err(ConfigError::ValidationFailed("smart_baud is not a standard rate"));
    }
    if !STANDARD_BAUDS.contains(&cfg.console_baud) {
        return Err(ConfigError::ValidationFailed("console_baud is not a standard rate"));
    }
    if !(1..=2000).contains(&cfg.max_pwm_level) {
        return Err(ConfigError::ValidationFailed("max_pwm_level must be 1-2000"));
    }
    if cfg.battery_threshold > 1023 {
        return Err(ConfigError::ValidationFailed("battery_threshold must be 0-1023"));
    }
    Ok(())
}

/// [`ConfigPort`] over any blob [`StoragePort`].
pub struct ConfigStore<S: StoragePort> {
    storage: S,
}

impl<S: StoragePort> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn read_image(&self) -> Result<Vec<u8>, StorageError> {
        let mut buf = [0u8; MAX_IMAGE];
        let len = self.storage.read(NAMESPACE, IMAGE_KEY, &mut buf)?;
        Ok(buf[..len].to_vec())
    }

    fn write_image(&mut self, image: &[u8]) -> Result<(), ConfigError> {
        self.storage.write(NAMESPACE, IMAGE_KEY, image).map_err(ConfigError::from)
    }
}

fn put_tag(image: &mut Vec<u8>, tag: &[u8; 3]) {
    if image.len() < EEPROM_OFFSET + tag.len() {
        image.resize(EEPROM_OFFSET + tag.len(), 0xFF);
    }
    image[EEPROM_OFFSET..EEPROM_OFFSET + tag.len()].copy_from_slice(tag);
}

impl<S: StoragePort> ConfigPort for ConfigStore<S> {
    fn load(&self) -> Result<ControllerConfig, ConfigError> {
        let image = self.read_image()?;
        let body_start = EEPROM_OFFSET + EEPROM_VERSION.len();
        if image.len() < body_start || &image[EEPROM_OFFSET..body_start] != EEPROM_VERSION {
            info!("config: stored version tag mismatch");
            return Err(ConfigError::NotFound);
        }
        let (cfg, _) = postcard::take_from_bytes::<ControllerConfig>(&image[body_start..])
            .map_err(|_| ConfigError::Corrupted)?;
        validate_config(&cfg)?;
        info!("config: loaded ({} bytes)", image.len());
        Ok(cfg)
    }

    fn save(&mut self, config: &ControllerConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let body = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        if EEPROM_OFFSET + EEPROM_VERSION.len() + body.len() > MAX_IMAGE {
            return Err(ConfigError::StorageFull);
        }

        let mut image = self.read_image().unwrap_or_default();
        put_tag(&mut image, INVALID_TAG);
        self.write_image(&image)?;

        image.truncate(EEPROM_OFFSET + EEPROM_VERSION.len());
        image.extend_from_slice(&body);
        self.write_image(&image)?;

        put_tag(&mut image, EEPROM_VERSION);
        self.write_image(&image)?;
        info!("config: saved ({} byte body)", body.len());
        Ok(())
    }
}

/// Load the stored config, falling back to defaults on any failure.
pub fn load_or_default(port: &dyn ConfigPort) -> ControllerConfig {
    match port.load() {
        Ok(cfg) => cfg,
        Err(ConfigError::NotFound) => {
            info!("config: no stored settings, using defaults");
            ControllerConfig::default()
        }
        Err(e) => {
            warn!("config: {e}, using defaults");
            ControllerConfig::default()
        }
    }
}
