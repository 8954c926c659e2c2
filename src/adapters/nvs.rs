//! Blob storage on the NVS partition.
//!
//! Implements [`StoragePort`] for the config image. On the board each call
//! opens the namespace through `EspNvs`; the host build keeps blobs in a
//! map keyed by `(namespace, key)`.

use crate::app::ports::{ConfigError, StorageError, StoragePort};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::BTreeMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{ESP_ERR_NVS_NOT_ENOUGH_SPACE, EspError};
#[cfg(target_os = "espidf")]
use log::warn;

pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    partition: EspDefaultNvsPartition,
    #[cfg(not(target_os = "espidf"))]
    blobs: BTreeMap<(String, String), Vec<u8>>,
}

impl NvsAdapter {
    /// Take the default partition. ESP-IDF erases and re-initialises it
    /// when it is full or was written by a newer layout.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            let partition = EspDefaultNvsPartition::take().map_err(|e| {
                warn!("nvs: partition unavailable ({})", e);
                ConfigError::IoError
            })?;
            info!("nvs: default partition ready");
            Ok(Self { partition })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("nvs: simulation backend");
            Ok(Self { blobs: BTreeMap::new() })
        }
    }

    #[cfg(target_os = "espidf")]
    fn open(&self, namespace: &str, write: bool) -> Result<EspNvs<NvsDefault>, StorageError> {
        EspNvs::new(self.partition.clone(), namespace, write).map_err(|e| {
            warn!("nvs: open {} failed ({})", namespace, e);
            StorageError::IoError
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn slot(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_owned(), key.to_owned())
    }
}

#[cfg(target_os = "espidf")]
fn write_error(e: EspError) -> StorageError {
    if e.code() == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
        StorageError::Full
    } else {
        StorageError::IoError
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            let nvs = match self.open(namespace, false) {
                Ok(nvs) => nvs,
                // A namespace that was never written cannot be opened read-only.
                Err(_) => return Err(StorageError::NotFound),
            };
            match nvs.get_blob(key, buf) {
                Ok(Some(blob)) => Ok(blob.len()),
                Ok(None) => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let blob = self
                .blobs
                .get(&Self::slot(namespace, key))
                .ok_or(StorageError::NotFound)?;
            let dst = buf.get_mut(..blob.len()).ok_or(StorageError::IoError)?;
            dst.copy_from_slice(blob);
            Ok(blob.len())
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(target_os = "espidf")]
        {
            self.open(namespace, true)?.set_blob(key, data).map_err(write_error)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs.insert(Self::slot(namespace, key), data.to_vec());
            Ok(())
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(target_os = "espidf")]
        {
            self.open(namespace, true)?
                .remove(key)
                .map(|_| ())
                .map_err(|_| StorageError::IoError)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs.remove(&Self::slot(namespace, key));
            Ok(())
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(target_os = "espidf")]
        {
            self.open(namespace, false)
                .and_then(|nvs| nvs.contains(key).map_err(|_| StorageError::IoError))
                .unwrap_or(false)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs.contains_key(&Self::slot(namespace, key))
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn blob_lifecycle() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("robocore", "eeprom", b"V10").unwrap();
        assert!(nvs.exists("robocore", "eeprom"));
        let mut buf = [0u8; 8];
        assert_eq!(nvs.read("robocore", "eeprom", &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"V10");
        nvs.delete("robocore", "eeprom").unwrap();
        assert_eq!(nvs.read("robocore", "eeprom", &mut buf), Err(StorageError::NotFound));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("robocore", "eeprom", &[0xAA; 16]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(nvs.read("robocore", "eeprom", &mut buf), Err(StorageError::IoError));
    }

    #[test]
    fn namespaces_do_not_share_keys() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("a", "k", b"1").unwrap();
        assert!(!nvs.exists("b", "k"));
    }
}
