// config.rs

use std::{fs, path::Path};

use anyhow::bail;
use crc::{Crc, CRC_32_ISCSI};
use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::firestore::DEFAULT_COLLECTION;

pub const NVS_BUF_SIZE: usize = 256;

const DEFAULT_API_PORT: u16 = 80;
const DEFAULT_LOOP_DELAY: u64 = 6;
const DEFAULT_WIFI_RETRY: u64 = 60;
const DEFAULT_SYNC_INTERVAL: u64 = 60;
const DEFAULT_NTP_INTERVAL: u64 = 3600;
const DEFAULT_ACCEPT_TIMEOUT_MS: u64 = 500;
const DEFAULT_RECV_TIMEOUT_MS: u64 = 1000;

pub const CONFIG_NAME: &str = "cfg";

pub const WIFI_CREDS_FILE: &str = "key.json";
pub const FIRESTORE_CREDS_FILE: &str = "firebase_config.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MyConfig {
    pub port: u16,
    /// Seconds slept at the end of every loop iteration.
    pub delay: u64,
    pub wifi_retry: u64,
    pub sync_interval: u64,
    pub ntp_interval: u64,
    pub accept_timeout_ms: u64,
    pub recv_timeout_ms: u64,

    pub data_dir: String,
    pub collection: String,
    pub ntp_server: String,
}

impl Default for MyConfig {
    fn default() -> Self {
        Self {
            port: option_env!("API_PORT")
                .unwrap_or("-")
                .parse()
                .unwrap_or(DEFAULT_API_PORT),
            delay: DEFAULT_LOOP_DELAY,
            wifi_retry: DEFAULT_WIFI_RETRY,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            ntp_interval: DEFAULT_NTP_INTERVAL,
            accept_timeout_ms: DEFAULT_ACCEPT_TIMEOUT_MS,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,

            data_dir: option_env!("DATA_DIR").unwrap_or("/spiffs").into(),
            collection: DEFAULT_COLLECTION.into(),
            ntp_server: "pool.ntp.org".into(),
        }
    }
}

impl MyConfig {
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        match postcard::from_bytes_crc32::<MyConfig>(b, digest) {
            Ok(c) => {
                info!("Successfully parsed config.");
                Some(c)
            }
            Err(e) => {
                error!("Cannot parse config: {e:?}");
                None
            }
        }
    }

    pub fn to_bytes<'a>(&self, buf: &'a mut [u8]) -> anyhow::Result<&'a mut [u8]> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        match postcard::to_slice_crc32(self, buf, digest) {
            Ok(d) => Ok(d),
            Err(e) => bail!("Cannot encode config to buffer {e:?}"),
        }
    }
}

#[cfg(target_os = "espidf")]
impl MyConfig {
    pub fn from_nvs(nvs: &mut esp_idf_svc::nvs::EspNvs<esp_idf_svc::nvs::NvsDefault>) -> Option<Self> {
        let mut nvsbuf = [0u8; NVS_BUF_SIZE];
        info!("Reading up to {sz} bytes from nvs...", sz = NVS_BUF_SIZE);
        let b = match nvs.get_raw(CONFIG_NAME, &mut nvsbuf) {
            Err(e) => {
                error!("Nvs read error {e:?}");
                return None;
            }
            Ok(Some(b)) => b,
            _ => {
                error!("Nvs key not found");
                return None;
            }
        };
        info!("Got {sz} bytes from nvs. Parsing config...", sz = b.len());
        Self::from_bytes(b)
    }

    pub fn to_nvs(&self, nvs: &mut esp_idf_svc::nvs::EspNvs<esp_idf_svc::nvs::NvsDefault>) -> anyhow::Result<()> {
        let mut nvsbuf = [0u8; NVS_BUF_SIZE];
        let nvsdata = self.to_bytes(&mut nvsbuf)?;
        info!(
            "Encoded config to {sz} bytes. Saving to nvs...",
            sz = nvsdata.len()
        );

        match nvs.set_raw(CONFIG_NAME, nvsdata) {
            Ok(_) => {
                info!("Config saved.");
                Ok(())
            }
            Err(e) => bail!("Cannot save to nvs: {e:?}"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Clone, Deserialize)]
pub struct FirestoreCredentials {
    pub project_id: String,
    pub api_key: String,
}

// never log the secrets
impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials").field("ssid", &self.ssid).finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FirestoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreCredentials")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

pub trait Credentials: DeserializeOwned {
    const FILE: &'static str;

    fn is_complete(&self) -> bool;

    /// Load from the data directory. A missing, unreadable or incomplete
    /// file disables the feature that needs it.
    fn load<P: AsRef<Path>>(dir: P) -> Option<Self> {
        let path = dir.as_ref().join(Self::FILE);
        let buf = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!("{} not found: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_slice::<Self>(&buf) {
            Ok(c) if c.is_complete() => Some(c),
            Ok(_) => {
                warn!("{} is incomplete", path.display());
                None
            }
            Err(e) => {
                error!("Cannot parse {}: {e}", path.display());
                None
            }
        }
    }
}

impl Credentials for WifiCredentials {
    const FILE: &'static str = WIFI_CREDS_FILE;

    fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }
}

impl Credentials for FirestoreCredentials {
    const FILE: &'static str = FIRESTORE_CREDS_FILE;

    fn is_complete(&self) -> bool {
        !self.project_id.is_empty() && !self.api_key.is_empty()
    }
}


// EOF
