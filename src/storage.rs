// storage.rs

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::measure::{AirQuality, Reading};

pub const LOG_CAPACITY: usize = 500;

pub const LOG_FILE: &str = "data.json";
pub const PENDING_FILE: &str = "pending_upload.json";
pub const SNAPSHOT_FILE: &str = "last_values.json";

pub fn round_to(v: f32, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (v as f64 * m).round() / m
}

/// One element of the bounded reading log, stamped with local time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: String,
    pub date: String,
    pub temp: f64,
    pub hum: f64,
    pub pres: f64,
    pub iaq: AirQuality,
}

impl From<&Reading> for LogEntry {
    fn from(r: &Reading) -> Self {
        LogEntry {
            time: r.timestamp.format("%H:%M:%S").to_string(),
            date: r.timestamp.format("%d-%m-%Y").to_string(),
            temp: round_to(r.temperature, 2),
            hum: round_to(r.humidity, 2),
            pres: round_to(r.pressure, 0),
            iaq: r.iaq,
        }
    }
}

/// Latest reading in the shape the remote sync consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub timestamp: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f64,
    #[serde(rename = "humidity_%")]
    pub humidity: f64,
    #[serde(rename = "pressure_hPa")]
    pub pressure_hpa: f64,
    pub gas_ohms: u32,
}

impl From<&Reading> for PendingUpload {
    fn from(r: &Reading) -> Self {
        PendingUpload {
            timestamp: r.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            temperature_c: round_to(r.temperature, 2),
            humidity: round_to(r.humidity, 2),
            pressure_hpa: round_to(r.pressure, 1),
            gas_ohms: r.gas,
        }
    }
}

/// System status, UTC based. Also what the clock is seeded from at boot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub time: String,
    pub time_sec: String,
    pub date: String,
    pub uptime_sec: u64,
    pub wifi: String,
    pub chip_temp: Option<f64>,
    pub chip: String,
}

#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "storage i/o error: {e}"),
            StorageError::Json(e) => write!(f, "storage encoding error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(value: io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

/// The three persisted JSON files under one directory. Writes replace the
/// whole file; unreadable files read back as empty.
pub struct LogStore {
    dir: PathBuf,
    capacity: usize,
}

impl LogStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        LogStore {
            dir: dir.as_ref().to_path_buf(),
            capacity: LOG_CAPACITY,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let buf = fs::read(self.path(name)).ok()?;
        match serde_json::from_slice(&buf) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring corrupt {name}: {e}");
                None
            }
        }
    }

    fn store<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        let buf = serde_json::to_vec(value)?;
        fs::write(self.path(name), buf)?;
        Ok(())
    }

    pub fn load_log(&self) -> Vec<LogEntry> {
        self.load(LOG_FILE).unwrap_or_default()
    }

    /// Append to the bounded log, dropping the oldest entries past capacity.
    pub fn append_reading(&self, reading: &Reading) -> Result<usize, StorageError> {
        let mut log = self.load_log();
        log.push(LogEntry::from(reading));
        if log.len() > self.capacity {
            log.drain(..log.len() - self.capacity);
        }
        self.store(LOG_FILE, &log)?;
        Ok(log.len())
    }

    pub fn write_pending(&self, reading: &Reading) -> Result<(), StorageError> {
        self.store(PENDING_FILE, &PendingUpload::from(reading))
    }

    pub fn read_pending(&self) -> Option<PendingUpload> {
        self.load(PENDING_FILE)
    }

    pub fn write_snapshot(&self, snapshot: &SystemSnapshot) -> Result<(), StorageError> {
        self.store(SNAPSHOT_FILE, snapshot)
    }

    pub fn read_snapshot(&self) -> Option<SystemSnapshot> {
        self.load(SNAPSHOT_FILE)
    }
}

#[cfg(target_os = "espidf")]
pub fn mount_spiffs(base_path: &str) -> anyhow::Result<()> {
    use std::ffi::CString;

    use esp_idf_sys::esp;

    let base = CString::new(base_path)?;
    let conf = esp_idf_sys::esp_vfs_spiffs_conf_t {
        base_path: base.as_ptr(),
        partition_label: std::ptr::null(),
        max_files: 5,
        format_if_mount_failed: true,
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_spiffs_register(&conf) } }?;
    // the vfs keeps the pointer
    std::mem::forget(base);
    info!("Mounted data partition at {base_path}");
    Ok(())
}


// EOF
