// lib.rs
#![warn(clippy::large_futures)]

mod config;
pub use config::*;

mod state;
pub use state::*;

mod measure;
pub use measure::*;

mod clock;
pub use clock::*;

mod display;
pub use display::*;

mod storage;
pub use storage::*;

mod firestore;
pub use firestore::*;

mod apiserver;
pub use apiserver::*;

mod wifi;
pub use wifi::*;

mod monitor;
pub use monitor::*;

#[cfg(target_os = "espidf")]
mod board;
#[cfg(target_os = "espidf")]
pub use board::*;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "esp32c3")]
pub const CHIP_NAME: &str = "ESP32-C3";
#[cfg(not(feature = "esp32c3"))]
pub const CHIP_NAME: &str = "ESP32";

// EOF
