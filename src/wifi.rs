// wifi.rs

use std::fmt;

#[derive(Debug)]
pub enum WifiError {
    NoCredentials,
    Driver(String),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WifiError::NoCredentials => write!(f, "no Wi-Fi credentials"),
            WifiError::Driver(e) => write!(f, "Wi-Fi driver error: {e}"),
        }
    }
}

impl std::error::Error for WifiError {}

#[cfg(target_os = "espidf")]
pub use esp::*;

#[cfg(target_os = "espidf")]
mod esp {
    use std::net::Ipv4Addr;

    use embedded_svc::wifi::{ClientConfiguration, Configuration};
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition, wifi::EspWifi};
    use log::*;

    use super::*;
    use crate::config::WifiCredentials;

    /// Station-mode Wi-Fi. Connecting only kicks off association; the loop
    /// polls `is_connected()` and retries on its own schedule.
    pub struct WifiLink<'a> {
        wifi: EspWifi<'a>,
        creds: Option<WifiCredentials>,
    }

    impl<'a> WifiLink<'a> {
        pub fn new(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: EspDefaultNvsPartition,
            creds: Option<WifiCredentials>,
        ) -> anyhow::Result<Self> {
            info!("Initializing Wi-Fi...");
            let mut wifi = EspWifi::new(modem, sysloop, Some(nvs))?;

            match creds.as_ref() {
                Some(c) => {
                    info!("WiFi setting credentials for {:?}...", c.ssid);
                    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
                        ssid: c
                            .ssid
                            .as_str()
                            .try_into()
                            .map_err(|_| anyhow::anyhow!("SSID too long"))?,
                        password: c
                            .password
                            .as_str()
                            .try_into()
                            .map_err(|_| anyhow::anyhow!("Wi-Fi password too long"))?,
                        ..Default::default()
                    }))?;
                    info!("WiFi driver starting...");
                    wifi.start()?;
                }
                None => warn!("Wi-Fi disabled, no credentials."),
            }

            Ok(WifiLink { wifi, creds })
        }

        pub fn is_configured(&self) -> bool {
            self.creds.is_some()
        }

        pub fn is_connected(&self) -> bool {
            self.creds.is_some()
                && self.wifi.is_connected().unwrap_or(false)
                && self.wifi.sta_netif().is_up().unwrap_or(false)
        }

        pub fn connect(&mut self) -> Result<(), WifiError> {
            if self.creds.is_none() {
                return Err(WifiError::NoCredentials);
            }
            if self.is_connected() {
                return Ok(());
            }
            info!("WiFi connecting...");
            self.wifi
                .connect()
                .map_err(|e| WifiError::Driver(format!("{e:?}")))
        }

        pub fn ip_addr(&self) -> Option<Ipv4Addr> {
            self.wifi.sta_netif().get_ip_info().ok().map(|i| i.ip)
        }
    }
}

// EOF
