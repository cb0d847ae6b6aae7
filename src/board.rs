// board.rs

use std::net::Ipv4Addr;

use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use log::*;

use crate::{apiserver::Restart, monitor::Platform, wifi::WifiError, WifiLink};

/// On-die temperature sensor, only wired up on chips that have one.
pub struct ChipTemp {
    #[cfg(feature = "esp32c3")]
    handle: esp_idf_sys::temperature_sensor_handle_t,
}

impl ChipTemp {
    #[cfg(feature = "esp32c3")]
    pub fn new() -> anyhow::Result<Self> {
        use esp_idf_sys::esp;

        let conf = esp_idf_sys::temperature_sensor_config_t {
            range_min: -10,
            range_max: 80,
            ..Default::default()
        };
        let mut handle: esp_idf_sys::temperature_sensor_handle_t = std::ptr::null_mut();
        esp! { unsafe { esp_idf_sys::temperature_sensor_install(&conf, &mut handle) } }?;
        esp! { unsafe { esp_idf_sys::temperature_sensor_enable(handle) } }?;
        Ok(ChipTemp { handle })
    }

    #[cfg(not(feature = "esp32c3"))]
    pub fn new() -> anyhow::Result<Self> {
        anyhow::bail!("no internal temperature sensor on this chip")
    }

    #[cfg(feature = "esp32c3")]
    pub fn celsius(&mut self) -> Option<f32> {
        let mut t = 0.0f32;
        let rc = unsafe { esp_idf_sys::temperature_sensor_get_celsius(self.handle, &mut t) };
        (rc == esp_idf_sys::ESP_OK).then_some(t)
    }

    #[cfg(not(feature = "esp32c3"))]
    pub fn celsius(&mut self) -> Option<f32> {
        None
    }
}

pub struct EspBoard<'a> {
    pub wifi: WifiLink<'a>,
    pub led: PinDriver<'a, AnyOutputPin, Output>,
    pub chip_temp: Option<ChipTemp>,
}

impl Restart for EspBoard<'_> {
    fn restart(&mut self) {
        info!("Restarting...");
        esp_idf_hal::reset::restart();
    }
}

impl Platform for EspBoard<'_> {
    fn wifi_configured(&self) -> bool {
        self.wifi.is_configured()
    }

    fn wifi_connected(&self) -> bool {
        self.wifi.is_connected()
    }

    fn wifi_connect(&mut self) -> Result<(), WifiError> {
        self.wifi.connect()
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.wifi.ip_addr()
    }

    fn chip_temperature(&mut self) -> Option<f32> {
        self.chip_temp.as_mut()?.celsius()
    }

    fn set_led(&mut self, on: bool) {
        let res = if on { self.led.set_high() } else { self.led.set_low() };
        if let Err(e) = res {
            error!("LED: {e:?}");
        }
    }
}

// EOF
