// measure.rs

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const HUMIDITY_BASELINE: f32 = 40.0;
const HUMIDITY_WEIGHTING: f32 = 0.25;
const GAS_CEILING: f32 = 100_000.0;

/// Raw values straight from the sensor driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub gas: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AirQuality {
    Good,
    Avg,
    Poor,
    Bad,
}

impl AirQuality {
    pub fn from_index(iaq: f32) -> Self {
        if iaq >= 80.0 {
            AirQuality::Good
        } else if iaq >= 60.0 {
            AirQuality::Avg
        } else if iaq >= 40.0 {
            AirQuality::Poor
        } else {
            AirQuality::Bad
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AirQuality::Good => "Good",
            AirQuality::Avg => "Avg",
            AirQuality::Poor => "Poor",
            AirQuality::Bad => "Bad",
        }
    }
}

impl fmt::Display for AirQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn humidity_score(humidity: f32) -> f32 {
    let offset = humidity - HUMIDITY_BASELINE;
    let weight = HUMIDITY_WEIGHTING * 100.0;
    if offset > 0.0 {
        (100.0 - HUMIDITY_BASELINE - offset) / (100.0 - HUMIDITY_BASELINE) * weight
    } else {
        (HUMIDITY_BASELINE + offset) / HUMIDITY_BASELINE * weight
    }
}

pub fn gas_score(gas: f32) -> f32 {
    (gas / GAS_CEILING).min(1.0) * (100.0 - HUMIDITY_WEIGHTING * 100.0)
}

/// Indoor air quality index, 0..100 for sane inputs.
pub fn air_quality_index(humidity: f32, gas: f32) -> f32 {
    humidity_score(humidity) + gas_score(gas)
}

/// One loop iteration's worth of sensor data, stamped with local time.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub gas: u32,
    pub iaq: AirQuality,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, m: Measurement) -> Self {
        Reading {
            timestamp,
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
            gas: m.gas,
            iaq: AirQuality::from_index(air_quality_index(m.humidity, m.gas as f32)),
        }
    }
}

pub trait Sensor {
    fn measure(&mut self) -> Result<Measurement, SensorError>;
}

#[derive(Debug)]
pub enum SensorError {
    Driver(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Driver(e) => write!(f, "sensor driver error: {e}"),
        }
    }
}

impl std::error::Error for SensorError {}

#[cfg(target_os = "espidf")]
pub use bme::*;

#[cfg(target_os = "espidf")]
mod bme {
    use std::time::Duration;

    use bme680::{Bme680, I2CAddress, IIRFilterSize, OversamplingSetting, PowerMode, SettingsBuilder};
    use esp_idf_hal::delay::{Ets, FreeRtos};

    use super::*;

    // bme680 is still on embedded-hal 0.2, bridge it from our 1.0 bus
    pub struct I2cCompat<I2C>(pub I2C);

    impl<I2C> embedded_hal_0_2::blocking::i2c::Write for I2cCompat<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
    {
        type Error = I2C::Error;
        fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Self::Error> {
            self.0.write(addr, bytes)
        }
    }

    impl<I2C> embedded_hal_0_2::blocking::i2c::Read for I2cCompat<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
    {
        type Error = I2C::Error;
        fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
            self.0.read(addr, buffer)
        }
    }

    impl<I2C> embedded_hal_0_2::blocking::i2c::WriteRead for I2cCompat<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
    {
        type Error = I2C::Error;
        fn write_read(&mut self, addr: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error> {
            self.0.write_read(addr, bytes, buffer)
        }
    }

    pub struct Bme680Sensor<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
    {
        dev: Bme680<I2cCompat<I2C>, Ets>,
        profile_dur: Duration,
    }

    impl<I2C> Bme680Sensor<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
        I2C::Error: fmt::Debug,
    {
        pub fn new(i2c: I2C) -> Result<Self, SensorError> {
            let mut delay = Ets;
            let mut dev = Bme680::init(I2cCompat(i2c), &mut delay, I2CAddress::Secondary)
                .map_err(|e| SensorError::Driver(format!("init: {e:?}")))?;

            let settings = SettingsBuilder::new()
                .with_humidity_oversampling(OversamplingSetting::OS2x)
                .with_pressure_oversampling(OversamplingSetting::OS4x)
                .with_temperature_oversampling(OversamplingSetting::OS8x)
                .with_temperature_filter(IIRFilterSize::Size3)
                .with_gas_measurement(Duration::from_millis(150), 320, 25)
                .with_run_gas(true)
                .build();

            dev.set_sensor_settings(&mut delay, settings)
                .map_err(|e| SensorError::Driver(format!("settings: {e:?}")))?;
            let profile_dur = dev
                .get_profile_dur(&settings.0)
                .map_err(|e| SensorError::Driver(format!("profile: {e:?}")))?;

            Ok(Bme680Sensor { dev, profile_dur })
        }
    }

    impl<I2C> Sensor for Bme680Sensor<I2C>
    where
        I2C: embedded_hal::i2c::I2c,
        I2C::Error: fmt::Debug,
    {
        fn measure(&mut self) -> Result<Measurement, SensorError> {
            let mut delay = Ets;
            self.dev
                .set_sensor_mode(&mut delay, PowerMode::ForcedMode)
                .map_err(|e| SensorError::Driver(format!("{e:?}")))?;
            FreeRtos::delay_ms(self.profile_dur.as_millis() as u32);

            let (data, _state) = self
                .dev
                .get_sensor_data(&mut delay)
                .map_err(|e| SensorError::Driver(format!("{e:?}")))?;

            Ok(Measurement {
                temperature: data.temperature_celsius(),
                humidity: data.humidity_percent(),
                pressure: data.pressure_hpa(),
                gas: data.gas_resistance_ohm(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn label_boundaries() {
        assert_eq!(AirQuality::from_index(80.0), AirQuality::Good);
        assert_eq!(AirQuality::from_index(79.99), AirQuality::Avg);
        assert_eq!(AirQuality::from_index(60.0), AirQuality::Avg);
        assert_eq!(AirQuality::from_index(59.99), AirQuality::Poor);
        assert_eq!(AirQuality::from_index(40.0), AirQuality::Poor);
        assert_eq!(AirQuality::from_index(39.99), AirQuality::Bad);
    }

    #[test]
    fn baseline_humidity_full_gas_is_good() {
        assert_eq!(humidity_score(40.0), 25.0);
        assert_eq!(gas_score(100_000.0), 75.0);
        assert_eq!(air_quality_index(40.0, 100_000.0), 100.0);
        assert_eq!(AirQuality::from_index(air_quality_index(40.0, 100_000.0)), AirQuality::Good);
    }

    #[test]
    fn humidity_score_falls_off_both_sides() {
        assert_eq!(humidity_score(100.0), 0.0);
        assert_eq!(humidity_score(0.0), 0.0);
        assert!((humidity_score(70.0) - 12.5).abs() < 1e-4);
        assert!((humidity_score(20.0) - 12.5).abs() < 1e-4);
    }

    #[test]
    fn gas_score_is_capped() {
        assert_eq!(gas_score(500_000.0), 75.0);
        assert!((gas_score(50_000.0) - 37.5).abs() < 1e-4);
    }

    #[test]
    fn reading_carries_label() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let r = Reading::new(
            ts,
            Measurement {
                temperature: 21.5,
                humidity: 40.0,
                pressure: 1012.0,
                gas: 10_000,
            },
        );
        // 25 + 7.5
        assert_eq!(r.iaq, AirQuality::Bad);
        assert_eq!(r.iaq.to_string(), "Bad");
    }
}

// EOF
