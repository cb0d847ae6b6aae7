// bin/esp32air.rs

#![warn(clippy::large_futures)]

#[cfg(target_os = "espidf")]
esp_idf_sys::esp_app_desc!();

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use std::{
        cell::RefCell,
        net::{Ipv4Addr, SocketAddr},
        time::Duration,
    };

    use embedded_hal_bus::i2c::RefCellDevice;
    use esp32air::*;
    use esp_idf_hal::{
        delay::FreeRtos,
        gpio::{OutputPin, PinDriver},
        i2c::{I2cConfig, I2cDriver},
        prelude::*,
    };
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs};
    use esp_idf_sys::esp;
    use log::*;

    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // eventfd is needed by our mio poll implementation.
    #[allow(clippy::needless_update)]
    let eventfd_config = esp_idf_sys::esp_vfs_eventfd_config_t {
        max_fds: 1,
        ..Default::default()
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&eventfd_config) } }?;

    info!("Hello, {CHIP_NAME} air monitor v{FW_VERSION}");

    let sysloop = EspSystemEventLoop::take()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

    let ns = env!("CARGO_BIN_NAME");
    let mut nvs = nvs::EspNvs::new(nvs_default_partition.clone(), ns, true)?;
    info!("Got namespace {ns:?} from default partition");

    #[cfg(feature = "reset_settings")]
    let config = {
        let c = MyConfig::default();
        c.to_nvs(&mut nvs)?;
        c
    };

    #[cfg(not(feature = "reset_settings"))]
    let config = match MyConfig::from_nvs(&mut nvs) {
        None => {
            error!("Could not read nvs config, using defaults");
            let c = MyConfig::default();
            c.to_nvs(&mut nvs)?;
            info!("Successfully saved default config to nvs.");
            c
        }
        Some(c) => c,
    };
    info!("My config:\n{config:#?}");

    mount_spiffs(&config.data_dir)?;
    let store = LogStore::new(&config.data_dir);
    let wifi_creds = WifiCredentials::load(&config.data_dir);
    let firestore_creds = FirestoreCredentials::load(&config.data_dir);
    if firestore_creds.is_none() {
        warn!("Firestore not configured, remote sync disabled.");
    }

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    #[cfg(feature = "esp32c3")]
    let (sda, scl, led_pin) = (pins.gpio0, pins.gpio1, pins.gpio8.downgrade_output());
    #[cfg(not(feature = "esp32c3"))]
    let (sda, scl, led_pin) = (pins.gpio21, pins.gpio22, pins.gpio2.downgrade_output());

    let i2c_config = I2cConfig::new().baudrate(100.kHz().into());
    let i2c = RefCell::new(I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)?);

    let mut lcd = Lcd::new(RefCellDevice::new(&i2c));
    if let Err(e) = lcd.init(&mut FreeRtos) {
        error!("LCD init failed: {e}");
    }
    let sensor = Bme680Sensor::new(RefCellDevice::new(&i2c))?;
    info!("BME680 ready.");

    let mut clock = LocalClock::new(EspRtc {
        server: config.ntp_server.clone(),
    });
    // until NTP answers, continue from where we were before the reset
    match store.read_snapshot() {
        Some(s) => match clock.seed(&s.date, &s.time_sec) {
            Ok(t) => info!("Clock seeded from saved values: {t}"),
            Err(e) => warn!("Cannot seed clock: {e}"),
        },
        None => warn!("No saved system values, clock starts at epoch."),
    }

    let mut wifi = WifiLink::new(peripherals.modem, sysloop, nvs_default_partition, wifi_creds)?;
    if let Err(e) = wifi.connect() {
        warn!("Initial WiFi connect: {e}");
    }

    let chip_temp = match ChipTemp::new() {
        Ok(t) => Some(t),
        Err(e) => {
            warn!("Chip temperature not available: {e}");
            None
        }
    };
    let board = EspBoard {
        wifi,
        led: PinDriver::output(led_pin)?,
        chip_temp,
    };

    let firestore = firestore_creds.map(|c| FirestoreClient::new(EspTransport, &c.project_id, &c.api_key));

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Box::pin(async move {
            let server = StatusServer::bind(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
                Duration::from_millis(config.accept_timeout_ms),
                Duration::from_millis(config.recv_timeout_ms),
            )?;
            let mut monitor = Monitor {
                state: AppState::new(config),
                sensor,
                lcd,
                platform: board,
                clock,
                store,
                firestore,
                server,
                chip: CHIP_NAME,
            };
            Box::pin(monitor.run()).await
        }))?;

    // not actually returning from main() but we reboot instead
    info!("main() finished, reboot.");
    FreeRtos::delay_ms(3000);
    esp_idf_hal::reset::restart();
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("esp32air runs on ESP-IDF targets only, use `cargo test` on the host.");
}

// EOF
