// monitor.rs

use std::{
    net::Ipv4Addr,
    time::{Duration, Instant},
};

use chrono::NaiveDateTime;
use embedded_hal::i2c::I2c;
use log::*;
use tokio::time::sleep;

use crate::{
    apiserver::{Restart, Served, StatusPage, StatusServer},
    clock::{to_local, LocalClock, Rtc},
    display::{clock_line, sensor_line, Lcd},
    firestore::{FirestoreClient, Transport},
    measure::{Reading, Sensor},
    state::AppState,
    storage::{round_to, LogStore, SystemSnapshot},
    wifi::WifiError,
};

/// Board services the loop needs besides the sensor and display.
pub trait Platform: Restart {
    /// False when there are no Wi-Fi credentials at all.
    fn wifi_configured(&self) -> bool;
    fn wifi_connected(&self) -> bool;
    fn wifi_connect(&mut self) -> Result<(), WifiError>;
    fn ip_addr(&self) -> Option<Ipv4Addr>;
    fn chip_temperature(&mut self) -> Option<f32>;
    fn set_led(&mut self, on: bool);
}

pub fn snapshot(utc: &NaiveDateTime, uptime: Duration, wifi_up: bool, chip_temp: Option<f32>, chip: &str) -> SystemSnapshot {
    SystemSnapshot {
        time: utc.format("%H:%M").to_string(),
        time_sec: utc.format("%H:%M:%S").to_string(),
        date: utc.format("%d-%m-%Y").to_string(),
        uptime_sec: uptime.as_secs(),
        wifi: if wifi_up { "OK" } else { "OFF" }.into(),
        chip_temp: chip_temp.map(|t| round_to(t, 2)),
        chip: chip.into(),
    }
}

pub fn status_page(local: &NaiveDateTime, snap: Option<&SystemSnapshot>) -> StatusPage {
    let mut page = StatusPage {
        local_time: local.format("%H:%M:%S - %d-%m-%Y").to_string(),
        ..Default::default()
    };
    if let Some(s) = snap {
        page.utc_time = s.time_sec.clone();
        page.utc_date = s.date.clone();
        page.uptime = s.uptime_sec.to_string();
        if let Some(t) = s.chip_temp {
            page.chip_temp = t.to_string();
        }
        page.chip = s.chip.clone();
    }
    page
}

/// The whole firmware: one sequential pass over every component per
/// iteration, then sleep.
pub struct Monitor<S, B, P, R, T> {
    pub state: AppState,
    pub sensor: S,
    pub lcd: Lcd<B>,
    pub platform: P,
    pub clock: LocalClock<R>,
    pub store: LogStore,
    pub firestore: Option<FirestoreClient<T>>,
    pub server: StatusServer,
    pub chip: &'static str,
}

impl<S, B, P, R, T> Monitor<S, B, P, R, T>
where
    S: Sensor,
    B: I2c,
    P: Platform,
    R: Rtc,
    T: Transport,
{
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let start = Instant::now();
        let delay = Duration::from_secs(self.state.config.delay);
        info!("Entering main loop...");
        loop {
            if self.step(start.elapsed()).await == Served::Reboot {
                // only reached when the restart hook returns
                return Ok(());
            }
            sleep(delay).await;
            self.state.next_mode();
        }
    }

    /// One loop iteration at `uptime` since boot.
    pub async fn step(&mut self, uptime: Duration) -> Served {
        self.update_led();

        let utc = self.clock.utc();
        let local = to_local(&utc);

        match self.sensor.measure() {
            Ok(m) => {
                let reading = Reading::new(local, m);
                self.log_reading(&reading);
                self.state.reading = Some(reading);
            }
            Err(e) => error!("Sensor read failed: {e}"),
        }

        let chip_temp = self.platform.chip_temperature();
        let snap = snapshot(&utc, uptime, self.platform.wifi_connected(), chip_temp, self.chip);
        if let Err(e) = self.store.write_snapshot(&snap) {
            error!("Cannot save system values: {e}");
        }
        self.state.snapshot = Some(snap);

        self.render(&local);
        self.maintain_network(uptime);
        self.sync_remote(uptime);

        let page = status_page(&local, self.state.snapshot.as_ref());
        match self.server.serve_once(&page, &mut self.platform).await {
            Ok(served) => served,
            Err(e) => {
                warn!("Status server: {e}");
                Served::Idle
            }
        }
    }

    fn update_led(&mut self) {
        let connected = self.platform.wifi_connected();
        if connected && !self.state.led_on {
            self.platform.set_led(true);
            self.state.led_on = true;
            match self.platform.ip_addr() {
                Some(ip) => info!("WiFi up, status page at http://{ip}:{}/", self.state.config.port),
                None => info!("WiFi up."),
            }
        } else if !connected && self.state.led_on {
            self.platform.set_led(false);
            self.state.led_on = false;
            warn!("WiFi down.");
        }
    }

    fn log_reading(&mut self, reading: &Reading) {
        if let Err(e) = self.store.append_reading(reading) {
            error!("Cannot append to sensor log: {e}");
        }
        match self.store.write_pending(reading) {
            Ok(()) => self.state.upload_pending = true,
            Err(e) => error!("Cannot save pending upload: {e}"),
        }
    }

    fn render(&mut self, local: &NaiveDateTime) {
        let line0 = clock_line(local);
        let line1 = match &self.state.reading {
            Some(r) => sensor_line(self.state.mode(), r),
            None => "No sensor data".into(),
        };
        if let Err(e) = self.lcd.show(&line0, &line1) {
            error!("LCD update failed: {e}");
        }
    }

    fn maintain_network(&mut self, uptime: Duration) {
        if !self.state.wifi_check.fire(uptime) {
            return;
        }
        if !self.platform.wifi_configured() {
            // reported once at boot
            return;
        }
        if !self.platform.wifi_connected() {
            if let Err(e) = self.platform.wifi_connect() {
                warn!("WiFi connect: {e}");
            }
        } else if self.state.ntp_sync.fire(uptime) {
            if let Err(e) = self.clock.sync() {
                warn!("NTP sync failed, next try in {}s: {e}", self.state.config.ntp_interval);
            }
        }
    }

    fn sync_remote(&mut self, uptime: Duration) {
        let Some(firestore) = self.firestore.as_mut() else {
            return;
        };
        if !self.platform.wifi_connected() || !self.state.remote_sync.fire(uptime) {
            return;
        }
        if !self.state.upload_pending {
            debug!("No new reading to upload.");
            return;
        }
        match self.store.read_pending() {
            Some(upload) => {
                if firestore.send(&self.state.config.collection, &upload) {
                    self.state.upload_pending = false;
                } else {
                    warn!("Firestore sync failed - will retry in {}s", self.state.config.sync_interval);
                }
            }
            None => warn!("Nothing pending to upload."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apiserver::tests::get,
        clock::tests::FakeRtc,
        display::tests::FakeBus,
        firestore::{Method, SyncError},
        measure::{Measurement, SensorError},
        storage::tests::scratch_dir,
        MyConfig,
    };

    struct FakeSensor {
        fail: bool,
        m: Measurement,
    }

    impl Sensor for FakeSensor {
        fn measure(&mut self) -> Result<Measurement, SensorError> {
            if self.fail {
                Err(SensorError::Driver("i2c nack".into()))
            } else {
                Ok(self.m)
            }
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        configured: bool,
        connected: bool,
        connects: usize,
        led: bool,
        restarts: usize,
    }

    impl Restart for FakePlatform {
        fn restart(&mut self) {
            self.restarts += 1;
        }
    }

    impl Platform for FakePlatform {
        fn wifi_configured(&self) -> bool {
            self.configured
        }
        fn wifi_connected(&self) -> bool {
            self.connected
        }
        fn wifi_connect(&mut self) -> Result<(), WifiError> {
            self.connects += 1;
            Ok(())
        }
        fn ip_addr(&self) -> Option<Ipv4Addr> {
            Some(Ipv4Addr::new(192, 168, 1, 50))
        }
        fn chip_temperature(&mut self) -> Option<f32> {
            Some(41.254)
        }
        fn set_led(&mut self, on: bool) {
            self.led = on;
        }
    }

    struct FakeTransport {
        status: u16,
        posts: Vec<String>,
    }

    impl Transport for FakeTransport {
        fn request(&mut self, method: Method, url: &str, _body: &[u8]) -> Result<u16, SyncError> {
            assert_eq!(method, Method::Post);
            self.posts.push(url.into());
            Ok(self.status)
        }
    }

    type TestMonitor = Monitor<FakeSensor, FakeBus, FakePlatform, FakeRtc, FakeTransport>;

    fn monitor(name: &str, with_firestore: bool, accept_ms: u64) -> TestMonitor {
        let config = MyConfig {
            accept_timeout_ms: accept_ms,
            recv_timeout_ms: 200,
            ..Default::default()
        };
        let server = StatusServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(config.accept_timeout_ms),
            Duration::from_millis(config.recv_timeout_ms),
        )
        .unwrap();
        let firestore = with_firestore.then(|| {
            FirestoreClient::new(
                FakeTransport {
                    status: 200,
                    posts: Vec::new(),
                },
                "proj",
                "key",
            )
        });
        Monitor {
            state: AppState::new(config),
            sensor: FakeSensor {
                fail: false,
                m: Measurement {
                    temperature: 21.5,
                    humidity: 40.0,
                    pressure: 1012.0,
                    gas: 100_000,
                },
            },
            lcd: Lcd::new(FakeBus::default()),
            platform: FakePlatform {
                configured: true,
                ..Default::default()
            },
            clock: LocalClock::new(FakeRtc::at(2025, 6, 1, 12, 0, 0)),
            store: LogStore::new(scratch_dir(name)),
            firestore,
            server,
            chip: "ESP32-C3",
        }
    }

    fn posts(m: &TestMonitor) -> usize {
        m.firestore.as_ref().unwrap().transport().posts.len()
    }

    #[tokio::test]
    async fn offline_iteration_logs_and_renders() {
        let mut m = monitor("offline", true, 20);
        assert_eq!(m.step(Duration::ZERO).await, Served::Idle);

        assert_eq!(m.store.load_log().len(), 1);
        let pending = m.store.read_pending().unwrap();
        assert_eq!(pending.timestamp, "2025-06-01T15:00:00");
        let snap = m.store.read_snapshot().unwrap();
        assert_eq!(snap.time_sec, "12:00:00");
        assert_eq!(snap.wifi, "OFF");
        assert_eq!(snap.chip_temp, Some(41.25));

        assert_eq!(m.lcd.bus().line(0).unwrap(), "15:00 01-06-2025");
        assert_eq!(m.lcd.bus().line(1).unwrap(), "21.50 C Good Air");

        // offline: reconnect attempted, nothing synced
        assert_eq!(m.platform.connects, 1);
        assert_eq!(posts(&m), 0);
        assert_eq!(m.clock_syncs(), 0);
        assert!(!m.platform.led);
    }

    #[tokio::test]
    async fn online_timers() {
        let mut m = monitor("online", true, 20);
        m.platform.connected = true;

        m.step(Duration::ZERO).await;
        assert!(m.platform.led);
        assert_eq!(m.clock_syncs(), 1);
        assert_eq!(posts(&m), 1);
        assert!(m.firestore.as_ref().unwrap().transport().posts[0].contains("/air_quality_readings?key=key"));

        m.state.next_mode();
        m.step(Duration::from_secs(6)).await;
        assert_eq!(m.lcd.bus().line(1).unwrap(), "40.00% 1012 hPa ");
        assert_eq!(posts(&m), 1);

        m.step(Duration::from_secs(61)).await;
        assert_eq!(posts(&m), 2);
        assert_eq!(m.clock_syncs(), 1);
        assert_eq!(m.platform.connects, 0);

        m.step(Duration::from_secs(3601)).await;
        assert_eq!(m.clock_syncs(), 2);
        assert_eq!(posts(&m), 3);
        assert_eq!(m.store.load_log().len(), 4);

        m.platform.connected = false;
        m.step(Duration::from_secs(3700)).await;
        assert!(!m.platform.led);
        assert_eq!(m.platform.connects, 1);
        assert_eq!(posts(&m), 3);
    }

    #[tokio::test]
    async fn failed_upload_waits_for_next_interval() {
        let mut m = monitor("failed-upload", true, 20);
        m.platform.connected = true;
        m.firestore.as_mut().unwrap().transport_mut().status = 503;

        m.step(Duration::ZERO).await;
        m.step(Duration::from_secs(30)).await;
        assert_eq!(posts(&m), 1);
        m.step(Duration::from_secs(60)).await;
        assert_eq!(posts(&m), 2);
    }

    #[tokio::test]
    async fn no_firestore_credentials_never_syncs() {
        let mut m = monitor("no-firestore", false, 20);
        m.platform.connected = true;
        m.step(Duration::ZERO).await;
        assert!(m.firestore.is_none());
        assert!(m.store.read_pending().is_some());
    }

    #[tokio::test]
    async fn sensor_failure_keeps_last_reading() {
        let mut m = monitor("sensor-fail", false, 20);
        m.sensor.fail = true;
        m.step(Duration::ZERO).await;
        assert!(m.store.load_log().is_empty());
        assert!(m.store.read_pending().is_none());
        assert_eq!(m.lcd.bus().line(1).unwrap(), "No sensor data  ");
        assert!(m.store.read_snapshot().is_some());

        m.sensor.fail = false;
        m.step(Duration::from_secs(6)).await;
        m.sensor.fail = true;
        m.step(Duration::from_secs(12)).await;
        assert_eq!(m.store.load_log().len(), 1);
        assert_eq!(m.lcd.bus().line(1).unwrap(), "21.50 C Good Air");
    }

    #[tokio::test]
    async fn no_wifi_credentials_never_connects() {
        let mut m = monitor("no-wifi-creds", false, 20);
        m.platform.configured = false;
        for t in [0, 60, 120, 180] {
            m.step(Duration::from_secs(t)).await;
        }
        assert_eq!(m.platform.connects, 0);
        assert_eq!(m.clock_syncs(), 0);
        assert_eq!(m.store.load_log().len(), 4);
    }

    #[tokio::test]
    async fn failed_ntp_sync_waits_an_hour() {
        let mut m = monitor("ntp-fail", false, 20);
        m.platform.connected = true;
        m.clock.rtc_mut().fail_sync = true;

        m.step(Duration::ZERO).await;
        assert_eq!(m.clock_syncs(), 1);
        // wifi check fires again, NTP does not
        m.step(Duration::from_secs(60)).await;
        assert_eq!(m.clock_syncs(), 1);
        m.step(Duration::from_secs(3600)).await;
        assert_eq!(m.clock_syncs(), 2);
    }

    #[tokio::test]
    async fn stale_pending_is_not_resent() {
        let mut m = monitor("stale-pending", true, 20);
        m.platform.connected = true;

        m.step(Duration::ZERO).await;
        assert_eq!(posts(&m), 1);

        m.sensor.fail = true;
        m.step(Duration::from_secs(60)).await;
        m.step(Duration::from_secs(120)).await;
        assert_eq!(posts(&m), 1);
        assert!(m.store.read_pending().is_some());

        m.sensor.fail = false;
        m.step(Duration::from_secs(180)).await;
        assert_eq!(posts(&m), 2);
    }

    #[tokio::test]
    async fn pending_from_previous_boot_is_not_sent() {
        let mut m = monitor("previous-boot", true, 20);
        m.store.write_pending(&crate::storage::tests::reading(7)).unwrap();
        m.platform.connected = true;
        m.sensor.fail = true;

        m.step(Duration::ZERO).await;
        assert_eq!(posts(&m), 0);
    }

    #[tokio::test]
    async fn reboot_request_resets_once() {
        let mut m = monitor("reboot", false, 500);
        let addr = m.server.local_addr().unwrap();

        let client = tokio::spawn(get(addr, "GET /reboot HTTP/1.1\r\n\r\n"));
        assert_eq!(m.step(Duration::ZERO).await, Served::Reboot);
        assert!(client.await.unwrap().contains("Rebooting..."));
        assert_eq!(m.platform.restarts, 1);
        assert!(m.server.local_addr().is_none());
    }

    #[tokio::test]
    async fn status_request_served_from_loop() {
        let mut m = monitor("status", false, 500);
        let addr = m.server.local_addr().unwrap();

        let client = tokio::spawn(get(addr, "GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(m.step(Duration::from_secs(75)).await, Served::Status);
        let html = client.await.unwrap();
        assert!(html.contains("15:00:00 - 01-06-2025"));
        assert!(html.contains("12:00:00 01-06-2025"));
        assert!(html.contains("<td>75</td>"));
        assert!(html.contains("41.25"));
        assert_eq!(m.platform.restarts, 0);
    }

    impl TestMonitor {
        fn clock_syncs(&self) -> usize {
            self.clock.rtc().syncs
        }
    }
}

// EOF
