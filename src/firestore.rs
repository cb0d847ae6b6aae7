// firestore.rs

use std::fmt;

use log::*;
use serde::{Deserialize, Serialize};

use crate::storage::PendingUpload;

pub const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_COLLECTION: &str = "air_quality_readings";

/// Firestore typed value wrapper, serialized as `{"stringValue": ...}` etc.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    StringValue(String),
    DoubleValue(f64),
    // int64 travels as a decimal string
    IntegerValue(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fields {
    pub timestamp: Value,
    #[serde(rename = "temperature_C")]
    pub temperature_c: Value,
    pub humidity_percent: Value,
    #[serde(rename = "pressure_hPa")]
    pub pressure_hpa: Value,
    pub gas_ohms: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Fields,
}

impl From<&PendingUpload> for Document {
    fn from(p: &PendingUpload) -> Self {
        Document {
            fields: Fields {
                timestamp: Value::StringValue(p.timestamp.clone()),
                temperature_c: Value::DoubleValue(p.temperature_c),
                humidity_percent: Value::DoubleValue(p.humidity),
                pressure_hpa: Value::DoubleValue(p.pressure_hpa),
                gas_ohms: Value::IntegerValue(p.gas_ohms.to_string()),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Post,
    Patch,
}

/// HTTP seam for the sync client; returns the response status code.
pub trait Transport {
    fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<u16, SyncError>;
}

#[derive(Debug)]
pub enum SyncError {
    Encode(serde_json::Error),
    Http(String),
    Status(u16),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Encode(e) => write!(f, "cannot encode document: {e}"),
            SyncError::Http(e) => write!(f, "http error: {e}"),
            SyncError::Status(s) => write!(f, "unexpected status {s}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        SyncError::Encode(value)
    }
}

pub struct FirestoreClient<T> {
    transport: T,
    base_url: String,
    api_key: String,
}

impl<T: Transport> FirestoreClient<T> {
    pub fn new(transport: T, project_id: &str, api_key: &str) -> Self {
        FirestoreClient {
            transport,
            base_url: format!("{FIRESTORE_API}/projects/{project_id}/databases/(default)/documents"),
            api_key: api_key.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn create_url(&self, collection: &str) -> String {
        format!("{}/{collection}?key={}", self.base_url, self.api_key)
    }

    pub fn update_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}?key={}", self.base_url, self.api_key)
    }

    fn call(&mut self, method: Method, url: &str, upload: &PendingUpload) -> Result<(), SyncError> {
        let body = serde_json::to_vec(&Document::from(upload))?;
        match self.transport.request(method, url, &body)? {
            s if (200..300).contains(&s) => Ok(()),
            s => Err(SyncError::Status(s)),
        }
    }

    /// Create a new document with a server-chosen id.
    pub fn send(&mut self, collection: &str, upload: &PendingUpload) -> bool {
        let url = self.create_url(collection);
        match self.call(Method::Post, &url, upload) {
            Ok(()) => {
                info!("Firestore sync OK: {}", upload.timestamp);
                true
            }
            Err(e) => {
                error!("Firestore sync failed: {e}");
                false
            }
        }
    }

    pub fn update(&mut self, collection: &str, id: &str, upload: &PendingUpload) -> bool {
        let url = self.update_url(collection, id);
        match self.call(Method::Patch, &url, upload) {
            Ok(()) => {
                info!("Firestore update OK: {collection}/{id}");
                true
            }
            Err(e) => {
                error!("Firestore update failed: {e}");
                false
            }
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::*;

#[cfg(target_os = "espidf")]
mod esp {
    use std::time::Duration;

    use embedded_svc::{
        http::{client::Client as HttpClient, Method as HttpMethod},
        io::{Read, Write},
    };
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

    use super::*;

    const TIMEOUT_MS: u64 = 15_000;
    const MAX_BODY: usize = 4096;

    /// HTTPS over the ESP-IDF client with the bundled CA certificates.
    pub struct EspTransport;

    impl EspTransport {
        fn do_request(&mut self, method: Method, url: &str, body: &[u8]) -> anyhow::Result<u16> {
            let config = Configuration {
                timeout: Some(Duration::from_millis(TIMEOUT_MS)),
                use_global_ca_store: true,
                crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
                ..Default::default()
            };
            let mut client = HttpClient::wrap(EspHttpConnection::new(&config)?);

            let method = match method {
                Method::Post => HttpMethod::Post,
                Method::Patch => HttpMethod::Patch,
            };
            let len = body.len().to_string();
            let headers = [("Content-Type", "application/json"), ("Content-Length", len.as_str())];

            let mut req = client.request(method, url, &headers)?;
            req.write_all(body)?;
            req.flush()?;
            let mut resp = req.submit()?;
            let status = resp.status();

            if !(200..300).contains(&status) {
                // keep the error body short, it goes to the log
                let mut buf = [0u8; 256];
                let mut body = Vec::new();
                loop {
                    let n = resp.read(&mut buf)?;
                    if n == 0 || body.len() >= MAX_BODY {
                        break;
                    }
                    body.extend_from_slice(&buf[..n]);
                }
                warn!("Firestore said {status}: {}", String::from_utf8_lossy(&body));
            }
            Ok(status)
        }
    }

    impl Transport for EspTransport {
        fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<u16, SyncError> {
            self.do_request(method, url, body)
                .map_err(|e| SyncError::Http(format!("{e:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTransport {
        status: Result<u16, String>,
        calls: Vec<(Method, String, serde_json::Value)>,
    }

    impl FakeTransport {
        fn new(status: Result<u16, String>) -> Self {
            FakeTransport {
                status,
                calls: Vec::new(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<u16, SyncError> {
            self.calls
                .push((method, url.into(), serde_json::from_slice(body).unwrap()));
            self.status.clone().map_err(SyncError::Http)
        }
    }

    fn upload() -> PendingUpload {
        PendingUpload {
            timestamp: "2025-05-01T12:00:00".into(),
            temperature_c: 22.8,
            humidity: 44.6,
            pressure_hpa: 1012.4,
            gas_ohms: 11690,
        }
    }

    #[test]
    fn document_shape() {
        let v = serde_json::to_value(Document::from(&upload())).unwrap();
        let expected = serde_json::json!({
            "fields": {
                "timestamp": {"stringValue": "2025-05-01T12:00:00"},
                "temperature_C": {"doubleValue": 22.8},
                "humidity_percent": {"doubleValue": 44.6},
                "pressure_hPa": {"doubleValue": 1012.4},
                "gas_ohms": {"integerValue": "11690"}
            }
        });
        assert_eq!(v, expected);
    }

    #[test]
    fn send_posts_to_collection() {
        let mut c = FirestoreClient::new(FakeTransport::new(Ok(200)), "proj-1", "KEY");
        assert!(c.send(DEFAULT_COLLECTION, &upload()));
        let (method, url, body) = &c.transport.calls[0];
        assert_eq!(*method, Method::Post);
        assert_eq!(
            url,
            "https://firestore.googleapis.com/v1/projects/proj-1/databases/(default)/documents/air_quality_readings?key=KEY"
        );
        assert_eq!(body["fields"]["gas_ohms"]["integerValue"], "11690");
    }

    #[test]
    fn update_patches_document() {
        let mut c = FirestoreClient::new(FakeTransport::new(Ok(200)), "p", "k");
        assert!(c.update("readings", "abc123", &upload()));
        let (method, url, _) = &c.transport.calls[0];
        assert_eq!(*method, Method::Patch);
        assert!(url.ends_with("/documents/readings/abc123?key=k"));
    }

    #[test]
    fn non_2xx_is_false() {
        for status in [199, 300, 400, 403, 500] {
            let mut c = FirestoreClient::new(FakeTransport::new(Ok(status)), "p", "k");
            assert!(!c.send("c", &upload()));
            assert!(!c.update("c", "id", &upload()));
        }
        let mut c = FirestoreClient::new(FakeTransport::new(Ok(201)), "p", "k");
        assert!(c.send("c", &upload()));
    }

    #[test]
    fn transport_error_is_false() {
        let mut c = FirestoreClient::new(FakeTransport::new(Err("connection reset".into())), "p", "k");
        assert!(!c.send("c", &upload()));
        assert!(!c.update("c", "id", &upload()));
        assert_eq!(c.transport.calls.len(), 2);
    }
}

// EOF
