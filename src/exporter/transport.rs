//! Delivery of encoded batches to the intake

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::error::ExportError;

/// Path of the test-cycle intake behind the agent's EVP proxy
pub const INTAKE_PATH: &str = "/evp_proxy/v1/api/v2/citestcycle";
pub const CONTENT_TYPE: &str = "application/msgpack";
pub const SUBDOMAIN_HEADER: &str = "X-Datadog-EVP-Subdomain";
pub const SUBDOMAIN: &str = "citestcycle-intake";
pub const API_KEY_HEADER: &str = "dd-api-key";

/// Boxed future returned by [`Transport::send`]
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Sends one encoded payload
pub trait Transport: Send + Sync {
    fn send(&self, body: Vec<u8>) -> SendFuture<'_>;
}

/// HTTP transport posting MessagePack bodies to the intake
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), INTAKE_PATH),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ExportError> {
        Self::new(&config.intake_url, config.api_key.clone(), config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: Vec<u8>) -> Result<(), ExportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(SUBDOMAIN_HEADER, SUBDOMAIN);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key.as_str());
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        debug!(endpoint = %self.endpoint, status = status.as_u16(), "Response from the intake");
        if !status.is_success() {
            return Err(ExportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send(&self, body: Vec<u8>) -> SendFuture<'_> {
        Box::pin(self.post(body))
    }
}

/// Transport that keeps every body in memory, optionally failing the next
/// sends. Used by tests and dry runs.
#[derive(Default)]
pub struct RecordingTransport {
    bodies: Mutex<Vec<Vec<u8>>>,
    fail_next: Mutex<usize>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` sends fail with a transport error
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = count;
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, body: Vec<u8>) -> SendFuture<'_> {
        let result = {
            let mut failures = self.fail_next.lock().unwrap_or_else(PoisonError::into_inner);
            if *failures > 0 {
                *failures -= 1;
                Err(ExportError::Transport("simulated failure".to_string()))
            } else {
                self.bodies
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(body);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}
