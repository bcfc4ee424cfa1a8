//! HTTP client for the backend service.
//!
//! # Responsibilities
//! - Forward a staged request with its original method
//! - Send non-GET bodies as UTF-8 JSON
//! - Turn every transport failure into a synthetic 500 so the waiting
//!   caller gets an answer instead of a timeout

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::types::BrokerResponse;

const SYNTHETIC_ERROR_STATUS: i32 = 500;

/// Backend client wrapper.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL for a staged request path.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Call `url` and collect status and body. Never fails.
    pub async fn do_request(&self, url: &str, method: &str, body: &str) -> BrokerResponse {
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                tracing::error!(url = %url, method = %method, error = %e, "Unsupported method");
                return synthetic_error();
            }
        };

        let mut request = self.client.request(method.clone(), url);
        if method != Method::GET && method != Method::HEAD {
            request = request
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(body.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %url, method = %method, error = %e, "Backend request failed");
                return synthetic_error();
            }
        };

        let status = i32::from(response.status().as_u16());
        match response.text().await {
            Ok(body) => {
                tracing::debug!(url = %url, status, "Backend responded");
                BrokerResponse::new(status, body)
            }
            Err(e) => {
                tracing::error!(url = %url, status, error = %e, "Backend body unreadable");
                synthetic_error()
            }
        }
    }
}

fn synthetic_error() -> BrokerResponse {
    BrokerResponse::new(SYNTHETIC_ERROR_STATUS, "")
}
