//! Multipart HTTP delivery to the classification endpoint.

use std::time::Instant;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::prepare::{ImagePrep, resolve_path};
use super::{Delivery, DeliveryClient, DeliveryError};
use crate::config::Config;
use crate::error::Result;
use crate::telemetry::metrics;

const UPLOAD_FILE_NAME: &str = "capture.jpg";

/// Posts one resized JPEG plus the consent flag per delivery.
pub struct HttpDeliveryClient {
    http: reqwest::Client,
    predict_url: String,
    health_url: Option<String>,
    api_token: Option<SecretString>,
    consent: bool,
    prep: ImagePrep,
}

impl HttpDeliveryClient {
    pub fn new(predict_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            predict_url: predict_url.into(),
            health_url: None,
            api_token: None,
            consent: true,
            prep: ImagePrep::default(),
        }
    }

    /// Build from config. Fails if no endpoint base URL is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(config.predict_url()?)
            .health_url(config.health_url()?)
            .consent(config.consent);
        client.api_token = config
            .api_token
            .as_ref()
            .map(|token| SecretString::from(token.expose_secret().to_string()));
        Ok(client)
    }

    pub fn health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    pub fn api_token(mut self, token: SecretString) -> Self {
        self.api_token = Some(token);
        self
    }

    pub fn consent(mut self, consent: bool) -> Self {
        self.consent = consent;
        self
    }

    pub fn prep(mut self, prep: ImagePrep) -> Self {
        self.prep = prep;
        self
    }

    /// GET the health endpoint; any 2xx is healthy.
    pub async fn health_check(&self) -> std::result::Result<(), DeliveryError> {
        let url = self
            .health_url
            .as_deref()
            .ok_or_else(|| DeliveryError::InvalidUri("no health endpoint configured".into()))?;
        let response = self.authorize(self.http.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token {
            Some(ref token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn submit(&self, uri: &str) -> std::result::Result<Delivery, DeliveryError> {
        let path = resolve_path(uri)?;
        let prep = self.prep;

        let resize_start = Instant::now();
        let jpeg = tokio::task::spawn_blocking(move || prep.encode(&path))
            .await
            .map_err(|e| DeliveryError::Panicked(format!("image preprocessing: {e}")))??;
        debug!(
            bytes = jpeg.len(),
            duration_ms = resize_start.elapsed().as_millis() as u64,
            "image prepared"
        );

        let image = Part::bytes(jpeg)
            .file_name(UPLOAD_FILE_NAME)
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .part("image", image)
            .text("consent", self.consent.to_string());

        let api_start = Instant::now();
        let response = self
            .authorize(self.http.post(&self.predict_url))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        debug!(
            status = status.as_u16(),
            duration_ms = api_start.elapsed().as_millis() as u64,
            "endpoint responded"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| DeliveryError::Response(e.to_string()))?;
        Ok(Delivery::from_body(&value))
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn deliver(&self, uri: &str) -> std::result::Result<Delivery, DeliveryError> {
        let start = Instant::now();
        let result = self.submit(uri).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        metrics::delivery_duration_ms().record(duration_ms, &[]);
        metrics::delivery_attempts().add(
            1,
            &[KeyValue::new(
                "result",
                if result.is_ok() { "ok" } else { "error" },
            )],
        );
        if let Ok(ref delivery) = result {
            info!(label = delivery.label_or_dash(), duration_ms, "delivered");
        }
        result
    }
}
