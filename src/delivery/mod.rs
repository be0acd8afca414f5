//! Delivery client seam.
//!
//! A delivery takes one local image reference and either confirms the
//! remote service accepted it or fails. Every failure is retryable: the
//! executor never inspects the variant to decide whether to drop an item.

pub mod http;
pub mod prepare;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpDeliveryClient;
pub use prepare::ImagePrep;

/// Response fields that may carry the classification label, in lookup order.
const LABEL_FIELDS: [&str; 3] = ["classificacao", "label", "classification"];

/// What the remote service said about a delivered image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    /// Classification label assigned server-side, when the service sent one.
    pub label: Option<String>,
}

impl Delivery {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    /// Read a 2xx JSON response body. Any JSON value counts as accepted;
    /// the label is informational only.
    pub fn from_body(body: &serde_json::Value) -> Self {
        let label = LABEL_FIELDS
            .iter()
            .find_map(|field| body.get(*field))
            .and_then(|value| value.as_str())
            .map(str::to_string);
        Self { label }
    }

    /// Label for logs, `-` when absent.
    pub fn label_or_dash(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unsupported image reference: {0}")]
    InvalidUri(String),

    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot prepare image: {0}")]
    Image(#[from] image::ImageError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Response(String),

    #[error("delivery aborted: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Deliver the image at `uri`. Atomic from the caller's point of view.
    async fn deliver(&self, uri: &str) -> Result<Delivery, DeliveryError>;
}
