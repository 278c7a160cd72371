//! Webhook transport — one POST per lifecycle event.
//!
//! When a secret is configured, the JSON body is signed GitHub-style with
//! `X-Belfry-Signature-256: sha256=<hex(hmac_sha256(secret, body))>` so
//! receivers can authenticate the payload.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use belfry_core::config::WebhookConfig;
use belfry_core::event::JobEvent;

use crate::error::NotifyError;
use crate::notifier::Notifier;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Belfry-Signature-256";

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: config.url.clone(),
            secret: config.secret.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(event)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json");
        if let Some(ref secret) = self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body));
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// `sha256=<hex>` over the raw body — the format the receiver verifies.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_prefixed() {
        let a = sign_payload("secret", b"{\"job_id\":\"x\"}");
        let b = sign_payload("secret", b"{\"job_id\":\"x\"}");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
        // 32-byte digest → 64 hex chars.
        assert_eq!(a.len(), "sha256=".len() + 64);
    }

    #[test]
    fn signature_varies_with_secret_and_body() {
        let base = sign_payload("secret", b"payload");
        assert_ne!(base, sign_payload("other", b"payload"));
        assert_ne!(base, sign_payload("secret", b"payload2"));
    }
}
