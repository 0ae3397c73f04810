//! Signed webhook publisher.
//!
//! Each outbox event is POSTed as the marshalled envelope, signed with
//! HMAC-SHA256 so the receiver can verify authenticity. Non-2xx responses
//! are publish failures; the dispatcher's retry/dead-letter policy decides
//! what happens next.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use docledger_core::event::EventEnvelope;
use docledger_core::ports::EventPublisher;
use docledger_core::Error;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const TOPIC_HEADER: &str = "X-Dbapi-Topic";
pub const EVENT_TYPE_HEADER: &str = "X-Dbapi-Event-Type";
pub const TENANT_HEADER: &str = "X-Dbapi-Tenant";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub struct WebhookPublisher {
    url: String,
    secret: Vec<u8>,
    client: reqwest::blocking::Client,
}

impl WebhookPublisher {
    /// A zero timeout falls back to 10 s.
    pub fn new(url: &str, secret: &str, timeout: Duration) -> anyhow::Result<Self> {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            secret: secret.as_bytes().to_vec(),
            client,
        })
    }

    /// Lowercase hex HMAC-SHA256 of the request body.
    fn sign(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.finalize()
            .into_bytes()
            .iter()
            .fold(String::with_capacity(64), |mut out, byte| {
                use std::fmt::Write as _;
                let _ = write!(out, "{byte:02x}");
                out
            })
    }
}

impl EventPublisher for WebhookPublisher {
    fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), Error> {
        let body = serde_json::to_vec(event)
            .map_err(|err| Error::Publish(format!("marshal event: {err}")))?;
        let signature = self.sign(&body);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(TOPIC_HEADER, topic)
            .header(EVENT_TYPE_HEADER, &event.event_type)
            .header(TENANT_HEADER, &event.tenant_id)
            .header(SIGNATURE_HEADER, format!("sha256={signature}"))
            .body(body)
            .send()
            .map_err(|err| Error::Publish(format!("send webhook: {err}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(Error::Publish(format!("webhook returned status {status}")));
        }
        Ok(())
    }
}
