//! NATS message consumer for incoming customer records

use crate::types::customer::CustomerRecord;
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving customer records from NATS
pub struct RecordConsumer {
    client: Client,
    subject: String,
}

impl RecordConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the record subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to customer record subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a message payload. Accepts a record object or a one-row list.
pub fn decode_record(payload: &[u8]) -> Result<CustomerRecord> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).context("Payload is not valid JSON")?;
    CustomerRecord::from_selection(value).context("Payload is not a customer record")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_record_shapes() {
        let single = decode_record(br#"{"Name": "Ana", "age": 30}"#).unwrap();
        assert_eq!(single.number("age"), Some(30.0));

        let list = decode_record(br#"[{"Name": "Ana", "housing": ""}]"#).unwrap();
        assert!(list.get("housing").unwrap().is_null());

        assert!(decode_record(b"not json").is_err());
        assert!(decode_record(b"42").is_err());
        assert!(decode_record(b"[]").is_err());
    }
}
