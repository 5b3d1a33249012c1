// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! The decoded form of a delivery handed to worker business logic. Payloads on the wire
//! are canonical UTF-8 JSON records; the envelope decodes them once, at the dispatch
//! boundary, and exposes both the raw value and a typed view. The core validates
//! nothing beyond decodability — per-stage schema checks are each worker's concern.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded delivery: JSON payload plus its delivery context.
#[derive(Debug, Clone)]
pub struct Envelope {
    payload: Value,
    exchange: String,
    routing_key: String,
    redelivered: bool,
}

impl Envelope {
    /// Decodes a raw payload into an envelope. Fails when the bytes are not a JSON
    /// document; the dispatch boundary converts that into a rejection.
    pub fn decode(
        data: &[u8],
        exchange: &str,
        routing_key: &str,
        redelivered: bool,
    ) -> Result<Envelope, serde_json::Error> {
        Ok(Envelope {
            payload: serde_json::from_slice(data)?,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            redelivered,
        })
    }

    /// The decoded payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserializes the payload into a stage-specific record type.
    pub fn record<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// The `project` identifier every pipeline record carries.
    pub fn project(&self) -> Option<&str> {
        self.payload.get("project").and_then(Value::as_str)
    }

    /// The exchange the message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The routing key the message was published with, i.e. the stage name.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Whether the broker delivered this message before. Redelivery is routine under
    /// at-least-once semantics; workers use it together with their own completed-work
    /// checks, not as an error signal.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }
}
