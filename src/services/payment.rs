//! Payment notification decoding
//!
//! Payment providers deliver notifications either as JSON or as a url-encoded
//! form. The body is decoded into a JSON value first and then handed to the
//! configured [`PayloadAdapter`], which extracts a [`PaymentEvent`].

use crate::{mac_address::MacAddress, services::grant_store::MAX_GRANT_DURATION};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

/// Notification layouts understood by the webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `{id, status, external_reference: {mac, duration}}` where the reference
    /// may also be a JSON encoded string
    ExternalReference,
    /// `{id, status, mac_address, duration}`
    Flat,
}

impl PayloadFormat {
    pub fn adapter(self) -> Box<dyn PayloadAdapter> {
        match self {
            PayloadFormat::ExternalReference => Box::new(ExternalReferenceAdapter),
            PayloadFormat::Flat => Box::new(FlatAdapter),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_reference" | "external-reference" => Ok(PayloadFormat::ExternalReference),
            "flat" => Ok(PayloadFormat::Flat),
            other => Err(format!(
                "unknown payload format {other:?}, expected external_reference or flat"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Approved,
    Created,
    Pending,
    Rejected,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "authorized" => PaymentStatus::Approved,
            "created" | "payment.created" => PaymentStatus::Created,
            "pending" | "in_process" => PaymentStatus::Pending,
            "rejected" | "cancelled" => PaymentStatus::Rejected,
            _ => PaymentStatus::Other(raw.to_string()),
        }
    }

    pub fn triggers_grant(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Created)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Approved => f.write_str("approved"),
            PaymentStatus::Created => f.write_str("created"),
            PaymentStatus::Pending => f.write_str("pending"),
            PaymentStatus::Rejected => f.write_str("rejected"),
            PaymentStatus::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GrantRequest {
    pub mac: MacAddress,
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentEvent {
    pub notification_id: String,
    pub status: PaymentStatus,
    pub grant: GrantRequest,
}

impl PaymentEvent {
    /// Key under which a delivery is remembered by the notification ledger
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.notification_id, self.status)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("empty notification")]
    Empty,
    #[error("notification is not an object")]
    NotAnObject,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
    #[error("malformed body: {0}")]
    Malformed(String),
}

impl PayloadError {
    /// Message returned to the payment provider
    pub fn user_message(&self) -> &'static str {
        match self {
            PayloadError::Empty => "Nenhum dado enviado",
            PayloadError::UnsupportedContentType(_) => "Tipo de conteúdo não suportado",
            _ => "Dados incompletos na notificação",
        }
    }
}

/// Decode a notification body according to its content type
///
/// Form fields become string members of a JSON object, so adapters only deal
/// with one representation.
pub fn decode_body(content_type: &str, body: &[u8]) -> Result<Value, PayloadError> {
    let value = match content_type {
        "application/json" => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Err(PayloadError::Empty);
            }
            serde_json::from_slice::<Value>(body)
                .map_err(|e| PayloadError::Malformed(e.to_string()))?
        }
        "application/x-www-form-urlencoded" => {
            let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
                .map_err(|e| PayloadError::Malformed(e.to_string()))?;
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        other => return Err(PayloadError::UnsupportedContentType(other.to_string())),
    };

    match &value {
        Value::Null => Err(PayloadError::Empty),
        Value::Object(map) if map.is_empty() => Err(PayloadError::Empty),
        Value::Object(_) => Ok(value),
        _ => Err(PayloadError::NotAnObject),
    }
}

/// Extracts a payment event from a decoded notification
pub trait PayloadAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, payload: &Value) -> Result<PaymentEvent, PayloadError>;
}

pub struct ExternalReferenceAdapter;

impl PayloadAdapter for ExternalReferenceAdapter {
    fn name(&self) -> &'static str {
        "external_reference"
    }

    fn extract(&self, payload: &Value) -> Result<PaymentEvent, PayloadError> {
        let (notification_id, status) = id_and_status(payload)?;

        let reference = match field(payload, &["external_reference"]) {
            Some(Value::String(encoded)) => {
                serde_json::from_str::<Value>(encoded).map_err(|e| {
                    PayloadError::InvalidField {
                        field: "external_reference",
                        reason: e.to_string(),
                    }
                })?
            }
            Some(object @ Value::Object(_)) => object.clone(),
            Some(_) => {
                return Err(PayloadError::InvalidField {
                    field: "external_reference",
                    reason: "expected an object or a JSON encoded string".to_string(),
                });
            }
            None => return Err(PayloadError::MissingField("external_reference")),
        };

        Ok(PaymentEvent {
            notification_id,
            status,
            grant: grant_request(&reference)?,
        })
    }
}

pub struct FlatAdapter;

impl PayloadAdapter for FlatAdapter {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn extract(&self, payload: &Value) -> Result<PaymentEvent, PayloadError> {
        let (notification_id, status) = id_and_status(payload)?;

        Ok(PaymentEvent {
            notification_id,
            status,
            grant: grant_request(payload)?,
        })
    }
}

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| value.get(name))
        .filter(|v| !v.is_null())
}

fn id_and_status(payload: &Value) -> Result<(String, PaymentStatus), PayloadError> {
    let id = match field(payload, &["id"]).or_else(|| payload.pointer("/data/id")) {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        Some(_) => {
            return Err(PayloadError::InvalidField {
                field: "id",
                reason: "expected a string or a number".to_string(),
            });
        }
        None => return Err(PayloadError::MissingField("id")),
    };

    let status = match field(payload, &["status", "action"]) {
        Some(Value::String(status)) if !status.trim().is_empty() => PaymentStatus::parse(status),
        Some(_) => {
            return Err(PayloadError::InvalidField {
                field: "status",
                reason: "expected a non empty string".to_string(),
            });
        }
        None => return Err(PayloadError::MissingField("status")),
    };

    Ok((id, status))
}

fn grant_request(value: &Value) -> Result<GrantRequest, PayloadError> {
    let mac = match field(value, &["mac", "mac_address"]) {
        Some(Value::String(raw)) => {
            raw.parse::<MacAddress>()
                .map_err(|reason| PayloadError::InvalidField {
                    field: "mac",
                    reason,
                })?
        }
        Some(_) => {
            return Err(PayloadError::InvalidField {
                field: "mac",
                reason: "expected a string".to_string(),
            });
        }
        None => return Err(PayloadError::MissingField("mac")),
    };

    let seconds = match field(value, &["duration"]) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
        None => return Err(PayloadError::MissingField("duration")),
    }
    .filter(|secs| (1..=MAX_GRANT_DURATION.as_secs()).contains(secs))
    .ok_or_else(|| PayloadError::InvalidField {
        field: "duration",
        reason: format!(
            "expected a positive integer up to {}",
            MAX_GRANT_DURATION.as_secs()
        ),
    })?;

    Ok(GrantRequest {
        mac,
        duration: Duration::from_secs(seconds),
    })
}
