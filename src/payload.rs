//! Decoding of the client-supplied `X-Payment` header into a [`PaymentPayload`].
//!
//! Wallet SDKs disagree on the base64 alphabet they emit: some send standard
//! base64, others URL-safe base64 with the padding stripped. The codec accepts
//! both. Decoding is pure and deterministic; every failure maps to one tag of
//! the decode taxonomy, which the 402 rejection carries back to the client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;

use crate::types::PaymentPayload;

/// Fields that must be present for a JSON object to count as an x402 payload.
const REQUIRED_FIELDS: [&str; 4] = ["x402Version", "scheme", "network", "payload"];

/// Errors produced while decoding a payment header.
///
/// All variants are recoverable: each one becomes a 402 rejection carrying
/// the variant's [`code`](PaymentHeaderError::code).
#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderError {
    /// The header was present but empty or whitespace-only.
    #[error("Payment header is empty")]
    EmptyPayload,
    /// Neither standard nor URL-safe base64 decoding succeeded.
    #[error("Payment header is not valid base64")]
    InvalidBase64Encoding,
    /// The decoded bytes are not valid JSON.
    #[error("Payment header does not decode to valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The decoded JSON is not an object, or its values do not fit the payload schema.
    #[error("Payment header decodes to a malformed payload object")]
    InvalidPayloadFormat,
    /// The decoded object is missing one of the fields an x402 payload requires.
    #[error("Payment header is not an x402 payload: missing `{missing}`")]
    NotX402Payload { missing: &'static str },
}

impl PaymentHeaderError {
    /// Stable machine-readable tag for this decode failure.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentHeaderError::EmptyPayload => "EMPTY_PAYLOAD",
            PaymentHeaderError::InvalidBase64Encoding => "INVALID_BASE64_ENCODING",
            PaymentHeaderError::InvalidJson(_) => "INVALID_JSON",
            PaymentHeaderError::InvalidPayloadFormat => "INVALID_PAYLOAD_FORMAT",
            PaymentHeaderError::NotX402Payload { .. } => "NOT_X402_PAYLOAD",
        }
    }
}

/// Decodes a raw `X-Payment` header value into a [`PaymentPayload`].
pub fn decode_payment_header(raw: &str) -> Result<PaymentPayload, PaymentHeaderError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PaymentHeaderError::EmptyPayload);
    }

    let bytes = decode_base64_lenient(trimmed).ok_or(PaymentHeaderError::InvalidBase64Encoding)?;

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(PaymentHeaderError::InvalidJson)?;

    let object = value
        .as_object()
        .ok_or(PaymentHeaderError::InvalidPayloadFormat)?;

    for field in REQUIRED_FIELDS {
        if !object.contains_key(field) {
            return Err(PaymentHeaderError::NotX402Payload { missing: field });
        }
    }

    // The envelope named the right fields, so this is an x402 payload; values
    // that fail the typed parse are a format problem, not a protocol mismatch.
    serde_json::from_value(value).map_err(|_| PaymentHeaderError::InvalidPayloadFormat)
}

/// Attempts standard base64 first, then URL-safe input normalized to the
/// standard alphabet and re-padded to a multiple of four.
fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    if let Ok(bytes) = b64.decode(input) {
        return Some(bytes);
    }
    let mut normalized = input.replace('-', "+").replace('_', "/");
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    b64.decode(&normalized).ok()
}
