//! # Payloads
//!
//! The payload structure, its privacy modes, and the codec that turns it
//! into bytes and derives recipient views.

pub mod codec;
pub mod types;

pub use codec::{BincodePayloadEncoder, PayloadEncoder, PayloadError};
pub use types::{EncodedPayload, PrivacyMode};
