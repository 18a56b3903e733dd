//! # trella-encoding
//!
//! Byte-order and Base64 helpers shared by the wire codec, the
//! credential store, and the HTTP authentication headers.
//!
//! ## Modules
//!
//! - [`base64`] — Base64 with line wrapping and a lenient decoder
//! - [`bytes`] — fixed-width big/little-endian field packing

pub mod base64;
pub mod bytes;
