//! PEM import and export of identity certificates.

use trella_encoding::base64;
use trella_identity::Identity;

use crate::{Result, StoreError};

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// 48 plaintext bytes per line yields the canonical 64-character
/// PEM body lines.
const BYTES_PER_LINE: usize = 48;

/// Encode an identity's certificate as a PEM block.
pub fn export_pem(identity: &Identity) -> Result<String> {
    let der = identity.cert_der()?;
    Ok(format!("{BEGIN}\n{}\n{END}\n", base64::encode(&der, BYTES_PER_LINE)))
}

/// Parse the first certificate PEM block in `text`.
pub fn import_pem(text: &str) -> Result<Identity> {
    let start = text
        .find(BEGIN)
        .ok_or_else(|| StoreError::Malformed("missing PEM header".into()))?
        + BEGIN.len();
    let end = text[start..]
        .find(END)
        .ok_or_else(|| StoreError::Malformed("missing PEM footer".into()))?
        + start;
    let der = base64::decode_str(&text[start..end]);
    Ok(Identity::from_der(&der)?)
}
