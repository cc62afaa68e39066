use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::crypto;

/// The sensitive fields of a record, captured before pseudonymization.
/// This is what gets encrypted into [`EncryptedRecord::value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plaintext {
    #[serde(rename = "RecordID")]
    pub record_id: String,
    #[serde(rename = "SrcAddress")]
    pub src_address: String,
    #[serde(rename = "DstAddress")]
    pub dst_address: String,
}

/// The published encrypted original. `record_id` matches the
/// pseudonymized record it belongs to; the salt doubles as the CBC
/// initialization vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    #[serde(rename = "RecordID")]
    pub record_id: String,
    #[serde(rename = "keyID")]
    pub session_key_id: String,
    #[serde(rename = "salt")]
    pub salt: String,
    #[serde(rename = "signature")]
    pub signature: String,
    #[serde(rename = "value")]
    pub value: String,
}

impl EncryptedRecord {
    // The MAC covers the base64 encoded fields instead of the raw
    // bytes, so that receiver verification works directly on the data
    // as received.
    fn mac_parts(&self) -> [&[u8]; 4] {
        [
            self.record_id.as_bytes(),
            self.session_key_id.as_bytes(),
            self.salt.as_bytes(),
            self.value.as_bytes(),
        ]
    }

    /// Computes the Poly1305 signature over the serialized fields.
    pub fn calculate_mac(&mut self) {
        let tag = crypto::authenticate(self.value.as_bytes(), &self.mac_parts());
        self.signature = BASE64.encode(tag);
    }

    /// Recomputes the signature and compares it with the stored one.
    pub fn verify_mac(&self) -> bool {
        match BASE64.decode(&self.signature) {
            Ok(tag) => crypto::verify(self.value.as_bytes(), &self.mac_parts(), &tag),
            Err(_) => false,
        }
    }
}
