use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::crypto;

/// The per-worker session-key envelope. The raw fields carry the
/// working state during construction; [`Key::serialize`] moves them
/// into the exported base64 fields that make up the wire record.
///
/// `decryption_slot_map` is fixed at 0: all recipient slots are
/// wrapped, in configuration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "keyID")]
    pub id: String,
    #[serde(skip)]
    pub slot_map: u16,
    #[serde(skip)]
    pub value: Vec<u8>,
    #[serde(skip)]
    pub salt: Vec<u8>,
    #[serde(skip)]
    pub public_key: Vec<u8>,
    #[serde(rename = "decryptionSlotMap")]
    pub export_slot_map: u64,
    #[serde(rename = "encryptedKey")]
    pub export_value: String,
    #[serde(rename = "salt")]
    pub export_salt: String,
    #[serde(rename = "publicPeerKey")]
    pub export_public_key: String,
    #[serde(rename = "signature")]
    pub export_signature: String,
}

impl Key {
    /// Encodes the raw working fields into their exported
    /// representation and clears them.
    pub fn serialize(&mut self) {
        self.export_slot_map = u64::from(self.slot_map);
        self.slot_map = 0;

        self.export_value = BASE64.encode(&self.value);
        self.value.clear();

        self.export_salt = BASE64.encode(&self.salt);
        self.salt.clear();

        self.export_public_key = BASE64.encode(&self.public_key);
        self.public_key.clear();
    }

    /// Computes the Poly1305 signature over the exported fields.
    pub fn calculate_mac(&mut self) {
        let slot = self.export_slot_map.to_le_bytes();
        let tag = crypto::authenticate(
            self.export_value.as_bytes(),
            &[
                self.export_value.as_bytes(),
                self.export_salt.as_bytes(),
                self.export_public_key.as_bytes(),
                &slot,
            ],
        );
        self.export_signature = BASE64.encode(tag);
    }

    /// Recomputes the signature over the exported fields and compares
    /// it with the contained one.
    pub fn verify_mac(&self) -> bool {
        let tag = match BASE64.decode(&self.export_signature) {
            Ok(tag) => tag,
            Err(_) => return false,
        };
        let slot = self.export_slot_map.to_le_bytes();
        crypto::verify(
            self.export_value.as_bytes(),
            &[
                self.export_value.as_bytes(),
                self.export_salt.as_bytes(),
                self.export_public_key.as_bytes(),
                &slot,
            ],
            &tag,
        )
    }
}
