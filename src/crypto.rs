//! Cryptographic primitives shared by the session-key envelope and the
//! record encryptor: PKCS#7 padding, salt/key derivation over
//! Curve25519, public-key decoding and the BLAKE2b-keyed Poly1305 MAC
//! construction.

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac512, Digest};
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::montgomery::MontgomeryPoint;
use poly1305::universal_hash::KeyInit as _;
use rand::rngs::OsRng;
use rand::RngCore;
use snafu::Snafu;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of session keys and derived key-encryption keys, in bytes.
pub const KEY_LEN: usize = 32;

/// Length of salts and initialization vectors, in bytes.
pub const SALT_LEN: usize = 16;

/// Length of a Poly1305 authentication tag, in bytes.
pub const TAG_LEN: usize = 16;

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Snafu)]
pub enum CryptoError {
    #[snafu(display("invalid blocksize"))]
    InvalidBlockSize,
    #[snafu(display("invalid PKCS7 data (empty or not padded)"))]
    InvalidPkcs7Data,
    #[snafu(display("invalid padding on input"))]
    InvalidPkcs7Padding,
    #[snafu(display("invalid public key length/format"))]
    InvalidPubKeyFormat,
    #[snafu(display("key derivation failed: {}", source))]
    KeyDerivation { source: argon2::Error },
}

/// PKCS#7 pads `data` to a multiple of `blocksize`.
///
/// Empty input is rejected; a full block of padding is appended when
/// the input is already block-aligned.
pub fn pad(data: &[u8], blocksize: usize) -> Result<Vec<u8>, CryptoError> {
    if blocksize == 0 || blocksize > 255 {
        return Err(CryptoError::InvalidBlockSize);
    }
    if data.is_empty() {
        return Err(CryptoError::InvalidPkcs7Data);
    }
    let n = blocksize - (data.len() % blocksize);
    let mut padded = Vec::with_capacity(data.len() + n);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(n as u8).take(n));
    Ok(padded)
}

/// Removes PKCS#7 padding, verifying every padding byte.
pub fn unpad(data: &[u8], blocksize: usize) -> Result<&[u8], CryptoError> {
    if blocksize == 0 || blocksize > 255 {
        return Err(CryptoError::InvalidBlockSize);
    }
    if data.is_empty() {
        return Err(CryptoError::InvalidPkcs7Data);
    }
    if data.len() % blocksize != 0 {
        return Err(CryptoError::InvalidPkcs7Padding);
    }
    let n = data[data.len() - 1] as usize;
    if n == 0 || n > data.len() {
        return Err(CryptoError::InvalidPkcs7Padding);
    }
    if data[data.len() - n..].iter().any(|&b| b as usize != n) {
        return Err(CryptoError::InvalidPkcs7Padding);
    }
    Ok(&data[..data.len() - n])
}

/// A recipient public key, decoded from its Ed25519 encoding and
/// mapped to Curve25519 for ECDH.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(MontgomeryPoint);

impl PublicKey {
    /// Decodes a hex-encoded 32-byte Ed25519 public key and converts
    /// it to its Curve25519 form via the birational map. Rejects
    /// encodings that are not a canonical curve point and points of
    /// small order.
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(input.trim().to_lowercase())
            .map_err(|_| CryptoError::InvalidPubKeyFormat)?;
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidPubKeyFormat);
        }
        let point = CompressedEdwardsY::from_slice(&bytes)
            .map_err(|_| CryptoError::InvalidPubKeyFormat)?
            .decompress()
            .ok_or(CryptoError::InvalidPubKeyFormat)?;
        if point.is_small_order() {
            return Err(CryptoError::InvalidPubKeyFormat);
        }
        Ok(PublicKey(point.to_montgomery()))
    }

    /// The Curve25519 u-coordinate bytes of the key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }
}

/// An ephemeral Curve25519 secret. Zeroized on drop.
pub struct EphemeralSecret(Zeroizing<[u8; KEY_LEN]>);

impl EphemeralSecret {
    /// Generates a fresh secret and returns it together with the
    /// corresponding Curve25519 public key bytes.
    pub fn generate() -> (Self, [u8; KEY_LEN]) {
        let mut scalar = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *scalar);
        let public = MontgomeryPoint::mul_base_clamped(*scalar);
        (EphemeralSecret(scalar), public.to_bytes())
    }

    /// X25519 shared secret with `peer`.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; KEY_LEN] {
        peer.0.mul_clamped(*self.0).to_bytes()
    }
}

/// Derives a key-specific 128 bit salt by hashing a public key with a
/// common salt, so that the same encryption performed with multiple
/// keys uses distinct IVs.
pub fn keyed_salt(public_key: &PublicKey, salt: &[u8]) -> [u8; SALT_LEN] {
    let derived = blake2::Blake2b512::new()
        .chain_update(public_key.as_bytes())
        .chain_update(salt)
        .finalize();
    let mut out = [0u8; SALT_LEN];
    out.copy_from_slice(&derived[..SALT_LEN]);
    out
}

/// Stretches an X25519 shared secret into 256 bit key material.
///
/// The Argon2id salt is a keyed BLAKE2b-512 of the recipient public
/// key and the common salt, keyed with the recipient public key
/// itself.
pub fn session_kdf(
    shared_secret: &[u8; KEY_LEN],
    recipient: &PublicKey,
    salt: &[u8],
) -> Result<[u8; KEY_LEN], CryptoError> {
    let derived = <Blake2bMac512 as blake2::digest::KeyInit>::new_from_slice(recipient.as_bytes())
        .expect("32 bytes is a valid blake2b key length")
        .chain_update(recipient.as_bytes())
        .chain_update(salt)
        .finalize()
        .into_bytes();

    let params = argon2::Params::new(64 * 1024, 1, 4, Some(KEY_LEN))
        .map_err(|source| CryptoError::KeyDerivation { source })?;
    let argon = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(shared_secret, &derived, &mut key)
        .map_err(|source| CryptoError::KeyDerivation { source })?;
    Ok(key)
}

/// Derives the key-encryption key for one recipient from an ephemeral
/// secret: ECDH followed by the session KDF.
pub fn derive_key(
    secret: &EphemeralSecret,
    recipient: &PublicKey,
    salt: &[u8],
) -> Result<[u8; KEY_LEN], CryptoError> {
    let shared = Zeroizing::new(secret.diffie_hellman(recipient));
    session_kdf(&shared, recipient, salt)
}

/// Unkeyed BLAKE2b-256.
pub fn blake2b256(data: &[u8]) -> [u8; KEY_LEN] {
    Blake2b256::new().chain_update(data).finalize().into()
}

/// Poly1305 tag over the concatenation of `parts`, keyed with the
/// BLAKE2b-256 of `key_field`. The one-time key is bound to a single
/// canonical message field so that receivers can re-derive it from the
/// data as stored.
pub fn authenticate(key_field: &[u8], parts: &[&[u8]]) -> [u8; TAG_LEN] {
    let key = blake2b256(key_field);
    let mut message = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        message.extend_from_slice(part);
    }
    let tag = poly1305::Poly1305::new(poly1305::Key::from_slice(&key))
        .compute_unpadded(&message);
    tag.into()
}

/// Constant-time verification counterpart of [`authenticate`].
pub fn verify(key_field: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    if tag.len() != TAG_LEN {
        return false;
    }
    let expected = authenticate(key_field, parts);
    expected[..].ct_eq(tag).into()
}
