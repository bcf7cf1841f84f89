//! # RSA Public Key Reconstruction
//!
//! Turns the `n`/`e` fields of an RSA JWK into a PEM-encoded X.509
//! `SubjectPublicKeyInfo` and loads it into a [`DecodingKey`].
//!
//! ## Encoding
//! ```text
//! SubjectPublicKeyInfo ::= SEQUENCE {
//!     algorithm  SEQUENCE { OID 1.2.840.113549.1.1.1, NULL },
//!     publicKey  BIT STRING {                -- 0 unused bits
//!         RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }
//!     }
//! }
//! ```

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::DecodingKey;

use crate::error::KeyParseError;
use crate::jwks::{Jwk, KeyId};

const TAG_INTEGER: u8 = 0x02;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_SEQUENCE: u8 = 0x30;

/// `SEQUENCE { OID rsaEncryption, NULL }`
const RSA_ALGORITHM_IDENTIFIER: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

const PEM_LINE_WIDTH: usize = 64;

/// A verified-usable RSA public key. Immutable once constructed.
#[derive(Clone)]
pub struct PublicKey {
    decoding: DecodingKey,
    pem: String,
}

impl PublicKey {
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// The PEM (`-----BEGIN PUBLIC KEY-----`) form of the key.
    pub fn pem(&self) -> &str {
        &self.pem
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").finish_non_exhaustive()
    }
}

/// Reconstructed keys for one JWKS document, in document order.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<(KeyId, PublicKey)>,
}

impl KeySet {
    pub fn new(keys: Vec<(KeyId, PublicKey)>) -> Self {
        Self { keys }
    }

    /// Looks a key up by its `kid`.
    pub fn find(&self, kid: &str) -> Option<&PublicKey> {
        self.keys
            .iter()
            .find(|(id, _)| id.kid() == Some(kid))
            .map(|(_, key)| key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyId, &PublicKey)> {
        self.keys.iter().map(|(id, key)| (id, key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Builds a [`PublicKey`] from an RSA JWK.
///
/// # Errors
///
/// - [`KeyParseError::PrivateKey`] if `d` is present, whatever else the key holds
/// - [`KeyParseError::UnsupportedKeyType`] unless `kty` is `RSA`
/// - [`KeyParseError::MissingComponent`] if `n` or `e` is absent
/// - [`KeyParseError::Base64`] / [`KeyParseError::InvalidKey`] for bad components
pub fn reconstruct(jwk: &Jwk) -> Result<PublicKey, KeyParseError> {
    if jwk.d.is_some() {
        return Err(KeyParseError::PrivateKey);
    }
    if jwk.kty != "RSA" {
        return Err(KeyParseError::UnsupportedKeyType(jwk.kty.clone()));
    }

    let n = jwk.n.as_deref().ok_or(KeyParseError::MissingComponent("n"))?;
    let e = jwk.e.as_deref().ok_or(KeyParseError::MissingComponent("e"))?;
    let modulus = decode_component("n", n)?;
    let exponent = decode_component("e", e)?;

    let pem = rsa_public_key_pem(&modulus, &exponent);
    let decoding = DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|err| KeyParseError::InvalidKey(err.to_string()))?;

    Ok(PublicKey { decoding, pem })
}

fn decode_component(component: &'static str, value: &str) -> Result<Vec<u8>, KeyParseError> {
    // Some issuers pad their base64url; the unpadded engine rejects that.
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|err| KeyParseError::Base64 {
            component,
            reason: err.to_string(),
        })?;

    if bytes.iter().all(|b| *b == 0) {
        return Err(KeyParseError::InvalidKey(format!(
            "component `{component}` is zero"
        )));
    }
    Ok(bytes)
}

/// PEM-encoded `SubjectPublicKeyInfo` for the given big-endian modulus and
/// exponent.
pub fn rsa_public_key_pem(modulus: &[u8], exponent: &[u8]) -> String {
    let der = subject_public_key_info(modulus, exponent);
    let body = general_purpose::STANDARD.encode(der);

    let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN PUBLIC KEY-----\n");
    for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.extend(line.iter().map(|b| char::from(*b)));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

/// DER-encoded `SubjectPublicKeyInfo`.
pub fn subject_public_key_info(modulus: &[u8], exponent: &[u8]) -> Vec<u8> {
    let mut rsa_public_key = encode_integer(modulus);
    rsa_public_key.extend(encode_integer(exponent));
    let rsa_public_key = encode_tlv(TAG_SEQUENCE, &rsa_public_key);

    let mut bit_string = Vec::with_capacity(rsa_public_key.len() + 1);
    bit_string.push(0x00);
    bit_string.extend(rsa_public_key);

    let mut spki = RSA_ALGORITHM_IDENTIFIER.to_vec();
    spki.extend(encode_tlv(TAG_BIT_STRING, &bit_string));
    encode_tlv(TAG_SEQUENCE, &spki)
}

/// Unsigned big-endian bytes as a minimal DER INTEGER.
pub(crate) fn encode_integer(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let trimmed = &bytes[first..];

    let mut content = Vec::with_capacity(trimmed.len() + 1);
    match trimmed.first() {
        None => content.push(0x00),
        // Keep the value positive in two's complement.
        Some(b) if b & 0x80 != 0 => content.push(0x00),
        Some(_) => {}
    }
    content.extend_from_slice(trimmed);
    encode_tlv(TAG_INTEGER, &content)
}

fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    encode_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

/// Short form below 128, otherwise `0x80 | n` followed by `n` length bytes.
pub(crate) fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}
