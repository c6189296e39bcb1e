//! Identifier and code derivations for the passwordless flow.
//!
//! Encodings follow the transport contract: device ids travel as standard
//! base64, device id hashes and link codes as base64url (both padded), and
//! the link code hash — standard base64 of SHA-256 over the raw HMAC bytes —
//! never leaves the server.

use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::models::Code;

type HmacSha256 = Hmac<Sha256>;

// The alphabetic set drops characters that are easy to confuse when read
// back from a screen or spoken aloud (o, O, 0, I, l); the numeric set drops
// the zero for the same reason.
const USER_INPUT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz";
const USER_INPUT_CODE_DIGITS: &[u8] = b"123456789";
const USER_INPUT_CODE_LENGTH: usize = 6;

const DEVICE_ID_LENGTH: usize = 32;

/// Fresh random device id bytes.
#[must_use]
pub fn generate_device_id_bytes() -> [u8; DEVICE_ID_LENGTH] {
    let mut bytes = [0u8; DEVICE_ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Transport form of a device id: standard base64.
#[must_use]
pub fn encode_device_id(device_id_bytes: &[u8]) -> String {
    STANDARD.encode(device_id_bytes)
}

/// Decode a caller-provided device id back to raw bytes.
///
/// # Errors
/// Returns an error if the input is not valid standard base64.
pub fn decode_device_id(device_id: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(device_id)
        .context("device id is not valid base64")
}

/// Storage identity of a device: base64url of SHA-256 over the raw id bytes.
#[must_use]
pub fn device_id_hash(device_id_bytes: &[u8]) -> String {
    URL_SAFE.encode(Sha256::digest(device_id_bytes))
}

/// Generate a 6-character user input code.
///
/// Each position flips a fair coin between the alphabetic and numeric sets,
/// but never allows more than two alphabetic characters in a row; the run
/// cap keeps the generator from spelling anything unfortunate. The coin is
/// fair, so individual letters are less likely than individual digits (the
/// sets differ in size), but the distribution inside each set is uniform.
#[must_use]
pub fn generate_user_input_code() -> String {
    let mut rng = OsRng;
    let mut code = String::with_capacity(USER_INPUT_CODE_LENGTH);
    let mut alpha_run = 0usize;
    for position in 0..USER_INPUT_CODE_LENGTH {
        if (position < 2 || alpha_run < 2) && rng.gen_bool(0.5) {
            alpha_run += 1;
            let index = rng.gen_range(0..USER_INPUT_CODE_ALPHABET.len());
            code.push(char::from(USER_INPUT_CODE_ALPHABET[index]));
        } else {
            alpha_run = 0;
            let index = rng.gen_range(0..USER_INPUT_CODE_DIGITS.len());
            code.push(char::from(USER_INPUT_CODE_DIGITS[index]));
        }
    }
    code
}

/// Raw link code: HMAC-SHA256 keyed by the device id bytes over the UTF-8
/// bytes of the user input code. A pure function of its inputs, which is
/// what lets input-code consumption reconstruct the stored lookup key.
#[must_use]
pub fn link_code_bytes(device_id_bytes: &[u8], user_input_code: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(device_id_bytes)
        .expect("hmac-sha256 accepts keys of any length");
    mac.update(user_input_code.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Transport form of a link code: base64url.
#[must_use]
pub fn encode_link_code(link_code_bytes: &[u8]) -> String {
    URL_SAFE.encode(link_code_bytes)
}

/// Decode a caller-provided link code back to the raw HMAC bytes.
///
/// # Errors
/// Returns an error if the input is not valid base64url.
pub fn decode_link_code(link_code: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(link_code)
        .context("link code is not valid base64url")
}

/// Storage lookup key for a code: standard base64 of SHA-256 over the raw
/// link code bytes. Server-side only.
#[must_use]
pub fn link_code_hash(link_code_bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(link_code_bytes))
}

/// A full derivation for one issued code: the persistable [`Code`] row plus
/// the transport values handed back to the caller.
#[derive(Debug, Clone)]
pub struct CodeBundle {
    pub code: Code,
    pub device_id: String,
    pub user_input_code: String,
    pub link_code: String,
}

impl CodeBundle {
    /// Derive a bundle for a brand new random device.
    #[must_use]
    pub fn generate(user_input_code: Option<&str>) -> Self {
        let device_id_bytes = generate_device_id_bytes();
        Self::for_device_bytes(&device_id_bytes, user_input_code)
    }

    /// Derive a bundle for an existing device, generating the input code if
    /// the caller did not pin one.
    #[must_use]
    pub fn for_device_bytes(device_id_bytes: &[u8], user_input_code: Option<&str>) -> Self {
        let user_input_code =
            user_input_code.map_or_else(generate_user_input_code, str::to_string);
        let raw_link_code = link_code_bytes(device_id_bytes, &user_input_code);

        let code = Code {
            code_id: Uuid::new_v4(),
            device_id_hash: device_id_hash(device_id_bytes),
            link_code_hash: link_code_hash(&raw_link_code),
            created_at: Utc::now(),
        };

        Self {
            code,
            device_id: encode_device_id(device_id_bytes),
            user_input_code,
            link_code: encode_link_code(&raw_link_code),
        }
    }
}
