//! Stream cipher used to protect upstream play URLs, plus the hex codec that
//! carries ciphertext over the wire.

use std::fmt;

use hex::FromHexError;

use crate::error::DecodeFailure;

const STATE_LEN: usize = 256;

/// Key bytes for the play-URL cipher. Fixed for the life of the process.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct CipherKey(Box<[u8]>);

impl CipherKey {
    pub(crate) fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into_boxed_slice())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKey({} bytes)", self.0.len())
    }
}

/// Hex digits of either case, two per byte.
pub(crate) fn hex_to_bytes(text: &str) -> Result<Vec<u8>, DecodeFailure> {
    hex::decode(text).map_err(|err| match err {
        FromHexError::InvalidHexCharacter { index, .. } => DecodeFailure::InvalidDigit(index),
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            DecodeFailure::OddLength(text.len())
        }
    })
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

fn schedule(key: &[u8]) -> [u8; STATE_LEN] {
    let mut state: [u8; STATE_LEN] = std::array::from_fn(|idx| idx as u8);
    let mut j = 0u8;
    for i in 0..STATE_LEN {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }
    state
}

/// XORs `data` against the keystream derived from `key`.
///
/// The transform is its own inverse: applying it twice with the same key
/// returns the input. A key that differs from the one used to encrypt does not
/// fail, it just yields different bytes.
pub(crate) fn apply_keystream(data: &[u8], key: &CipherKey) -> Result<Vec<u8>, DecodeFailure> {
    let key = key.as_bytes();
    if key.is_empty() {
        return Err(DecodeFailure::EmptyKey);
    }

    let mut state = schedule(key);
    let (mut i, mut j) = (0u8, 0u8);
    let out = data
        .iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            let k = state[state[i as usize].wrapping_add(state[j as usize]) as usize];
            byte ^ k
        })
        .collect();
    Ok(out)
}

pub(crate) fn decode(ciphertext_hex: &str, key: &CipherKey) -> Result<Vec<u8>, DecodeFailure> {
    // Key is checked first so an empty key is reported even for empty input.
    if key.as_bytes().is_empty() {
        return Err(DecodeFailure::EmptyKey);
    }
    let ciphertext = hex_to_bytes(ciphertext_hex)?;
    apply_keystream(&ciphertext, key)
}

pub(crate) fn encode(plaintext: &[u8], key: &CipherKey) -> Result<String, DecodeFailure> {
    apply_keystream(plaintext, key).map(|bytes| bytes_to_hex(&bytes))
}

/// One char per byte (U+0000..=U+00FF). Upstream URLs are produced that way;
/// decoding as UTF-8 would mangle any byte above 0x7f.
pub(crate) fn bytes_to_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}
