//! Program identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Length of a program identity in bytes.
pub const PROGRAM_ID_LEN: usize = 32;

/// Fixed-size identity of a stored program.
///
/// Displayed and parsed as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramId([u8; PROGRAM_ID_LEN]);

impl ProgramId {
    /// Wrap raw identity bytes.
    pub const fn new(bytes: [u8; PROGRAM_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random identity.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Borrow the identity bytes.
    pub fn as_bytes(&self) -> &[u8; PROGRAM_ID_LEN] {
        &self.0
    }

    /// Hex encoding of the identity.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl TryFrom<&[u8]> for ProgramId {
    type Error = RuntimeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; PROGRAM_ID_LEN] = bytes.try_into().map_err(|_| {
            RuntimeError::invalid_argument(format!(
                "program id must be {PROGRAM_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl FromStr for ProgramId {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramId({})", self.to_hex())
    }
}

/// Lowercase hex encoding.
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Decode hex, accepting an optional `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, RuntimeError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return Err(RuntimeError::invalid_argument(
            "hex string has an odd number of digits",
        ));
    }

    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| RuntimeError::invalid_argument(format!("invalid hex at offset {i}")))
        })
        .collect()
}
