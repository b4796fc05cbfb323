//! Certificate serial numbers as OpenSSL stores them: unbounded big-endian
//! integers written as uppercase hex.

use std::fmt;
use std::str::FromStr;

use crate::error::CaKitError;

/// A non-negative serial number of any length.
///
/// Stored big-endian without leading zero bytes; zero is an empty vector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(Vec<u8>);

impl Serial {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Serial(bytes[first..].to_vec())
    }

    /// Minimal big-endian bytes, with a single zero byte for zero.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        if self.0.is_empty() {
            vec![0]
        } else {
            self.0.clone()
        }
    }

    /// A random 128-bit serial with the top bit cleared, as `-create_serial` does.
    pub fn random() -> Self {
        let mut bytes: [u8; 16] = rand::random();
        bytes[0] &= 0x7f;
        Serial::from_be_bytes(&bytes)
    }

    /// The following serial.
    pub fn next(&self) -> Self {
        let mut bytes = self.0.clone();
        for byte in bytes.iter_mut().rev() {
            let (sum, overflow) = byte.overflowing_add(1);
            *byte = sum;
            if !overflow {
                return Serial(bytes);
            }
        }
        bytes.insert(0, 1);
        Serial(bytes)
    }

    /// Uppercase hex with an even number of digits, as in OpenSSL's serial file.
    pub fn to_hex(&self) -> String {
        self.to_be_bytes()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect()
    }
}

impl From<u64> for Serial {
    fn from(value: u64) -> Self {
        Serial::from_be_bytes(&value.to_be_bytes())
    }
}

impl FromStr for Serial {
    type Err = CaKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CaKitError::InvalidInput(format!(
                "serial '{s}' is not a hex number"
            )));
        }
        // Odd-length hex gets an implicit leading zero.
        let padded = if s.len() % 2 == 1 {
            format!("0{s}")
        } else {
            s.to_string()
        };
        let bytes = (0..padded.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&padded[i..i + 2], 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CaKitError::InvalidInput(format!("serial '{s}': {e}")))?;
        Ok(Serial::from_be_bytes(&bytes))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
