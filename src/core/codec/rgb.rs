//! RGB swatch decoding

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single color swatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

impl Rgb {
    /// Create from components
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Handling of the 1-2 bytes left over when a chunk is not a multiple of 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RgbRemainder {
    /// Drop the trailing bytes (lossy)
    #[default]
    Truncate,
    /// Prepend the trailing bytes to the next chunk
    Carry,
}

pub(super) fn decode(data: &[u8], policy: RgbRemainder, pending: &mut Vec<u8>) -> Vec<Rgb> {
    let joined;
    let input = if pending.is_empty() {
        data
    } else {
        let mut buf = std::mem::take(pending);
        buf.extend_from_slice(data);
        joined = buf;
        &joined[..]
    };

    let chunks = input.chunks_exact(3);
    let rest = chunks.remainder();
    if policy == RgbRemainder::Carry {
        pending.extend_from_slice(rest);
    } else if !rest.is_empty() {
        tracing::trace!(dropped = rest.len(), "RGB remainder truncated");
    }

    chunks.map(|c| Rgb::new(c[0], c[1], c[2])).collect()
}
