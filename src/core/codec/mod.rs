//! Frame decoder: raw bytes to display units
//!
//! Supports different display modes:
//! - Text (UTF-8 / GBK, streaming-safe across chunk boundaries)
//! - Hexadecimal
//! - Decimal
//! - RGB swatches (one unit per byte triple)

mod hex;
mod rgb;
mod text;

pub use self::hex::{format_decimal, format_hex, parse_hex_payload};
pub use rgb::{Rgb, RgbRemainder};
pub use text::{StreamingTextDecoder, TextEncoding};

use serde::{Deserialize, Serialize};

/// Display mode applied to incoming bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Decode through the active text encoding
    #[default]
    Text,
    /// Uppercase two-digit hex, space separated
    Hex,
    /// Decimal byte values, space separated
    Decimal,
    /// One color swatch per byte triple
    Rgb,
}

impl std::str::FromStr for DisplayMode {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "ascii" => Ok(Self::Text),
            "hex" => Ok(Self::Hex),
            "dec" | "decimal" => Ok(Self::Decimal),
            "rgb" => Ok(Self::Rgb),
            other => Err(CodecError::InvalidFormat(format!("unknown display mode: {other}"))),
        }
    }
}

/// Kind of a decoded unit / log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Received from the device
    Rx,
    /// Sent by the user or a macro
    Tx,
    /// Status and error notices
    System,
    /// Sent by an auto-reply rule
    Auto,
    /// Notices from the demo producer
    Sim,
}

impl EntryType {
    /// Short tag used in text renderings
    pub fn tag(self) -> &'static str {
        match self {
            Self::Rx => "RX",
            Self::Tx => "TX",
            Self::System => "SYS",
            Self::Auto => "AUTO",
            Self::Sim => "SIM",
        }
    }
}

/// A single decoded display unit
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUnit {
    /// Rendered text
    pub text: String,
    /// Unit kind
    pub entry_type: EntryType,
    /// Rendered as bytes (hex/decimal/rgb) rather than text
    pub is_hex_mode: bool,
    /// Produced by the demo producer instead of hardware
    pub simulated: bool,
    /// Color for RGB swatch units
    pub swatch: Option<Rgb>,
}

impl DecodedUnit {
    /// Create a received unit
    pub fn rx(text: impl Into<String>, is_hex_mode: bool) -> Self {
        Self {
            text: text.into(),
            entry_type: EntryType::Rx,
            is_hex_mode,
            simulated: false,
            swatch: None,
        }
    }

    /// Is this unit eligible for telemetry, highlights and auto-replies
    pub fn is_rx_text(&self) -> bool {
        self.entry_type == EntryType::Rx && !self.is_hex_mode
    }
}

/// Result of decoding one chunk
#[derive(Debug, Clone, Default)]
pub struct DecodeOutput {
    /// Units in byte order
    pub units: Vec<DecodedUnit>,
    /// Non-fatal problem found while decoding
    pub warning: Option<CodecError>,
}

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Invalid input format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid character
    #[error("Invalid character at position {0}: {1}")]
    InvalidCharacter(usize, char),

    /// Bytes that the active encoding cannot represent
    #[error("{0} undecodable byte sequence(s) replaced ({1})")]
    Undecodable(usize, &'static str),
}

/// Stateful per-session decoder
///
/// Only text mode and RGB carry mode keep state between calls; everything
/// else is a pure transform of the chunk.
pub struct FrameDecoder {
    mode: DisplayMode,
    text: StreamingTextDecoder,
    rgb_policy: RgbRemainder,
    rgb_pending: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder
    pub fn new(mode: DisplayMode, encoding: TextEncoding) -> Self {
        Self {
            mode,
            text: StreamingTextDecoder::new(encoding),
            rgb_policy: RgbRemainder::default(),
            rgb_pending: Vec::new(),
        }
    }

    /// Active display mode
    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Active text encoding
    pub fn encoding(&self) -> TextEncoding {
        self.text.encoding()
    }

    /// Switch display mode. Carried partial state is dropped.
    pub fn set_mode(&mut self, mode: DisplayMode) {
        if mode != self.mode {
            self.mode = mode;
            self.reset();
        }
    }

    /// Switch text encoding. Carried partial state is dropped.
    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.text = StreamingTextDecoder::new(encoding);
    }

    /// Set what happens to trailing bytes in RGB mode
    pub fn set_rgb_remainder(&mut self, policy: RgbRemainder) {
        self.rgb_policy = policy;
        self.rgb_pending.clear();
    }

    /// Drop all carried state
    pub fn reset(&mut self) {
        self.text.reset();
        self.rgb_pending.clear();
    }

    /// Decode one chunk in the current mode
    pub fn decode(&mut self, data: &[u8]) -> DecodeOutput {
        match self.mode {
            DisplayMode::Text => {
                let (text, replaced) = self.text.decode(data);
                let warning = (replaced > 0)
                    .then(|| CodecError::Undecodable(replaced, self.text.encoding().name()));
                let units = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![DecodedUnit::rx(text, false)]
                };
                DecodeOutput { units, warning }
            }
            DisplayMode::Hex => Self::single(format_hex(data)),
            DisplayMode::Decimal => Self::single(format_decimal(data)),
            DisplayMode::Rgb => {
                let units = rgb::decode(data, self.rgb_policy, &mut self.rgb_pending)
                    .into_iter()
                    .map(|color| DecodedUnit {
                        swatch: Some(color),
                        ..DecodedUnit::rx(color.to_string(), true)
                    })
                    .collect();
                DecodeOutput { units, warning: None }
            }
        }
    }

    fn single(text: String) -> DecodeOutput {
        if text.is_empty() {
            return DecodeOutput::default();
        }
        DecodeOutput {
            units: vec![DecodedUnit::rx(text, true)],
            warning: None,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DisplayMode::Text, TextEncoding::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_mode_flags_unit() {
        let mut decoder = FrameDecoder::new(DisplayMode::Hex, TextEncoding::Utf8);
        let out = decoder.decode(b"Hi\n");
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].text, "48 69 0A");
        assert!(out.units[0].is_hex_mode);
    }

    #[test]
    fn test_decimal_mode() {
        let mut decoder = FrameDecoder::new(DisplayMode::Decimal, TextEncoding::Utf8);
        let out = decoder.decode(&[0, 7, 255]);
        assert_eq!(out.units[0].text, "0 7 255");
    }

    #[test]
    fn test_text_split_multibyte_across_chunks() {
        let mut decoder = FrameDecoder::default();
        let bytes = "温度".as_bytes();
        let first = decoder.decode(&bytes[..2]);
        assert!(first.units.is_empty());
        assert!(first.warning.is_none());
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(second.units[0].text, "温度");
    }

    #[test]
    fn test_rgb_truncates_by_default() {
        let mut decoder = FrameDecoder::new(DisplayMode::Rgb, TextEncoding::Utf8);
        let out = decoder.decode(&[255, 0, 0, 0, 255]);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].swatch, Some(Rgb::new(255, 0, 0)));
        let next = decoder.decode(&[0, 0, 255]);
        assert_eq!(next.units[0].swatch, Some(Rgb::new(0, 0, 255)));
    }

    #[test]
    fn test_mode_switch_drops_partial_text() {
        let mut decoder = FrameDecoder::default();
        let bytes = "é".as_bytes();
        decoder.decode(&bytes[..1]);
        decoder.set_mode(DisplayMode::Hex);
        decoder.set_mode(DisplayMode::Text);
        let out = decoder.decode(b"ok");
        assert_eq!(out.units[0].text, "ok");
    }

    #[test]
    fn test_invalid_bytes_are_replaced_not_fatal() {
        let mut decoder = FrameDecoder::default();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out.units[0].text, "a\u{FFFD}b");
        assert!(matches!(out.warning, Some(CodecError::Undecodable(1, _))));
    }

    #[test]
    fn test_parse_display_mode() {
        assert_eq!("HEX".parse::<DisplayMode>().unwrap(), DisplayMode::Hex);
        assert!("bogus".parse::<DisplayMode>().is_err());
    }
}
