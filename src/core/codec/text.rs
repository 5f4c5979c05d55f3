//! Streaming text decoding

use encoding_rs::{Decoder, DecoderResult, Encoding, GBK, UTF_8};
use serde::{Deserialize, Serialize};

/// Text encoding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8 encoding
    #[default]
    Utf8,
    /// GBK (simplified Chinese)
    Gbk,
}

impl TextEncoding {
    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Utf8 => UTF_8,
            Self::Gbk => GBK,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        self.encoding().name()
    }

    /// Encode outbound text
    pub fn encode(self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding().encode(text);
        bytes.into_owned()
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = super::CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "utf8" => Ok(Self::Utf8),
            "gbk" | "gb2312" => Ok(Self::Gbk),
            other => Err(super::CodecError::InvalidFormat(format!("unknown encoding: {other}"))),
        }
    }
}

/// Decoder that keeps partial multi-byte characters between chunks
pub struct StreamingTextDecoder {
    encoding: TextEncoding,
    inner: Decoder,
}

impl StreamingTextDecoder {
    /// Create a decoder for the given encoding
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            inner: encoding.encoding().new_decoder_without_bom_handling(),
        }
    }

    /// Active encoding
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Forget any partial character
    pub fn reset(&mut self) {
        self.inner = self.encoding.encoding().new_decoder_without_bom_handling();
    }

    /// Decode a chunk. Returns the text and the number of malformed sequences
    /// that were replaced with U+FFFD.
    pub fn decode(&mut self, data: &[u8]) -> (String, usize) {
        let capacity = self
            .inner
            .max_utf8_buffer_length_without_replacement(data.len())
            .unwrap_or(data.len() * 3 + 4);
        let mut output = String::with_capacity(capacity);
        let mut replaced = 0;
        let mut consumed = 0;

        loop {
            let (result, read) = self.inner.decode_to_string_without_replacement(
                &data[consumed..],
                &mut output,
                false,
            );
            consumed += read;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => {
                    output.reserve((data.len() - consumed) * 3 + 8);
                }
                DecoderResult::Malformed(_, _) => {
                    replaced += 1;
                    output.push(char::REPLACEMENT_CHARACTER);
                }
            }
        }

        (output, replaced)
    }
}
