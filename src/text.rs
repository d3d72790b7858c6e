//! Text encodings for in-image strings.

use encoding_rs::{DecoderResult, Encoding, SHIFT_JIS, UTF_8, WINDOWS_1252};

use crate::error::{DolError, Result};

/// Encodings found in game executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Ascii,
    Utf8,
    ShiftJis,
    Windows1252,
}

/// Where decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeFailure {
    /// Byte index of the first invalid byte, relative to the string start.
    pub position: usize,
    /// Virtual address of that byte.
    pub address: u32,
}

/// Result of a string read that may have stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedString {
    /// Everything decoded before the failure, or the whole string.
    pub text: String,
    pub failure: Option<DecodeFailure>,
    pub encoding: TextEncoding,
}

impl DecodedString {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Turns a partial decode into a [`DolError::Decode`].
    pub fn into_result(self) -> Result<String> {
        match self.failure {
            None => Ok(self.text),
            Some(failure) => Err(DolError::Decode {
                position: failure.position,
                address: failure.address,
                encoding: self.encoding.name(),
            }),
        }
    }
}

impl TextEncoding {
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "ascii",
            other => other.encoding().name(),
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::Ascii | TextEncoding::Utf8 => UTF_8,
            TextEncoding::ShiftJis => SHIFT_JIS,
            TextEncoding::Windows1252 => WINDOWS_1252,
        }
    }

    /// Decodes `bytes`, returning the valid prefix and the byte index of the
    /// first malformed sequence, if any.
    pub fn decode(self, bytes: &[u8]) -> (String, Option<usize>) {
        if self == TextEncoding::Ascii {
            let valid = bytes.iter().position(|b| !b.is_ascii());
            let end = valid.unwrap_or(bytes.len());
            let text = bytes[..end].iter().map(|&b| b as char).collect();
            return (text, valid);
        }

        let mut decoder = self.encoding().new_decoder_without_bom_handling();
        let capacity = decoder
            .max_utf8_buffer_length_without_replacement(bytes.len())
            .unwrap_or(bytes.len() * 3);
        let mut text = String::with_capacity(capacity);
        let (result, read) = decoder.decode_to_string_without_replacement(bytes, &mut text, true);
        match result {
            DecoderResult::InputEmpty => (text, None),
            DecoderResult::Malformed(bad, extra) => {
                let position = read - bad as usize - extra as usize;
                (text, Some(position))
            }
            // Capacity is the decoder's own worst case.
            DecoderResult::OutputFull => (text, Some(read)),
        }
    }

    /// Encodes `text`. Fails on the first character the encoding cannot
    /// represent.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        let unencodable = |position| DolError::Unencodable {
            position,
            encoding: self.name(),
        };
        match self {
            TextEncoding::Ascii => match text.chars().position(|c| !c.is_ascii()) {
                Some(position) => Err(unencodable(position)),
                None => Ok(text.as_bytes().to_vec()),
            },
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            _ => {
                let (bytes, _, had_errors) = self.encoding().encode(text);
                if had_errors {
                    let position = text
                        .chars()
                        .position(|c| {
                            let mut buf = [0u8; 4];
                            self.encoding().encode(c.encode_utf8(&mut buf)).2
                        })
                        .unwrap_or(0);
                    return Err(unencodable(position));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_stops_at_high_byte() {
        let (text, failure) = TextEncoding::Ascii.decode(b"mar\xC3io");
        assert_eq!(text, "mar");
        assert_eq!(failure, Some(3));
    }

    #[test]
    fn utf8_reports_first_bad_byte() {
        let (text, failure) = TextEncoding::Utf8.decode("é!".as_bytes());
        assert_eq!((text.as_str(), failure), ("é!", None));

        let (text, failure) = TextEncoding::Utf8.decode(b"ab\xFFcd");
        assert_eq!(text, "ab");
        assert_eq!(failure, Some(2));
    }

    #[test]
    fn shift_jis_round_trip() {
        let bytes = TextEncoding::ShiftJis.encode("マリオ").unwrap();
        assert_eq!(bytes, [0x83, 0x7D, 0x83, 0x8A, 0x83, 0x49]);
        let (text, failure) = TextEncoding::ShiftJis.decode(&bytes);
        assert_eq!(text, "マリオ");
        assert!(failure.is_none());
    }

    #[test]
    fn truncated_multibyte_sequence_fails() {
        let (text, failure) = TextEncoding::ShiftJis.decode(&[b'a', 0x83]);
        assert_eq!(text, "a");
        assert_eq!(failure, Some(1));
    }

    #[test]
    fn unencodable_character_position() {
        let err = TextEncoding::Ascii.encode("abé").unwrap_err();
        assert!(matches!(err, DolError::Unencodable { position: 2, .. }));
        let err = TextEncoding::Windows1252.encode("aマ").unwrap_err();
        assert!(matches!(err, DolError::Unencodable { position: 1, .. }));
    }
}
