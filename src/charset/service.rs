//! Charset conversion service.
//!
//! The bridge never converts text itself; it asks a [`CharsetService`] for
//! code pages and converters. [`BuiltinCharsets`] covers the encodings most
//! providers speak: UTF-8, UTF-16LE, Windows-1252, ISO-8859-1 and US-ASCII.

use std::fmt;
use std::rc::Rc;

/// Numeric charset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePage(pub u32);

impl CodePage {
    pub const UTF16: CodePage = CodePage(1200);
    pub const WINDOWS_1252: CodePage = CodePage(1252);
    pub const US_ASCII: CodePage = CodePage(20127);
    pub const ISO_8859_1: CodePage = CodePage(28591);
    pub const UTF8: CodePage = CodePage(65001);
}

impl fmt::Display for CodePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one converter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertStatus {
    /// All input was consumed.
    Complete,
    /// Destination ran out of room; call again with more space.
    OutputFull,
    /// Input ends inside a character; feed more input.
    Incomplete,
    /// Input holds a byte sequence the source charset does not allow.
    Invalid,
}

/// Progress reported by [`CharsetConverter::convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertStep {
    pub consumed: usize,
    pub produced: usize,
    pub status: ConvertStatus,
}

/// A converter between two fixed code pages.
pub trait CharsetConverter {
    /// Convert as much of `src` into `dst` as fits.
    fn convert(&self, src: &[u8], dst: &mut [u8]) -> ConvertStep;

    /// Source and target code pages.
    fn code_pages(&self) -> (CodePage, CodePage);
}

/// Code page lookup and converter construction.
pub trait CharsetService {
    /// Resolve a charset name.
    fn code_page(&self, name: &str) -> Option<CodePage>;

    /// Build a converter, `None` when the pairing is not supported.
    fn create_converter(&self, from: CodePage, to: CodePage) -> Option<Rc<dyn CharsetConverter>>;

    /// Length of the longest prefix of `bytes` made of complete characters.
    fn valid_prefix_len(&self, code_page: CodePage, bytes: &[u8]) -> usize;
}

/// Charsets implemented without any platform service.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCharsets;

impl CharsetService for BuiltinCharsets {
    fn code_page(&self, name: &str) -> Option<CodePage> {
        let cp = match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => CodePage::UTF8,
            "utf-16" | "utf16" | "utf-16le" | "unicode" => CodePage::UTF16,
            "windows-1252" | "cp1252" | "1252" => CodePage::WINDOWS_1252,
            "iso-8859-1" | "latin1" | "l1" => CodePage::ISO_8859_1,
            "us-ascii" | "ascii" => CodePage::US_ASCII,
            _ => return None,
        };
        Some(cp)
    }

    fn create_converter(&self, from: CodePage, to: CodePage) -> Option<Rc<dyn CharsetConverter>> {
        let converter = BuiltinConverter {
            from: Codec::from_code_page(from)?,
            to: Codec::from_code_page(to)?,
            pages: (from, to),
        };
        Some(Rc::new(converter))
    }

    fn valid_prefix_len(&self, code_page: CodePage, bytes: &[u8]) -> usize {
        let Some(codec) = Codec::from_code_page(code_page) else {
            return bytes.len();
        };
        let mut pos = 0;
        while pos < bytes.len() {
            match codec.decode(&bytes[pos..]) {
                Decoded::Char(_, len) => pos += len,
                Decoded::Incomplete | Decoded::Invalid => break,
            }
        }
        pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Utf8,
    Utf16Le,
    Windows1252,
    Latin1,
    Ascii,
}

enum Decoded {
    Char(char, usize),
    Incomplete,
    Invalid,
}

// 0x80..=0x9F; bytes undefined in the code page map to their C1 control.
const WINDOWS_1252_HIGH: [u16; 32] = [
    0x20AC, 0x0081, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160,
    0x2039, 0x0152, 0x008D, 0x017D, 0x008F, 0x0090, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022,
    0x2013, 0x2014, 0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x009D, 0x017E, 0x0178,
];

const REPLACEMENT: u8 = b'?';

impl Codec {
    fn from_code_page(cp: CodePage) -> Option<Codec> {
        match cp {
            CodePage::UTF8 => Some(Codec::Utf8),
            CodePage::UTF16 => Some(Codec::Utf16Le),
            CodePage::WINDOWS_1252 => Some(Codec::Windows1252),
            CodePage::ISO_8859_1 => Some(Codec::Latin1),
            CodePage::US_ASCII => Some(Codec::Ascii),
            _ => None,
        }
    }

    fn decode(self, src: &[u8]) -> Decoded {
        let Some(&lead) = src.first() else {
            return Decoded::Incomplete;
        };
        match self {
            Codec::Utf8 => {
                let len = match lead {
                    0x00..=0x7F => 1,
                    0xC2..=0xDF => 2,
                    0xE0..=0xEF => 3,
                    0xF0..=0xF4 => 4,
                    _ => return Decoded::Invalid,
                };
                if src.len() < len {
                    return Decoded::Incomplete;
                }
                match std::str::from_utf8(&src[..len]).ok().and_then(|s| s.chars().next()) {
                    Some(ch) => Decoded::Char(ch, len),
                    None => Decoded::Invalid,
                }
            }
            Codec::Utf16Le => {
                if src.len() < 2 {
                    return Decoded::Incomplete;
                }
                let unit = u16::from_le_bytes([src[0], src[1]]);
                match unit {
                    0xD800..=0xDBFF => {
                        if src.len() < 4 {
                            return Decoded::Incomplete;
                        }
                        let low = u16::from_le_bytes([src[2], src[3]]);
                        if !(0xDC00..=0xDFFF).contains(&low) {
                            return Decoded::Invalid;
                        }
                        let code = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                        match char::from_u32(code) {
                            Some(ch) => Decoded::Char(ch, 4),
                            None => Decoded::Invalid,
                        }
                    }
                    0xDC00..=0xDFFF => Decoded::Invalid,
                    _ => match char::from_u32(unit as u32) {
                        Some(ch) => Decoded::Char(ch, 2),
                        None => Decoded::Invalid,
                    },
                }
            }
            Codec::Windows1252 => {
                let code = match lead {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(lead - 0x80) as usize] as u32,
                    _ => lead as u32,
                };
                match char::from_u32(code) {
                    Some(ch) => Decoded::Char(ch, 1),
                    None => Decoded::Invalid,
                }
            }
            Codec::Latin1 => Decoded::Char(lead as char, 1),
            Codec::Ascii => {
                if lead < 0x80 {
                    Decoded::Char(lead as char, 1)
                } else {
                    Decoded::Invalid
                }
            }
        }
    }

    /// Encode one character; unmappable characters become `?`.
    fn encode(self, ch: char, dst: &mut [u8]) -> Option<usize> {
        let mut scratch = [0u8; 4];
        let encoded: &[u8] = match self {
            Codec::Utf8 => ch.encode_utf8(&mut scratch).as_bytes(),
            Codec::Utf16Le => {
                let mut units = [0u16; 2];
                let units = ch.encode_utf16(&mut units);
                for (i, unit) in units.iter().enumerate() {
                    scratch[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
                }
                &scratch[..units.len() * 2]
            }
            Codec::Windows1252 => {
                let code = ch as u32;
                scratch[0] = if code < 0x80 || (0xA0..=0xFF).contains(&code) {
                    code as u8
                } else {
                    WINDOWS_1252_HIGH
                        .iter()
                        .position(|&mapped| mapped as u32 == code)
                        .map(|i| 0x80 + i as u8)
                        .unwrap_or(REPLACEMENT)
                };
                &scratch[..1]
            }
            Codec::Latin1 => {
                scratch[0] = u8::try_from(ch as u32).unwrap_or(REPLACEMENT);
                &scratch[..1]
            }
            Codec::Ascii => {
                scratch[0] = if ch.is_ascii() { ch as u8 } else { REPLACEMENT };
                &scratch[..1]
            }
        };
        if dst.len() < encoded.len() {
            return None;
        }
        dst[..encoded.len()].copy_from_slice(encoded);
        Some(encoded.len())
    }
}

struct BuiltinConverter {
    from: Codec,
    to: Codec,
    pages: (CodePage, CodePage),
}

impl CharsetConverter for BuiltinConverter {
    fn convert(&self, src: &[u8], dst: &mut [u8]) -> ConvertStep {
        let mut consumed = 0;
        let mut produced = 0;
        let status = loop {
            if consumed == src.len() {
                break ConvertStatus::Complete;
            }
            let (ch, len) = match self.from.decode(&src[consumed..]) {
                Decoded::Char(ch, len) => (ch, len),
                Decoded::Incomplete => break ConvertStatus::Incomplete,
                Decoded::Invalid => break ConvertStatus::Invalid,
            };
            match self.to.encode(ch, &mut dst[produced..]) {
                Some(written) => {
                    consumed += len;
                    produced += written;
                }
                None => break ConvertStatus::OutputFull,
            }
        };
        ConvertStep {
            consumed,
            produced,
            status,
        }
    }

    fn code_pages(&self) -> (CodePage, CodePage) {
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_all(from: CodePage, to: CodePage, src: &[u8]) -> Vec<u8> {
        let converter = BuiltinCharsets.create_converter(from, to).unwrap();
        let mut dst = vec![0u8; src.len() * 4 + 4];
        let step = converter.convert(src, &mut dst);
        assert_eq!(step.status, ConvertStatus::Complete);
        dst.truncate(step.produced);
        dst
    }

    #[test]
    fn test_code_page_names() {
        assert_eq!(BuiltinCharsets.code_page("UTF-8"), Some(CodePage::UTF8));
        assert_eq!(BuiltinCharsets.code_page("utf16"), Some(CodePage::UTF16));
        assert_eq!(BuiltinCharsets.code_page("windows-1252"), Some(CodePage::WINDOWS_1252));
        assert_eq!(BuiltinCharsets.code_page("klingon"), None);
    }

    #[test]
    fn test_windows_1252_to_utf8() {
        let out = convert_all(CodePage::WINDOWS_1252, CodePage::UTF8, b"caf\xE9 \x80");
        assert_eq!(out, "café €".as_bytes());
    }

    #[test]
    fn test_utf8_to_utf16() {
        let out = convert_all(CodePage::UTF8, CodePage::UTF16, "a€😀".as_bytes());
        let expected: Vec<u8> = "a€😀".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_unmappable_becomes_question_mark() {
        let out = convert_all(CodePage::UTF8, CodePage::ISO_8859_1, "€1".as_bytes());
        assert_eq!(out, b"?1");
    }

    #[test]
    fn test_output_full_and_incomplete() {
        let converter = BuiltinCharsets
            .create_converter(CodePage::UTF8, CodePage::UTF16)
            .unwrap();
        let mut dst = [0u8; 3];
        let step = converter.convert(b"abc", &mut dst);
        assert_eq!(step.status, ConvertStatus::OutputFull);
        assert_eq!((step.consumed, step.produced), (1, 2));

        let mut dst = [0u8; 16];
        let step = converter.convert(&"é".as_bytes()[..1], &mut dst);
        assert_eq!(step.status, ConvertStatus::Incomplete);
        assert_eq!(step.consumed, 0);
    }

    #[test]
    fn test_valid_prefix_len() {
        let text = "aé€".as_bytes();
        assert_eq!(BuiltinCharsets.valid_prefix_len(CodePage::UTF8, &text[..2]), 1);
        assert_eq!(BuiltinCharsets.valid_prefix_len(CodePage::UTF8, &text[..3]), 3);
        assert_eq!(BuiltinCharsets.valid_prefix_len(CodePage::UTF8, &text[..5]), 3);
        assert_eq!(BuiltinCharsets.valid_prefix_len(CodePage::WINDOWS_1252, b"abc"), 3);
    }
}
