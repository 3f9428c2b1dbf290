//! Conversion context: charset settings and the converters derived from them.
//!
//! A context is shared by a connection, its statements and their columns and
//! parameters. Sharing is by reference count; changing an option on a shared
//! context first gives the caller a private copy, so the other holders keep
//! their settings.

mod service;

pub use service::{
    BuiltinCharsets, CharsetConverter, CharsetService, CodePage, ConvertStatus, ConvertStep,
};

use crate::error::{Error, Result};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// The five conversion paths a context maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller text to the provider's wide (UTF-16) form.
    InputToUnicode,
    /// Provider wide text to caller text.
    UnicodeToOutput,
    /// Query text to wide form; uses the query charset when one is set.
    InputToQuery,
    /// Caller text to the provider's narrow charset.
    InputToNarrow,
    /// Provider narrow text to caller text.
    NarrowToOutput,
}

impl Direction {
    pub const ALL: [Direction; 5] = [
        Direction::InputToUnicode,
        Direction::UnicodeToOutput,
        Direction::InputToQuery,
        Direction::InputToNarrow,
        Direction::NarrowToOutput,
    ];

    fn index(self) -> usize {
        match self {
            Direction::InputToUnicode => 0,
            Direction::UnicodeToOutput => 1,
            Direction::InputToQuery => 2,
            Direction::InputToNarrow => 3,
            Direction::NarrowToOutput => 4,
        }
    }
}

/// Charset options a context carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOption {
    /// Display charset of caller text.
    Encoding,
    /// Charset of query text, defaults to the display charset.
    QueryEncoding,
    /// Provider narrow ("varchar") charset, defaults to the display charset.
    NarrowEncoding,
}

#[derive(Clone)]
struct ConversionState {
    service: Rc<dyn CharsetService>,
    charset: Option<String>,
    query_charset: Option<String>,
    narrow_charset: Option<String>,
    converters: [Option<Rc<dyn CharsetConverter>>; 5],
}

/// Reference counted, copy-on-write charset configuration.
#[derive(Clone)]
pub struct ConversionContext {
    inner: Rc<ConversionState>,
}

impl fmt::Debug for ConversionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionContext")
            .field("charset", &self.inner.charset)
            .field("query_charset", &self.inner.query_charset)
            .field("narrow_charset", &self.inner.narrow_charset)
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl ConversionContext {
    /// Create a context with no charsets set; every direction passes through.
    pub fn new(service: Rc<dyn CharsetService>) -> Self {
        Self {
            inner: Rc::new(ConversionState {
                service,
                charset: None,
                query_charset: None,
                narrow_charset: None,
                converters: Default::default(),
            }),
        }
    }

    /// Create a context with a display charset.
    pub fn with_charset(service: Rc<dyn CharsetService>, charset: &str) -> Result<Self> {
        let mut ctx = Self::new(service);
        ctx.set_option(ConversionOption::Encoding, Some(charset))?;
        Ok(ctx)
    }

    /// Number of holders sharing this context.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Whether two handles point at the same context.
    pub fn ptr_eq(&self, other: &ConversionContext) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn clone_if_shared(&mut self) -> &mut ConversionState {
        Rc::make_mut(&mut self.inner)
    }

    pub fn service(&self) -> &Rc<dyn CharsetService> {
        &self.inner.service
    }

    pub fn charset(&self) -> Option<&str> {
        self.inner.charset.as_deref()
    }

    /// Effective value of an option, applying the display charset fallback.
    pub fn option(&self, option: ConversionOption) -> Option<&str> {
        let state = &self.inner;
        match option {
            ConversionOption::Encoding => state.charset.as_deref(),
            ConversionOption::QueryEncoding => {
                state.query_charset.as_deref().or(state.charset.as_deref())
            }
            ConversionOption::NarrowEncoding => {
                state.narrow_charset.as_deref().or(state.charset.as_deref())
            }
        }
    }

    /// Converter for a direction; `None` means bytes pass through unchanged.
    pub fn converter(&self, direction: Direction) -> Option<&Rc<dyn CharsetConverter>> {
        self.inner.converters[direction.index()].as_ref()
    }

    fn resolve(&self, name: Option<&str>) -> Result<Option<CodePage>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let cp = match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(CodePage::UTF8),
            "utf16" | "utf-16" => Some(CodePage::UTF16),
            _ => self.inner.service.code_page(name),
        };
        cp.map(Some)
            .ok_or_else(|| Error::conversion(format!("Unknown charset '{}'", name)))
    }

    fn build(
        &self,
        from: Option<CodePage>,
        to: Option<CodePage>,
    ) -> Result<Option<Rc<dyn CharsetConverter>>> {
        match (from, to) {
            (Some(from), Some(to)) if from != to => self
                .inner
                .service
                .create_converter(from, to)
                .map(Some)
                .ok_or_else(|| {
                    Error::conversion(format!("Cannot convert from code page {} to {}", from, to))
                }),
            _ => Ok(None),
        }
    }

    /// Change one charset option and rebuild the affected converters.
    ///
    /// An empty or absent value clears the option. On failure the context is
    /// left unchanged.
    pub fn set_option(&mut self, option: ConversionOption, value: Option<&str>) -> Result<()> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        let mut converters = self.inner.converters.clone();
        match option {
            ConversionOption::Encoding => {
                let cp = self.resolve(value)?;
                let narrow = self.resolve(self.inner.narrow_charset.as_deref())?;
                converters[Direction::InputToUnicode.index()] = self.build(cp, Some(CodePage::UTF16))?;
                converters[Direction::UnicodeToOutput.index()] = self.build(Some(CodePage::UTF16), cp)?;
                converters[Direction::InputToNarrow.index()] = self.build(cp, narrow)?;
                converters[Direction::NarrowToOutput.index()] = self.build(narrow, cp)?;
                if self.inner.query_charset.is_none() {
                    converters[Direction::InputToQuery.index()] =
                        converters[Direction::InputToUnicode.index()].clone();
                }
                let state = self.clone_if_shared();
                state.charset = value.map(str::to_owned);
                state.converters = converters;
            }
            ConversionOption::QueryEncoding => {
                converters[Direction::InputToQuery.index()] = match value {
                    Some(_) => self.build(self.resolve(value)?, Some(CodePage::UTF16))?,
                    None => converters[Direction::InputToUnicode.index()].clone(),
                };
                let state = self.clone_if_shared();
                state.query_charset = value.map(str::to_owned);
                state.converters = converters;
            }
            ConversionOption::NarrowEncoding => {
                let narrow = self.resolve(value)?;
                let cp = self.resolve(self.inner.charset.as_deref())?;
                converters[Direction::InputToNarrow.index()] = self.build(cp, narrow)?;
                converters[Direction::NarrowToOutput.index()] = self.build(narrow, cp)?;
                let state = self.clone_if_shared();
                state.narrow_charset = value.map(str::to_owned);
                state.converters = converters;
            }
        }
        trace!(?option, value, "conversion option set");
        Ok(())
    }

    /// Convert `text` along `direction`.
    ///
    /// Returns `Cow::Borrowed` with the input itself when no converter exists
    /// for the direction, `Cow::Owned` with freshly converted bytes otherwise.
    pub fn convert<'a>(&self, text: &'a [u8], direction: Direction) -> Result<Cow<'a, [u8]>> {
        let Some(converter) = self.converter(direction) else {
            trace!(?direction, len = text.len(), "no conversion performed");
            return Ok(Cow::Borrowed(text));
        };

        let mut out = vec![0u8; text.len() + text.len() / 2 + 16];
        let mut consumed = 0;
        let mut produced = 0;
        loop {
            let step = converter.convert(&text[consumed..], &mut out[produced..]);
            consumed += step.consumed;
            produced += step.produced;
            match step.status {
                ConvertStatus::Complete => break,
                ConvertStatus::OutputFull => {
                    let grown = out.len() * 2;
                    out.resize(grown, 0);
                }
                ConvertStatus::Incomplete => {
                    return Err(Error::conversion(format!(
                        "Text ends inside a character at byte {}",
                        consumed
                    )));
                }
                ConvertStatus::Invalid => {
                    return Err(Error::conversion(format!(
                        "Invalid byte sequence at byte {}",
                        consumed
                    )));
                }
            }
        }
        out.truncate(produced);
        Ok(Cow::Owned(out))
    }

    /// Convert caller text to UTF-16 code units.
    pub fn to_wide(&self, text: &[u8], direction: Direction) -> Result<Vec<u16>> {
        let bytes = self.convert(text, direction)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Convert UTF-16 code units to caller text.
    pub fn from_wide(&self, units: &[u16], direction: Direction) -> Result<Vec<u8>> {
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        Ok(self.convert(&bytes, direction)?.into_owned())
    }

    /// Largest length not above `max` that ends on a character boundary of
    /// the narrow charset (or the display charset when no narrow one is set).
    pub fn truncated_length(&self, text: &[u8], max: usize) -> usize {
        if text.len() <= max {
            return text.len();
        }
        let name = self.option(ConversionOption::NarrowEncoding);
        match self.resolve(name) {
            Ok(Some(cp)) => self.inner.service.valid_prefix_len(cp, &text[..max]),
            _ => max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> Rc<dyn CharsetService> {
        Rc::new(BuiltinCharsets)
    }

    #[test]
    fn test_same_charset_is_passthrough() {
        for name in ["utf-8", "windows-1252", "iso-8859-1", "us-ascii"] {
            let mut ctx = ConversionContext::with_charset(builtin(), name).unwrap();
            ctx.set_option(ConversionOption::NarrowEncoding, Some(name)).unwrap();
            let converted = ctx.convert(b"plain", Direction::InputToNarrow).unwrap();
            assert!(matches!(converted, Cow::Borrowed(_)), "{name}");
            let converted = ctx.convert(b"plain", Direction::NarrowToOutput).unwrap();
            assert!(matches!(converted, Cow::Borrowed(_)), "{name}");
        }
    }

    #[test]
    fn test_ascii_round_trip_between_charsets() {
        let names = ["utf-8", "utf-16", "windows-1252", "iso-8859-1", "us-ascii"];
        let ascii = "SELECT name, 42 FROM t WHERE x = 'y';";
        for a in names {
            let text: Vec<u8> = if a == "utf-16" {
                ascii.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
            } else {
                ascii.as_bytes().to_vec()
            };
            for b in names {
                if a == b {
                    continue;
                }
                let mut ctx = ConversionContext::with_charset(builtin(), a).unwrap();
                ctx.set_option(ConversionOption::NarrowEncoding, Some(b)).unwrap();
                let there = ctx.convert(&text, Direction::InputToNarrow).unwrap();
                assert!(matches!(there, Cow::Owned(_)), "{a} -> {b}");
                let back = ctx.convert(&there, Direction::NarrowToOutput).unwrap();
                assert_eq!(back.as_ref(), text.as_slice(), "{a} -> {b}");
            }
        }
    }

    #[test]
    fn test_copy_on_write_isolation() {
        let original = ConversionContext::with_charset(builtin(), "windows-1252").unwrap();
        let mut copy = original.clone();
        assert!(original.is_shared());
        assert!(copy.ptr_eq(&original));

        copy.set_option(ConversionOption::Encoding, Some("utf-8")).unwrap();
        assert!(!copy.ptr_eq(&original));
        assert_eq!(original.charset(), Some("windows-1252"));
        assert_eq!(copy.charset(), Some("utf-8"));
        assert_eq!(original.ref_count(), 1);

        let converter = original.converter(Direction::InputToUnicode).unwrap();
        assert_eq!(converter.code_pages(), (CodePage::WINDOWS_1252, CodePage::UTF16));
    }

    #[test]
    fn test_unshared_set_mutates_in_place() {
        let mut ctx = ConversionContext::with_charset(builtin(), "utf-8").unwrap();
        let before = Rc::as_ptr(&ctx.inner);
        ctx.set_option(ConversionOption::NarrowEncoding, Some("windows-1252")).unwrap();
        assert_eq!(before, Rc::as_ptr(&ctx.inner));
    }

    #[test]
    fn test_query_converter_aliases_input() {
        let mut ctx = ConversionContext::with_charset(builtin(), "windows-1252").unwrap();
        let input = ctx.converter(Direction::InputToUnicode).unwrap();
        let query = ctx.converter(Direction::InputToQuery).unwrap();
        assert!(Rc::ptr_eq(input, query));

        ctx.set_option(ConversionOption::QueryEncoding, Some("utf-8")).unwrap();
        let query = ctx.converter(Direction::InputToQuery).unwrap();
        assert_eq!(query.code_pages(), (CodePage::UTF8, CodePage::UTF16));
        assert_eq!(ctx.option(ConversionOption::QueryEncoding), Some("utf-8"));

        ctx.set_option(ConversionOption::QueryEncoding, None).unwrap();
        let input = ctx.converter(Direction::InputToUnicode).unwrap();
        let query = ctx.converter(Direction::InputToQuery).unwrap();
        assert!(Rc::ptr_eq(input, query));
    }

    #[test]
    fn test_option_fallbacks() {
        let ctx = ConversionContext::with_charset(builtin(), "utf-8").unwrap();
        assert_eq!(ctx.option(ConversionOption::Encoding), Some("utf-8"));
        assert_eq!(ctx.option(ConversionOption::QueryEncoding), Some("utf-8"));
        assert_eq!(ctx.option(ConversionOption::NarrowEncoding), Some("utf-8"));
    }

    #[test]
    fn test_unknown_charset_leaves_context_unchanged() {
        let mut ctx = ConversionContext::with_charset(builtin(), "utf-8").unwrap();
        let err = ctx
            .set_option(ConversionOption::Encoding, Some("ebcdic-xyz"))
            .unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
        assert_eq!(ctx.charset(), Some("utf-8"));
    }

    #[test]
    fn test_wide_conversions() {
        let ctx = ConversionContext::with_charset(builtin(), "windows-1252").unwrap();
        let wide = ctx.to_wide(b"caf\xE9", Direction::InputToUnicode).unwrap();
        assert_eq!(wide, "café".encode_utf16().collect::<Vec<_>>());
        let back = ctx.from_wide(&wide, Direction::UnicodeToOutput).unwrap();
        assert_eq!(back, b"caf\xE9");
    }

    #[test]
    fn test_truncation_respects_multibyte_boundaries() {
        let mut ctx = ConversionContext::with_charset(builtin(), "windows-1252").unwrap();
        ctx.set_option(ConversionOption::NarrowEncoding, Some("utf-8")).unwrap();
        let text = "héllo wörld €".as_bytes();
        for max in 0..text.len() {
            let len = ctx.truncated_length(text, max);
            assert!(len <= max);
            assert!(std::str::from_utf8(&text[..len]).is_ok(), "max {max}");
        }
        assert_eq!(ctx.truncated_length(text, 100), text.len());
    }

    #[test]
    fn test_invalid_input_is_an_error() {
        let mut ctx = ConversionContext::with_charset(builtin(), "utf-8").unwrap();
        ctx.set_option(ConversionOption::NarrowEncoding, Some("windows-1252")).unwrap();
        let err = ctx.convert(b"ok\xFF", Direction::InputToNarrow).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }
}
