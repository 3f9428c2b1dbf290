//! Tagged union (variant) values rendered as text.
//!
//! Layout: tag `u16` at offset 0, payload at offset 8. String payloads are a
//! reference token resolved through the rowset.

use super::timestamp::{decode_ole_date, format_timestamp};
use crate::error::{Error, Result};
use crate::protocol::buffer::RecordReader;
use crate::protocol::constants::*;
use crate::protocol::provider::{wide, WideString};
use bytes::Bytes;

const PAYLOAD: usize = 8;

/// Decode a variant slot to wide text; `None` for empty and null variants.
pub fn variant_to_wide<F>(data: &[u8], resolve: F) -> Result<Option<WideString>>
where
    F: Fn(u64) -> Option<Bytes>,
{
    let reader = RecordReader::new(data);
    let tag = reader.read_u16_le(0)?;
    let text = match tag {
        VT_EMPTY | VT_NULL => return Ok(None),
        VT_BSTR => {
            let token = reader.read_u64_le(PAYLOAD)?;
            let bytes = resolve(token).ok_or_else(|| {
                Error::type_conversion(format!("unresolved string reference {}", token))
            })?;
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            return Ok(Some(units));
        }
        VT_BOOL => {
            if reader.read_i16_le(PAYLOAD)? != 0 {
                "True".to_string()
            } else {
                "False".to_string()
            }
        }
        VT_I1 => (reader.read_u8(PAYLOAD)? as i8).to_string(),
        VT_UI1 => reader.read_u8(PAYLOAD)?.to_string(),
        VT_I2 => reader.read_i16_le(PAYLOAD)?.to_string(),
        VT_UI2 => reader.read_u16_le(PAYLOAD)?.to_string(),
        VT_I4 => reader.read_i32_le(PAYLOAD)?.to_string(),
        VT_UI4 => reader.read_u32_le(PAYLOAD)?.to_string(),
        VT_I8 => reader.read_i64_le(PAYLOAD)?.to_string(),
        VT_UI8 => reader.read_u64_le(PAYLOAD)?.to_string(),
        VT_R4 => reader.read_f32_le(PAYLOAD)?.to_string(),
        VT_R8 => reader.read_f64_le(PAYLOAD)?.to_string(),
        VT_CY => format_currency(reader.read_i64_le(PAYLOAD)?),
        VT_DATE => format_timestamp(&decode_ole_date(reader.read_f64_le(PAYLOAD)?)?),
        other => {
            return Err(Error::type_conversion(format!(
                "unsupported variant type {}",
                other
            )))
        }
    };
    Ok(Some(wide(&text)))
}

/// Currency is a count of ten-thousandths.
fn format_currency(raw: i64) -> String {
    let sign = if raw < 0 { "-" } else { "" };
    let abs = raw.unsigned_abs();
    let whole = abs / 10_000;
    let frac = abs % 10_000;
    if frac == 0 {
        format!("{}{}", sign, whole)
    } else {
        let digits = format!("{:04}", frac);
        format!("{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}
