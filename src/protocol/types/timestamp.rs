//! Provider timestamp codec.
//!
//! The timestamp struct is 16 bytes, little-endian:
//! - bytes[0..2]: year (signed)
//! - bytes[2..4]: month (1-12)
//! - bytes[4..6]: day (1-31)
//! - bytes[6..8]: hour (0-23)
//! - bytes[8..10]: minute (0-59)
//! - bytes[10..12]: second (0-59)
//! - bytes[12..16]: fraction in nanoseconds

use crate::error::{Error, Result};
use crate::protocol::buffer::RecordReader;
use crate::protocol::constants::TIMESTAMP_WIDTH;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

const HALF_SECOND_NANOS: u32 = 500_000_000;

/// Decode a timestamp struct.
pub fn decode_timestamp(data: &[u8]) -> Result<NaiveDateTime> {
    if data.len() < TIMESTAMP_WIDTH {
        return Err(Error::type_conversion(format!(
            "timestamp value must be {} bytes, got {}",
            TIMESTAMP_WIDTH,
            data.len()
        )));
    }
    let reader = RecordReader::new(data);
    let year = reader.read_i16_le(0)? as i32;
    let month = reader.read_u16_le(2)? as u32;
    let day = reader.read_u16_le(4)? as u32;
    let hour = reader.read_u16_le(6)? as u32;
    let minute = reader.read_u16_le(8)? as u32;
    let second = reader.read_u16_le(10)? as u32;
    let fraction = reader.read_u32_le(12)?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_nano_opt(hour, minute, second, fraction))
        .ok_or_else(|| {
            Error::type_conversion(format!(
                "Invalid timestamp: {}-{}-{} {}:{}:{}.{}",
                year, month, day, hour, minute, second, fraction
            ))
        })
}

/// Encode a timestamp struct.
pub fn encode_timestamp(value: &NaiveDateTime) -> [u8; TIMESTAMP_WIDTH] {
    let mut out = [0u8; TIMESTAMP_WIDTH];
    out[0..2].copy_from_slice(&(value.year() as i16).to_le_bytes());
    out[2..4].copy_from_slice(&(value.month() as u16).to_le_bytes());
    out[4..6].copy_from_slice(&(value.day() as u16).to_le_bytes());
    out[6..8].copy_from_slice(&(value.hour() as u16).to_le_bytes());
    out[8..10].copy_from_slice(&(value.minute() as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(value.second() as u16).to_le_bytes());
    out[12..16].copy_from_slice(&value.nanosecond().to_le_bytes());
    out
}

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS`, rounding to the nearest second.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    let whole = value.with_nanosecond(0).unwrap_or(*value);
    let rounded = if value.nanosecond() >= HALF_SECOND_NANOS {
        whole + Duration::seconds(1)
    } else {
        whole
    };
    rounded.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Decode an automation date: days since 1899-12-30, fraction is time of day.
pub fn decode_ole_date(days: f64) -> Result<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::type_conversion("invalid automation date epoch"))?;
    if !days.is_finite() {
        return Err(Error::type_conversion(format!("Invalid automation date: {}", days)));
    }
    let whole = days.trunc();
    // Negative values count days backwards but the time of day forwards.
    let seconds = ((days - whole).abs() * 86_400.0).round() as i64;
    Ok(epoch + Duration::days(whole as i64) + Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, n: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_nano_opt(h, mi, s, n)
            .unwrap()
    }

    #[test]
    fn test_decode_encoded() {
        let value = ts(2024, 10, 21, 12, 36, 5, 250_000_000);
        let bytes = encode_timestamp(&value);
        assert_eq!(decode_timestamp(&bytes).unwrap(), value);
    }

    #[test]
    fn test_decode_invalid() {
        let mut bytes = encode_timestamp(&ts(2024, 1, 1, 0, 0, 0, 0));
        bytes[2] = 13;
        assert!(decode_timestamp(&bytes).is_err());
        assert!(decode_timestamp(&bytes[..8]).is_err());
    }

    #[test]
    fn test_format_rounds_half_second_up() {
        assert_eq!(
            format_timestamp(&ts(2024, 12, 31, 23, 59, 59, 600_000_000)),
            "2025-01-01 00:00:00"
        );
        assert_eq!(
            format_timestamp(&ts(2024, 3, 1, 8, 0, 1, 499_999_999)),
            "2024-03-01 08:00:01"
        );
    }

    #[test]
    fn test_ole_date() {
        assert_eq!(decode_ole_date(0.0).unwrap(), ts(1899, 12, 30, 0, 0, 0, 0));
        assert_eq!(decode_ole_date(45000.5).unwrap(), ts(2023, 3, 15, 12, 0, 0, 0));
        assert_eq!(decode_ole_date(-1.25).unwrap(), ts(1899, 12, 29, 6, 0, 0, 0));
    }
}
