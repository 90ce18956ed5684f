//! Reply frames of the GQ-RFC1201 serial protocol.
//!
//! Every command the daemon issues has a fixed-length binary reply. The
//! decoders here take exactly that many bytes and fail with
//! [`ParseError::InsufficientBytes`] on a short frame.
//!
//! | Command | Reply length | Layout |
//! |---------|--------------|--------|
//! | `<GETVER>>` | 14 | ASCII model and firmware |
//! | `<GETCPM>>` | 2 | CPM, u16 big-endian |
//! | `<GETVOLT>>` | 1 | volts × 10 |
//! | `<GETDATETIME>>` | 7 | YY MM DD HH MM SS `0xAA` |
//! | `<SETDATETIME[..]>>` | 1 | `0xAA` |

use time::{Date, Month, PrimitiveDateTime, Time};

use crate::error::{ParseError, ParseResult};

/// Acknowledgement byte returned by write commands.
pub const ACK: u8 = 0xAA;

/// Reply length of `<GETVER>>`.
pub const VERSION_FRAME_LEN: usize = 14;
/// Reply length of `<GETCPM>>` on GMC-300E+ firmware.
pub const CPM_FRAME_LEN: usize = 2;
/// Reply length of `<GETVOLT>>`.
pub const VOLTAGE_FRAME_LEN: usize = 1;
/// Reply length of `<GETDATETIME>>`.
pub const DATETIME_FRAME_LEN: usize = 7;
/// Reply length of acknowledged write commands.
pub const ACK_FRAME_LEN: usize = 1;

fn check_len(data: &[u8], expected: usize) -> ParseResult<()> {
    if data.len() < expected {
        return Err(ParseError::InsufficientBytes {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Decode the version string, e.g. `GMC-300Re 4.54`.
pub fn decode_version(data: &[u8]) -> ParseResult<String> {
    check_len(data, VERSION_FRAME_LEN)?;
    let text: String = data[..VERSION_FRAME_LEN]
        .iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|&b| b as char)
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ParseError::InvalidData(
            "version reply contains no printable characters".to_string(),
        ));
    }
    Ok(text)
}

/// Decode a counts-per-minute reply.
pub fn decode_cpm(data: &[u8]) -> ParseResult<u32> {
    use bytes::Buf;

    check_len(data, CPM_FRAME_LEN)?;
    let mut buf = data;
    Ok(u32::from(buf.get_u16()))
}

/// Decode a battery voltage reply into volts.
pub fn decode_voltage(data: &[u8]) -> ParseResult<f64> {
    check_len(data, VOLTAGE_FRAME_LEN)?;
    Ok(f64::from(data[0]) / 10.0)
}

/// Decode the device's real-time clock.
///
/// Two-digit years below 50 are taken as 20xx, the rest as 19xx.
pub fn decode_datetime(data: &[u8]) -> ParseResult<PrimitiveDateTime> {
    use bytes::Buf;

    check_len(data, DATETIME_FRAME_LEN)?;
    if data[6] != ACK {
        return Err(ParseError::InvalidData(format!(
            "datetime reply terminator 0x{:02X}, expected 0x{ACK:02X}",
            data[6]
        )));
    }

    let mut buf = data;
    let yy = buf.get_u8();
    let month = buf.get_u8();
    let day = buf.get_u8();
    let hour = buf.get_u8();
    let minute = buf.get_u8();
    let second = buf.get_u8();

    let year = if yy < 50 {
        2000 + i32::from(yy)
    } else {
        1900 + i32::from(yy)
    };
    let month = Month::try_from(month)
        .map_err(|_| ParseError::InvalidData(format!("invalid month {month}")))?;
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| ParseError::InvalidData(format!("invalid date: {e}")))?;
    let time = Time::from_hms(hour, minute, second)
        .map_err(|e| ParseError::InvalidData(format!("invalid time: {e}")))?;

    Ok(PrimitiveDateTime::new(date, time))
}

/// Decode the single-byte acknowledgement of a write command.
pub fn decode_ack(data: &[u8]) -> ParseResult<()> {
    check_len(data, ACK_FRAME_LEN)?;
    match data[0] {
        ACK => Ok(()),
        other => Err(ParseError::InvalidData(format!(
            "expected ack 0x{ACK:02X}, got 0x{other:02X}"
        ))),
    }
}

/// Encode the six payload bytes of `<SETDATETIME[YYMMDDHHMMSS]>>`.
#[must_use]
pub fn encode_datetime(dt: PrimitiveDateTime) -> [u8; 6] {
    [
        (dt.year().rem_euclid(100)) as u8,
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    #[test]
    fn test_decode_cpm_big_endian() {
        assert_eq!(decode_cpm(&[0x00, 0x23]).unwrap(), 35);
        assert_eq!(decode_cpm(&[0x01, 0x00]).unwrap(), 256);
        assert_eq!(decode_cpm(&[0xFF, 0xFF]).unwrap(), 65535);
    }

    #[test]
    fn test_decode_cpm_short_frame() {
        let err = decode_cpm(&[0x12]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_decode_voltage() {
        assert!((decode_voltage(&[84]).unwrap() - 8.4).abs() < 1e-9);
        assert!((decode_voltage(&[0]).unwrap()).abs() < 1e-9);
        assert!(decode_voltage(&[]).is_err());
    }

    #[test]
    fn test_decode_version_trims_padding() {
        let frame = b"GMC-300Re 4.54";
        assert_eq!(decode_version(frame).unwrap(), "GMC-300Re 4.54");

        let padded = b"GMC-300E+\0\0\0\0\0";
        assert_eq!(decode_version(padded).unwrap(), "GMC-300E+");
    }

    #[test]
    fn test_decode_version_rejects_garbage() {
        assert!(decode_version(&[0u8; 14]).is_err());
        assert!(decode_version(b"short").is_err());
    }

    #[test]
    fn test_decode_datetime() {
        let frame = [24, 5, 1, 13, 45, 9, ACK];
        assert_eq!(decode_datetime(&frame).unwrap(), datetime!(2024-05-01 13:45:09));
    }

    #[test]
    fn test_decode_datetime_century_pivot() {
        let frame = [99, 12, 31, 23, 59, 59, ACK];
        assert_eq!(decode_datetime(&frame).unwrap(), datetime!(1999-12-31 23:59:59));
    }

    #[test]
    fn test_decode_datetime_bad_terminator() {
        let frame = [24, 5, 1, 13, 45, 9, 0x00];
        assert!(matches!(
            decode_datetime(&frame),
            Err(ParseError::InvalidData(_))
        ));
    }

    #[test]
    fn test_decode_datetime_invalid_fields() {
        assert!(decode_datetime(&[24, 13, 1, 0, 0, 0, ACK]).is_err());
        assert!(decode_datetime(&[24, 2, 30, 0, 0, 0, ACK]).is_err());
        assert!(decode_datetime(&[24, 2, 1, 25, 0, 0, ACK]).is_err());
    }

    #[test]
    fn test_decode_ack() {
        assert!(decode_ack(&[ACK]).is_ok());
        assert!(decode_ack(&[0x00]).is_err());
        assert!(decode_ack(&[]).is_err());
    }

    #[test]
    fn test_encode_datetime() {
        assert_eq!(
            encode_datetime(datetime!(2024-05-01 13:45:09)),
            [24, 5, 1, 13, 45, 9]
        );
    }

    #[test]
    fn test_encoded_clock_is_what_the_device_reports() {
        let dt = datetime!(2031-11-20 08:00:59);
        let mut frame = encode_datetime(dt).to_vec();
        frame.push(ACK);
        assert_eq!(decode_datetime(&frame).unwrap(), dt);
    }

    proptest! {
        #[test]
        fn prop_cpm_frame_is_u16_be(value in any::<u16>()) {
            prop_assert_eq!(decode_cpm(&value.to_be_bytes()).unwrap(), u32::from(value));
        }

        #[test]
        fn prop_clock_survives_encode(
            year in 2000i32..2050,
            month in 1u8..=12,
            day in 1u8..=28,
            hour in 0u8..24,
            minute in 0u8..60,
            second in 0u8..60,
        ) {
            let date = Date::from_calendar_date(year, Month::try_from(month).unwrap(), day).unwrap();
            let dt = PrimitiveDateTime::new(date, Time::from_hms(hour, minute, second).unwrap());
            let mut frame = encode_datetime(dt).to_vec();
            frame.push(ACK);
            prop_assert_eq!(decode_datetime(&frame).unwrap(), dt);
        }
    }
}
