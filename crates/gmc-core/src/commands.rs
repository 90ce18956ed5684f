//! GQ-RFC1201 command strings for GMC devices.
//!
//! Commands are ASCII, framed as `<NAME>>`. Replies are fixed-length binary
//! frames, decoded by [`gmc_types::frames`].

use time::PrimitiveDateTime;

use gmc_types::frames::encode_datetime;

/// Read the model and firmware string (14-byte reply).
pub const GET_VERSION: &[u8] = b"<GETVER>>";

/// Read counts per minute (2-byte reply).
pub const GET_CPM: &[u8] = b"<GETCPM>>";

/// Read battery voltage (1-byte reply).
pub const GET_VOLTAGE: &[u8] = b"<GETVOLT>>";

/// Read the real-time clock (7-byte reply).
pub const GET_DATETIME: &[u8] = b"<GETDATETIME>>";

/// Build `<SETDATETIME[YYMMDDHHMMSS]>>` with six raw bytes between the brackets.
/// The device replies with `0xAA`.
pub fn set_datetime(dt: PrimitiveDateTime) -> Vec<u8> {
    let mut command = Vec::with_capacity(21);
    command.extend_from_slice(b"<SETDATETIME[");
    command.extend_from_slice(&encode_datetime(dt));
    command.extend_from_slice(b"]>>");
    command
}

/// Short name of a command for logs and errors, e.g. `GETCPM`.
pub fn name(command: &[u8]) -> &str {
    let end = command
        .iter()
        .position(|&b| b == b'[' || b == b'>')
        .unwrap_or(command.len());
    std::str::from_utf8(&command[..end])
        .unwrap_or("?")
        .trim_start_matches('<')
}
