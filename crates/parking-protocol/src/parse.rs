//! Parsing inbound `SPOT:PLATE[:TIMESTAMP]` payloads.

use parking_core::{Plate, SpotIndex};
use thiserror::Error;

use crate::message::Request;

/// Field separator.
const SEPARATOR: char = ':';

/// Why a payload could not become a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No separator anywhere in the payload.
    #[error("malformed message (no ':' separator): {payload:?}")]
    Malformed { payload: String },

    /// Plate is not three letters followed by three digits.
    #[error("invalid plate: {value:?}")]
    InvalidPlate { value: String },

    /// Spot position outside `1..=40`.
    #[error("invalid spot: {position}")]
    InvalidSpot { position: i64 },
}

/// Parses one payload into a validated request.
///
/// The payload is split on its first two `:`; anything after the second one
/// is the timestamp, kept verbatim. The plate is validated before the spot,
/// so a payload that is wrong on both counts reports the plate.
///
/// # Errors
///
/// See [`RequestError`]. Parsing never has side effects.
///
/// # Example
///
/// ```
/// use parking_protocol::parse_request;
///
/// let req = parse_request("15:ABC123:2024-11-25 14:30:45").unwrap();
/// assert_eq!(req.spot.position(), 15);
/// assert_eq!(req.plate.as_str(), "ABC123");
/// assert_eq!(req.timestamp.as_deref(), Some("2024-11-25 14:30:45"));
/// ```
pub fn parse_request(payload: &str) -> Result<Request, RequestError> {
    let payload = trim_line_ending(payload);

    let (spot_field, rest) =
        payload
            .split_once(SEPARATOR)
            .ok_or_else(|| RequestError::Malformed {
                payload: payload.to_string(),
            })?;

    let (plate_field, timestamp) = match rest.split_once(SEPARATOR) {
        Some((plate, ts)) => (plate, Some(ts.to_string())),
        None => (rest, None),
    };

    let plate = Plate::parse(plate_field).map_err(|_| RequestError::InvalidPlate {
        value: plate_field.to_string(),
    })?;

    let position = leading_integer(spot_field);
    let spot =
        SpotIndex::from_position(position).map_err(|_| RequestError::InvalidSpot { position })?;

    Ok(Request {
        spot,
        plate,
        timestamp,
    })
}

/// Drops one trailing `\n` or `\r\n`.
fn trim_line_ending(payload: &str) -> &str {
    match payload.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => payload,
    }
}

/// Reads the spot field the way gate terminals have always been read:
/// leading whitespace and a sign are allowed, digits are taken up to the
/// first non-digit, and anything unreadable counts as 0.
fn leading_integer(field: &str) -> i64 {
    let field = field.trim_start();
    let (negative, unsigned) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field.strip_prefix('+').unwrap_or(field)),
    };

    let end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());

    unsigned
        .get(..end)
        .and_then(|digits| digits.parse::<i64>().ok())
        .map(|n| if negative { -n } else { n })
        .unwrap_or(0)
}
