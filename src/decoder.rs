//! Encoded polyline decoding.
//!
//! Activity paths arrive in the Google encoded polyline format: each axis is a
//! zig-zag, delta-encoded integer written as 5-bit groups offset by 63, with
//! bit 0x20 marking a continuation. Decoding goes through the `polyline` crate
//! after a structural check, so truncated or garbled input is rejected as a
//! whole instead of yielding a partial path.
//!
//! A path that cannot be decoded is not an error for callers: it is logged and
//! treated as "no path data".

use log::debug;

use crate::{GeoPoint, TrailMatchError};

/// Default polyline precision in decimal digits (factor 1e5).
pub const DEFAULT_PRECISION: u32 = 5;

const CHAR_OFFSET: u8 = 63;
const CONTINUATION_BIT: u8 = 0x20;
// 2^63 needs 13 five-bit groups; anything longer overflows
const MAX_GROUPS_PER_VALUE: usize = 13;
// 10^precision must fit the decoder's i32 factor
const MAX_PRECISION: u32 = 9;

/// Decode an encoded path into ordered points.
///
/// Empty, missing and malformed input all yield an empty vector.
///
/// # Example
/// ```
/// use trail_matcher::{decode_path, DEFAULT_PRECISION};
///
/// let points = decode_path(Some("_p~iF~ps|U_ulLnnqC_mqNvxq`@"), DEFAULT_PRECISION);
/// assert_eq!(points.len(), 3);
/// assert!((points[0].latitude - 38.5).abs() < 1e-9);
///
/// assert!(decode_path(None, DEFAULT_PRECISION).is_empty());
/// ```
pub fn decode_path(encoded: Option<&str>, precision: u32) -> Vec<GeoPoint> {
    let encoded = match encoded {
        Some(s) if !s.is_empty() => s,
        _ => return Vec::new(),
    };

    match try_decode_path(encoded, precision) {
        Ok(points) => points,
        Err(e) => {
            debug!("[Decoder] Treating path as empty: {}", e);
            Vec::new()
        }
    }
}

/// Decode an encoded path, reporting why malformed input was rejected.
pub fn try_decode_path(encoded: &str, precision: u32) -> Result<Vec<GeoPoint>, TrailMatchError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(TrailMatchError::Decode {
            message: format!(
                "precision must be between 1 and {}, got {}",
                MAX_PRECISION, precision
            ),
        });
    }
    validate_structure(encoded)?;

    let line = ::polyline::decode_polyline(encoded, precision)
        .map_err(|e| TrailMatchError::Decode {
            message: e.to_string(),
        })?;

    let points: Vec<GeoPoint> = line
        .into_iter()
        .map(|c| GeoPoint::new(c.y, c.x))
        .collect();

    if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
        return Err(TrailMatchError::Decode {
            message: format!(
                "decoded coordinate out of range: ({}, {})",
                bad.latitude, bad.longitude
            ),
        });
    }

    Ok(points)
}

/// Check that the string is a whole number of latitude/longitude pairs.
fn validate_structure(encoded: &str) -> Result<(), TrailMatchError> {
    let mut values = 0usize;
    let mut groups = 0usize;

    for (index, byte) in encoded.bytes().enumerate() {
        if !(CHAR_OFFSET..=126).contains(&byte) {
            return Err(TrailMatchError::Decode {
                message: format!("invalid character at index {}", index),
            });
        }
        groups += 1;
        if groups > MAX_GROUPS_PER_VALUE {
            return Err(TrailMatchError::Decode {
                message: format!("value overflows at index {}", index),
            });
        }
        if (byte - CHAR_OFFSET) & CONTINUATION_BIT == 0 {
            values += 1;
            groups = 0;
        }
    }

    if groups != 0 {
        return Err(TrailMatchError::Decode {
            message: "truncated value at end of input".to_string(),
        });
    }
    if values % 2 != 0 {
        return Err(TrailMatchError::Decode {
            message: "latitude without matching longitude".to_string(),
        });
    }
    Ok(())
}
