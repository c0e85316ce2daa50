//! Caller-side parsing of the four edit-region coordinates.
//!
//! Coordinates arrive from loosely typed surfaces (form fields, JSON, chat
//! arguments). Textual nulls mean "edit the whole image". A value that is not
//! a number at all is also treated as absent instead of failing the request;
//! that fallback is logged so a mistyped coordinate stays visible.

use std::num::IntErrorKind;

use serde::Deserialize;

use crate::error::{MoodboardError, Result};
use crate::grid::{BoundingBox, ImageDimensions};

const NULL_TOKENS: &[&str] = &["", "none", "null", "undefined"];

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum CoordinateInput {
    #[default]
    Missing,
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    Value(i64),
    /// Explicitly left empty.
    Absent,
    /// Present but not a number.
    Invalid,
}

impl CoordinateInput {
    pub fn parse(&self) -> Coordinate {
        match self {
            Self::Missing => Coordinate::Absent,
            Self::Int(value) => Coordinate::Value(*value),
            Self::Float(value) if value.is_finite() => Coordinate::Value(value.trunc() as i64),
            Self::Float(_) => Coordinate::Invalid,
            Self::Text(raw) => {
                let trimmed = raw.trim();
                if NULL_TOKENS
                    .iter()
                    .any(|token| trimmed.eq_ignore_ascii_case(token))
                {
                    return Coordinate::Absent;
                }
                // Numbers too large for i64 saturate so the bounds check rejects them.
                match trimmed.parse::<i64>() {
                    Ok(value) => Coordinate::Value(value),
                    Err(err) => match err.kind() {
                        IntErrorKind::PosOverflow => Coordinate::Value(i64::MAX),
                        IntErrorKind::NegOverflow => Coordinate::Value(i64::MIN),
                        _ => Coordinate::Invalid,
                    },
                }
            }
        }
    }
}

impl From<i64> for CoordinateInput {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for CoordinateInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Option<String>> for CoordinateInput {
    fn from(value: Option<String>) -> Self {
        value.map(Self::Text).unwrap_or(Self::Missing)
    }
}

/// Coordinates in `x_top, y_top, x_bottom, y_bottom` order.
pub type RegionInput = [CoordinateInput; 4];

pub fn whole_image() -> RegionInput {
    Default::default()
}

/// Turns raw coordinates into a validated box, or `None` for a whole-image edit.
pub fn resolve_bounding_box(
    coordinates: &RegionInput,
    dims: ImageDimensions,
) -> Result<Option<BoundingBox>> {
    let mut values = [0i64; 4];
    for (slot, raw) in values.iter_mut().zip(coordinates.iter()) {
        match raw.parse() {
            Coordinate::Value(value) => *slot = value,
            Coordinate::Absent => return Ok(None),
            Coordinate::Invalid => {
                tracing::warn!(
                    coordinate = ?raw,
                    "non-numeric bounding box coordinate; editing the whole image instead"
                );
                return Ok(None);
            }
        }
    }
    let [x_top, y_top, x_bottom, y_bottom] = values;

    if x_top >= x_bottom || y_top >= y_bottom {
        return Err(MoodboardError::validation(
            "Invalid bounding box: top coordinates must be less than bottom coordinates.",
        ));
    }

    let width = i64::from(dims.width());
    let height = i64::from(dims.height());
    if x_top < 0 || y_top < 0 || x_bottom > width || y_bottom > height {
        return Err(MoodboardError::validation(format!(
            "Bounding box coordinates must be within image bounds \
             (0-{width} for x, 0-{height} for y)."
        )));
    }

    Ok(Some(BoundingBox {
        x_top,
        y_top,
        x_bottom,
        y_bottom,
    }))
}
