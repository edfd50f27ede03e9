//! Geometry primitives: world positions and the cells partitioning them.

use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Length in world units of one edge of a cubic cell.
pub const CELL_SIZE_METERS: f64 = 64.0;

/// Radius in world units within which two players are audible to each other.
pub const PROXIMITY_RADIUS_METERS: f64 = 45.0;

/// Minimum change in an observed distance, in world units, before the change
/// alone justifies emitting a new peer frame to the observer.
pub const DISTANCE_CHANGE_EPSILON: f64 = 0.5;

/// A position in the 3D world.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new position from its components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;

        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Whether every component is a finite number.
    ///
    /// JSON can't encode non-finite numbers, but positions may also be
    /// constructed programmatically; callers validating untrusted input
    /// should check this before deriving a cell.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Identifier of the cubic region of space that owns a player's presence.
///
/// Derived from a position by flooring each axis by [`CELL_SIZE_METERS`].
/// Two positions share a cell exactly when their floored integer coordinates
/// match componentwise; cells are disjoint partitions of space.
///
/// Formats as `cell:<ix>:<iy>:<iz>` via its [`Display`] implementation and
/// parses back via [`FromStr`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CellId {
    x: i64,
    y: i64,
    z: i64,
}

impl CellId {
    /// Derive the cell owning the provided position.
    ///
    /// The position must be finite; see [`Vec3::is_finite`].
    pub fn from_position(position: Vec3) -> Self {
        debug_assert!(position.is_finite(), "cell derived from non-finite position");

        Self {
            x: (position.x / CELL_SIZE_METERS).floor() as i64,
            y: (position.y / CELL_SIZE_METERS).floor() as i64,
            z: (position.z / CELL_SIZE_METERS).floor() as i64,
        }
    }

    /// The floored integer coordinates of the cell.
    pub const fn coordinates(&self) -> (i64, i64, i64) {
        (self.x, self.y, self.z)
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "cell:{}:{}:{}", self.x, self.y, self.z)
    }
}

impl FromStr for CellId {
    type Err = CellIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("cell:").ok_or(CellIdParseError { _private: () })?;
        let mut parts = rest.splitn(3, ':');

        let mut next = || {
            parts
                .next()
                .and_then(|part| part.parse().ok())
                .ok_or(CellIdParseError { _private: () })
        };

        Ok(Self {
            x: next()?,
            y: next()?,
            z: next()?,
        })
    }
}

impl Serialize for CellId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Provided string isn't in the form `cell:<ix>:<iy>:<iz>`.
#[derive(Debug)]
pub struct CellIdParseError {
    _private: (),
}

impl Display for CellIdParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("cell id is not in the form cell:<ix>:<iy>:<iz>")
    }
}

impl Error for CellIdParseError {}
