//! Direction and safe-zone resolution.
//!
//! Positions use arena coordinates where `y` grows southward. Directions are
//! measured from the arena center with 0° at north, increasing clockwise, and
//! discretized into 4 or 8 equally spaced bins. Anything that cannot be
//! resolved (missing position, actor on the center, non-finite coordinates)
//! becomes `DirectionBin::Unknown`, which every lookup maps back to itself.
//!
//! # Examples
//!
//! ```
//! use callout::direction::{position_to_direction, BinCount, DirectionBin, Position};
//!
//! let center = Position::new(100.0, 100.0);
//! let east = position_to_direction(Some(Position::new(112.0, 100.0)), center, BinCount::Eight);
//! assert_eq!(east, DirectionBin::East);
//! assert_eq!(east.opposite(), DirectionBin::West);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Distance from the center below which a position is treated as centered.
pub const CENTER_EPSILON: f64 = 1e-3;

/// A point in arena coordinates.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Discretized compass direction.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectionBin {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    Unknown,
}

impl DirectionBin {
    /// Every bin, including `Unknown`.
    pub const ALL: [Self; 9] = [
        Self::North,
        Self::NorthEast,
        Self::East,
        Self::SouthEast,
        Self::South,
        Self::SouthWest,
        Self::West,
        Self::NorthWest,
        Self::Unknown,
    ];

    const EIGHT: [Self; 8] = [
        Self::North,
        Self::NorthEast,
        Self::East,
        Self::SouthEast,
        Self::South,
        Self::SouthWest,
        Self::West,
        Self::NorthWest,
    ];

    const FOUR: [Self; 4] = [Self::North, Self::East, Self::South, Self::West];

    /// Clockwise index from north in the 8-way enumeration.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::North => Some(0),
            Self::NorthEast => Some(1),
            Self::East => Some(2),
            Self::SouthEast => Some(3),
            Self::South => Some(4),
            Self::SouthWest => Some(5),
            Self::West => Some(6),
            Self::NorthWest => Some(7),
            Self::Unknown => None,
        }
    }

    /// Returns true for N/E/S/W.
    #[must_use]
    pub const fn is_cardinal(self) -> bool {
        matches!(self, Self::North | Self::East | Self::South | Self::West)
    }

    /// Returns true for the unknown sentinel.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Short label, e.g. `NE`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::North => "N",
            Self::NorthEast => "NE",
            Self::East => "E",
            Self::SouthEast => "SE",
            Self::South => "S",
            Self::SouthWest => "SW",
            Self::West => "W",
            Self::NorthWest => "NW",
            Self::Unknown => "unknown",
        }
    }

    /// Shorthand for `SafeZoneTable::Opposite` lookups.
    #[must_use]
    pub fn opposite(self) -> Self {
        lookup_opposite(self)
    }
}

impl fmt::Display for DirectionBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of bins a position is discretized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinCount {
    /// Cardinals only.
    Four,
    /// Cardinals and intercardinals.
    Eight,
}

impl BinCount {
    const fn bins(self) -> &'static [DirectionBin] {
        match self {
            Self::Four => &DirectionBin::FOUR,
            Self::Eight => &DirectionBin::EIGHT,
        }
    }
}

/// Converts an actor position into a direction bin around `center`.
///
/// Bins are centered on their compass heading; a position exactly between two
/// bins rounds clockwise.
#[must_use]
pub fn position_to_direction(actor: Option<Position>, center: Position, bins: BinCount) -> DirectionBin {
    let Some(actor) = actor else {
        return DirectionBin::Unknown;
    };
    if !actor.is_finite() || !center.is_finite() {
        return DirectionBin::Unknown;
    }

    let dx = actor.x - center.x;
    let dy = actor.y - center.y;
    if dx.hypot(dy) < CENTER_EPSILON {
        return DirectionBin::Unknown;
    }

    // atan2(dx, -dy): 0 at north (negative y), positive toward east.
    let mut degrees = dx.atan2(-dy).to_degrees();
    if degrees < 0.0 {
        degrees += 360.0;
    }

    let table = bins.bins();
    let step = 360.0 / table.len() as f64;
    let idx = (degrees / step).round() as usize % table.len();
    table[idx]
}

/// Opposite-direction table. Total over every bin.
pub const OPPOSITE_TABLE: [(DirectionBin, DirectionBin); 9] = [
    (DirectionBin::North, DirectionBin::South),
    (DirectionBin::NorthEast, DirectionBin::SouthWest),
    (DirectionBin::East, DirectionBin::West),
    (DirectionBin::SouthEast, DirectionBin::NorthWest),
    (DirectionBin::South, DirectionBin::North),
    (DirectionBin::SouthWest, DirectionBin::NorthEast),
    (DirectionBin::West, DirectionBin::East),
    (DirectionBin::NorthWest, DirectionBin::SouthEast),
    (DirectionBin::Unknown, DirectionBin::Unknown),
];

/// Perpendicular-pair table, each pair ordered clockwise from north.
pub const PERPENDICULAR_TABLE: [(DirectionBin, [DirectionBin; 2]); 9] = [
    (DirectionBin::North, [DirectionBin::East, DirectionBin::West]),
    (DirectionBin::NorthEast, [DirectionBin::SouthEast, DirectionBin::NorthWest]),
    (DirectionBin::East, [DirectionBin::North, DirectionBin::South]),
    (DirectionBin::SouthEast, [DirectionBin::NorthEast, DirectionBin::SouthWest]),
    (DirectionBin::South, [DirectionBin::East, DirectionBin::West]),
    (DirectionBin::SouthWest, [DirectionBin::SouthEast, DirectionBin::NorthWest]),
    (DirectionBin::West, [DirectionBin::North, DirectionBin::South]),
    (DirectionBin::NorthWest, [DirectionBin::NorthEast, DirectionBin::SouthWest]),
    (DirectionBin::Unknown, [DirectionBin::Unknown, DirectionBin::Unknown]),
];

/// Looks up the opposite direction.
#[must_use]
pub fn lookup_opposite(dir: DirectionBin) -> DirectionBin {
    OPPOSITE_TABLE
        .iter()
        .find(|(from, _)| *from == dir)
        .map_or(DirectionBin::Unknown, |(_, to)| *to)
}

/// Looks up the two directions perpendicular to `dir`.
#[must_use]
pub fn lookup_perpendicular_pair(dir: DirectionBin) -> [DirectionBin; 2] {
    PERPENDICULAR_TABLE
        .iter()
        .find(|(from, _)| *from == dir)
        .map_or([DirectionBin::Unknown; 2], |(_, pair)| *pair)
}

/// Which table converts a hazard direction into safe directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeZoneTable {
    /// Safe spot is the hazard direction itself.
    Identity,
    /// Safe spot is directly opposite.
    Opposite,
    /// Safe spots are the two perpendicular directions.
    PerpendicularPair,
}

impl SafeZoneTable {
    /// Maps a hazard direction through this table.
    #[must_use]
    pub fn lookup(self, dir: DirectionBin) -> SafeZone {
        match self {
            Self::Identity => SafeZone::Single(dir),
            Self::Opposite => SafeZone::Single(lookup_opposite(dir)),
            Self::PerpendicularPair => {
                let [a, b] = lookup_perpendicular_pair(dir);
                SafeZone::Pair(a, b)
            }
        }
    }
}

/// One or two safe directions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "dirs", rename_all = "snake_case")]
pub enum SafeZone {
    Single(DirectionBin),
    Pair(DirectionBin, DirectionBin),
}

impl SafeZone {
    /// The safe directions in order.
    #[must_use]
    pub fn directions(&self) -> Vec<DirectionBin> {
        match *self {
            Self::Single(d) => vec![d],
            Self::Pair(a, b) => vec![a, b],
        }
    }
}

/// Positional qualifier handed to the output composer alongside the directions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Qualifier {
    Under,
    AwayFrom,
    Beside,
}

/// Geometric shape of a hazard anchored at a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardShape {
    /// Ring around the anchor; stand under it.
    Donut,
    /// Circle on the anchor; get away from it.
    Point,
    /// Line or cleave through the anchor; go to its sides.
    Cleave,
}

impl HazardShape {
    /// Table used to find safe directions for this shape.
    #[must_use]
    pub const fn table(self) -> SafeZoneTable {
        match self {
            Self::Donut => SafeZoneTable::Identity,
            Self::Point => SafeZoneTable::Opposite,
            Self::Cleave => SafeZoneTable::PerpendicularPair,
        }
    }

    /// Qualifier describing where to stand relative to the anchor.
    #[must_use]
    pub const fn qualifier(self) -> Qualifier {
        match self {
            Self::Donut => Qualifier::Under,
            Self::Point => Qualifier::AwayFrom,
            Self::Cleave => Qualifier::Beside,
        }
    }
}

/// Safe directions plus the qualifier for one hazard.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SafeZoneResolution {
    pub zone: SafeZone,
    pub qualifier: Qualifier,
}

/// Resolves where to stand for a hazard anchored at `hazard`.
#[must_use]
pub fn resolve_safe_zone(hazard: DirectionBin, shape: HazardShape) -> SafeZoneResolution {
    SafeZoneResolution {
        zone: shape.table().lookup(hazard),
        qualifier: shape.qualifier(),
    }
}
