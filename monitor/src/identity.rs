//! Vehicle file identities.
//!
//! rFactor 2 stores each vehicle as a `.veh` file somewhere below an
//! `Installed\Vehicles` directory, with one subdirectory per version or
//! livery pack:
//!
//! ```text
//! ...\Installed\Vehicles\Teams\Foo\Car_2024\car.veh
//!                        └───┬───┘ └──┬───┘ └──┬──┘
//!                         model    version  filename
//! ```
//!
//! A [`VehicleFileIdentity`] keeps only the part after the `Vehicles`
//! segment. Two identities are *similar* when they share everything except
//! the filename and the version segment, i.e. they are liveries of the same
//! car.

use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Segment that marks the start of the install-relative vehicle path.
pub const ROOT_MARKER: &str = "Vehicles";

/// Canonical separator for normalized identities.
pub const SEPARATOR: char = '\\';

/// Errors that can occur when building an identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The vehicle file value was empty.
    #[error("vehicle file must not be empty")]
    Empty,
}

/// Normalized, install-relative identity of a vehicle file.
///
/// Equality and hashing are case-insensitive.
#[derive(Debug, Clone)]
pub struct VehicleFileIdentity {
    value: String,
}

impl VehicleFileIdentity {
    /// Builds an identity from a raw vehicle file path.
    ///
    /// Everything up to and including the first `Vehicles` segment is
    /// discarded. Paths without that segment are kept whole.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for empty or whitespace-only input.
    ///
    /// # Example
    ///
    /// ```
    /// use liverysync_monitor::identity::VehicleFileIdentity;
    ///
    /// let id = VehicleFileIdentity::parse(r"C:\rF2\Installed\Vehicles\Foo\1.0\car.veh").unwrap();
    /// assert_eq!(id.as_str(), r"Foo\1.0\car.veh");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.trim().is_empty() {
            return Err(IdentityError::Empty);
        }

        let segments: Vec<&str> = raw.split(['\\', '/']).collect();
        let skip = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case(ROOT_MARKER))
            .map_or(0, |idx| idx + 1);

        let value = segments[skip..].join(r"\");
        Ok(Self { value })
    }

    /// The normalized identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Case-insensitive exact match.
    #[must_use]
    pub fn matches_exact(&self, other: &Self) -> bool {
        self.value.eq_ignore_ascii_case(&other.value)
    }

    /// True when both identities name liveries of the same vehicle.
    ///
    /// Drops the filename and the version segment before comparing.
    #[must_use]
    pub fn is_similar(&self, other: &Self) -> bool {
        self.is_similar_with(other, true)
    }

    /// Like [`is_similar`](Self::is_similar), optionally keeping the version segment.
    #[must_use]
    pub fn is_similar_with(&self, other: &Self, exclude_version: bool) -> bool {
        self.distinct_prefix(exclude_version)
            .eq_ignore_ascii_case(other.distinct_prefix(exclude_version))
    }

    /// Leading part of the identity that is shared by all liveries.
    ///
    /// Always keeps at least the first segment.
    fn distinct_prefix(&self, exclude_version: bool) -> &str {
        let segments = self.value.split(SEPARATOR).count();
        let drop = if exclude_version { 2 } else { 1 };
        let take = segments.saturating_sub(drop).max(1);

        match self.value.match_indices(SEPARATOR).nth(take - 1) {
            Some((idx, _)) => &self.value[..idx],
            None => &self.value,
        }
    }
}

impl PartialEq for VehicleFileIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.matches_exact(other)
    }
}

impl Eq for VehicleFileIdentity {}

impl Hash for VehicleFileIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.value.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for VehicleFileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
