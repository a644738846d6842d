use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The height of a block is the length of the chain back to the genesis block.
///
/// # Invariants
///
/// Users should not construct block heights greater than `Height::MAX`.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Height(pub u32);

/// An error performing arithmetic on a [`Height`].
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum HeightError {
    /// The result would be above [`Height::MAX`].
    #[error("block height overflow")]
    Overflow,

    /// The result would be below [`Height::MIN`].
    #[error("block height underflow")]
    Underflow,

    /// The string is not a valid height.
    #[error("invalid block height string")]
    Parse,
}

impl Height {
    /// The minimum Height.
    ///
    /// Due to the underlying type, it is impossible to construct block heights
    /// less than `Height::MIN`.
    ///
    /// Style note: Sometimes, `Height::MIN` is less readable than
    /// `Height(0)`. Use whichever makes sense in context.
    pub const MIN: Height = Height(0);

    /// The maximum Height.
    ///
    /// Users should not construct block heights greater than `Height::MAX`.
    pub const MAX: Height = Height(u32::MAX >> 1);

    /// Returns the next [`Height`].
    pub fn next(self) -> Result<Self, HeightError> {
        self.checked_add(1)
    }

    /// Returns the previous [`Height`].
    pub fn previous(self) -> Result<Self, HeightError> {
        self.checked_sub(1)
    }

    /// Returns `self + blocks`, or an error if the result is above [`Height::MAX`].
    pub fn checked_add(self, blocks: u32) -> Result<Self, HeightError> {
        self.0
            .checked_add(blocks)
            .map(Height)
            .filter(|height| *height <= Height::MAX)
            .ok_or(HeightError::Overflow)
    }

    /// Returns `self - blocks`, or an error if the result is below [`Height::MIN`].
    pub fn checked_sub(self, blocks: u32) -> Result<Self, HeightError> {
        self.0
            .checked_sub(blocks)
            .map(Height)
            .ok_or(HeightError::Underflow)
    }

    /// Returns `self + blocks`, clamped to [`Height::MAX`].
    pub fn saturating_add(self, blocks: u32) -> Self {
        self.checked_add(blocks).unwrap_or(Height::MAX)
    }

    /// Returns `self - blocks`, clamped to [`Height::MIN`].
    pub fn saturating_sub(self, blocks: u32) -> Self {
        Height(self.0.saturating_sub(blocks))
    }

    /// Returns the number of blocks from `lower` up to `self`,
    /// or zero if `lower` is above `self`.
    pub fn blocks_above(self, lower: Height) -> u32 {
        self.0.saturating_sub(lower.0)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Height {
    type Err = HeightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse() {
            Ok(h) if (Height(h) <= Height::MAX) => Ok(Height(h)),
            Ok(_) => Err(HeightError::Overflow),
            Err(_) => Err(HeightError::Parse),
        }
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
use proptest::prelude::*;

#[cfg(any(test, feature = "proptest-impl"))]
impl Arbitrary for Height {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (Height::MIN.0..=Height::MAX.0).prop_map(Height).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
