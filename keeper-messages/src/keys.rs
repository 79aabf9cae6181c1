//! Block and upkeep keys.
//!
//! Keys are stored in their native numeric form. The decimal text form is only
//! used on the wire, and parsing it is strict: the text has to be the canonical
//! decimal rendering of a value that fits the native width.
use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

use alloy_primitives::U256;
use serde_with::DeserializeFromStr;
use serde_with::SerializeDisplay;
use thiserror::Error;

/// Separator between the block and the upkeep id in the wire form of an [`UpkeepKey`].
pub const KEY_SEPARATOR: char = '|';

#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyError {
    #[error("block key not parsable: `{0}`")]
    BlockKeyNotParsable(String),

    #[error("upkeep key not parsable: `{0}`")]
    UpkeepKeyNotParsable(String),

    #[error("invalid block key: `{0}`")]
    InvalidBlockKey(String),

    #[error("invalid upkeep identifier: `{0}`")]
    InvalidUpkeepIdentifier(String),
}

/// Returns the digits of a decimal integer and whether `text` is its canonical
/// rendering, or `None` if `text` is not a decimal integer at all.
fn decimal_digits(text: &str) -> Option<(&str, bool)> {
    let (signed, digits) = match text.strip_prefix(|c: char| c == '-' || c == '+') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let canonical = !signed && (digits == "0" || !digits.starts_with('0'));

    Some((digits, canonical))
}

/// A block number.
#[derive(
    Default,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct BlockKey(u64);

impl BlockKey {
    #[must_use]
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }

    /// Returns true if `self` is strictly later than `other`.
    pub fn after(
        &self,
        other: &BlockKey,
    ) -> bool {
        self.0 > other.0
    }

    /// The key of the block following this one. Saturates at `u64::MAX`, where
    /// `next` is no longer `after` self.
    pub fn next(&self) -> BlockKey {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for BlockKey {
    fn from(number: u64) -> Self {
        Self(number)
    }
}

impl Display for BlockKey {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlockKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, canonical) =
            decimal_digits(s).ok_or_else(|| KeyError::BlockKeyNotParsable(s.to_owned()))?;

        if !canonical {
            return Err(KeyError::InvalidBlockKey(s.to_owned()));
        }

        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| KeyError::InvalidBlockKey(s.to_owned()))
    }
}

/// The registry identifier of an upkeep, a 256 bits unsigned integer.
#[derive(
    Default,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct UpkeepIdentifier(U256);

impl UpkeepIdentifier {
    #[must_use]
    pub const fn new(id: U256) -> Self {
        Self(id)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<U256> for UpkeepIdentifier {
    fn from(id: U256) -> Self {
        Self(id)
    }
}

impl From<u64> for UpkeepIdentifier {
    fn from(id: u64) -> Self {
        Self(U256::from(id))
    }
}

impl From<UpkeepIdentifier> for U256 {
    fn from(id: UpkeepIdentifier) -> Self {
        id.0
    }
}

impl Display for UpkeepIdentifier {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UpkeepIdentifier {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, canonical) =
            decimal_digits(s).ok_or_else(|| KeyError::UpkeepKeyNotParsable(s.to_owned()))?;

        if !canonical {
            return Err(KeyError::InvalidUpkeepIdentifier(s.to_owned()));
        }

        U256::from_str_radix(digits, 10)
            .map(Self)
            .map_err(|_| KeyError::InvalidUpkeepIdentifier(s.to_owned()))
    }
}

/// An upkeep pinned to the block it has to be checked at.
///
/// The wire form is `<block>|<id>`, both components in canonical decimal.
#[derive(
    Default,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    SerializeDisplay,
    DeserializeFromStr,
)]
pub struct UpkeepKey {
    block: BlockKey,
    id: UpkeepIdentifier,
}

impl UpkeepKey {
    #[must_use]
    pub fn new(
        block: impl Into<BlockKey>,
        id: impl Into<UpkeepIdentifier>,
    ) -> Self {
        Self {
            block: block.into(),
            id: id.into(),
        }
    }

    pub fn block_key(&self) -> BlockKey {
        self.block
    }

    pub fn upkeep_id(&self) -> UpkeepIdentifier {
        self.id
    }

    pub fn block_key_and_upkeep_id(&self) -> (BlockKey, UpkeepIdentifier) {
        (self.block, self.id)
    }
}

impl Display for UpkeepKey {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.block, self.id)
    }
}

impl FromStr for UpkeepKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split(KEY_SEPARATOR).collect::<Vec<_>>();
        let [block, id] = parts.as_slice() else {
            return Err(KeyError::UpkeepKeyNotParsable(s.to_owned()));
        };

        Ok(Self {
            block: block.parse()?,
            id: id.parse()?,
        })
    }
}
