//! The observation a node proposes for a round: which upkeeps to check, and at
//! which block.
//!
//! On the wire an observation is a JSON object with positional keys,
//! `{"1": "<block>", "2": ["<id>", ...]}`. Deserialization validates the whole
//! message and never yields a partially valid observation.
use serde_derive::Deserialize;
use serde_derive::Serialize;
use thiserror::Error;

use crate::keys::BlockKey;
use crate::keys::KeyError;
use crate::keys::UpkeepIdentifier;
use crate::keys::UpkeepKey;

#[derive(Error, Debug)]
pub enum ObservationError {
    #[error("malformed observation: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "WireObservation", into = "WireObservation")]
pub struct UpkeepObservation {
    block_key: BlockKey,
    upkeep_identifiers: Vec<UpkeepIdentifier>,
}

/// The unvalidated wire shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct WireObservation {
    #[serde(rename = "1")]
    block_key: String,

    #[serde(rename = "2")]
    upkeep_identifiers: Vec<String>,
}

impl UpkeepObservation {
    /// Builds an observation from already typed keys.
    ///
    /// Fails with [`KeyError::InvalidBlockKey`] for block `0`, which can never be
    /// observed.
    pub fn new(
        block_key: BlockKey,
        upkeep_identifiers: Vec<UpkeepIdentifier>,
    ) -> Result<Self, KeyError> {
        if block_key.number() == 0 {
            return Err(KeyError::InvalidBlockKey(block_key.to_string()));
        }

        Ok(Self {
            block_key,
            upkeep_identifiers,
        })
    }

    /// Decodes and validates an observation, keeping the precise [`KeyError`] on
    /// validation failures.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ObservationError> {
        let wire = serde_json::from_slice::<WireObservation>(bytes)?;
        Ok(Self::try_from(wire)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ObservationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn block_key(&self) -> BlockKey {
        self.block_key
    }

    pub fn upkeep_identifiers(&self) -> &[UpkeepIdentifier] {
        &self.upkeep_identifiers
    }

    /// The keys to check for this observation, in observation order.
    pub fn upkeep_keys(&self) -> Vec<UpkeepKey> {
        self.upkeep_identifiers
            .iter()
            .map(|id| UpkeepKey::new(self.block_key, *id))
            .collect()
    }
}

impl TryFrom<WireObservation> for UpkeepObservation {
    type Error = KeyError;

    fn try_from(wire: WireObservation) -> Result<Self, Self::Error> {
        let block_key = wire.block_key.parse::<BlockKey>()?;

        let upkeep_identifiers = wire
            .upkeep_identifiers
            .iter()
            .map(|id| id.parse::<UpkeepIdentifier>())
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(block_key, upkeep_identifiers)
    }
}

impl From<UpkeepObservation> for WireObservation {
    fn from(observation: UpkeepObservation) -> Self {
        Self {
            block_key: observation.block_key.to_string(),
            upkeep_identifiers: observation
                .upkeep_identifiers
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
