use std::fmt::Display;
use std::fmt::Formatter;

use alloy_primitives::Bytes;
use alloy_primitives::B256;
use alloy_primitives::U256;
use derive_debug_plus::Dbg;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::keys::UpkeepKey;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum UpkeepState {
    Eligible,
    NotEligible,
}

impl Display for UpkeepState {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            UpkeepState::Eligible => write!(f, "eligible"),
            UpkeepState::NotEligible => write!(f, "not_eligible"),
        }
    }
}

/// Mirror of the registry `UpkeepFailureReason` enum.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum UpkeepFailureReason {
    #[default]
    None,
    UpkeepCancelled,
    UpkeepPaused,
    TargetCheckReverted,
    UpkeepNotNeeded,
    PerformDataExceedsLimit,
    InsufficientBalance,
    /// A value this node does not know about, kept verbatim.
    Unknown(u8),
}

impl From<u8> for UpkeepFailureReason {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::UpkeepCancelled,
            2 => Self::UpkeepPaused,
            3 => Self::TargetCheckReverted,
            4 => Self::UpkeepNotNeeded,
            5 => Self::PerformDataExceedsLimit,
            6 => Self::InsufficientBalance,
            other => Self::Unknown(other),
        }
    }
}

impl From<UpkeepFailureReason> for u8 {
    fn from(reason: UpkeepFailureReason) -> Self {
        match reason {
            UpkeepFailureReason::None => 0,
            UpkeepFailureReason::UpkeepCancelled => 1,
            UpkeepFailureReason::UpkeepPaused => 2,
            UpkeepFailureReason::TargetCheckReverted => 3,
            UpkeepFailureReason::UpkeepNotNeeded => 4,
            UpkeepFailureReason::PerformDataExceedsLimit => 5,
            UpkeepFailureReason::InsufficientBalance => 6,
            UpkeepFailureReason::Unknown(other) => other,
        }
    }
}

/// The outcome of checking one upkeep at one block.
#[derive(Clone, Dbg, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpkeepResult {
    pub key: UpkeepKey,

    pub state: UpkeepState,

    /// Payload handed to `performUpkeep`, already unwrapped from the check envelope.
    #[dbg(formatter = crate::result::bytes_pretty)]
    pub perform_data: Bytes,

    /// Gas price signal at check time.
    pub fast_gas_wei: U256,

    /// LINK/native price signal at check time.
    pub link_native: U256,

    /// The block the contract pinned the check to.
    pub check_block_number: u32,

    pub check_block_hash: B256,

    pub failure_reason: UpkeepFailureReason,

    pub gas_used: U256,
}

impl UpkeepResult {
    #[must_use]
    pub fn new(
        key: UpkeepKey,
        state: UpkeepState,
    ) -> Self {
        Self {
            key,
            state,
            perform_data: Bytes::new(),
            fast_gas_wei: U256::ZERO,
            link_native: U256::ZERO,
            check_block_number: 0,
            check_block_hash: B256::ZERO,
            failure_reason: UpkeepFailureReason::None,
            gas_used: U256::ZERO,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.state == UpkeepState::Eligible
    }
}

pub fn bytes_pretty(bytes: &Bytes) -> String {
    match bytes.len() {
        0 => "empty".to_string(),
        len if len <= 8 => bytes.to_string(),
        len => format!("0x{}..({len} bytes)", alloy_primitives::hex::encode(&bytes[..8])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_conversion() {
        for raw in 0u8..=8 {
            let reason = UpkeepFailureReason::from(raw);
            assert_eq!(u8::from(reason), raw);
        }
        assert_eq!(UpkeepFailureReason::from(4), UpkeepFailureReason::UpkeepNotNeeded);
        assert_eq!(UpkeepFailureReason::from(7), UpkeepFailureReason::Unknown(7));
    }

    #[test]
    fn test_debug_shortens_perform_data() {
        let mut result = UpkeepResult::new(UpkeepKey::new(1u64, 2u64), UpkeepState::Eligible);
        result.perform_data = Bytes::from(vec![0xab; 64]);

        let printed = format!("{result:?}");
        assert!(printed.contains("0xabababababababab..(64 bytes)"));
        assert!(result.is_eligible());
    }
}
