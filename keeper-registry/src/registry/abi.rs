//! The subset of the keeper registry v2.0 interface the node calls.

alloy::sol! {
    interface IKeeperRegistry {
        #[derive(Default, Debug)]
        struct State {
            uint32 nonce;
            uint96 ownerLinkBalance;
            uint256 expectedLinkBalance;
            uint96 totalPremium;
            uint256 numUpkeeps;
            uint32 configCount;
            uint32 latestConfigBlockNumber;
            bytes32 latestConfigDigest;
            uint32 latestEpoch;
            bool paused;
        }

        #[derive(Default, Debug)]
        struct OnchainConfig {
            uint32 paymentPremiumPPB;
            uint32 flatFeeMicroLink;
            uint32 checkGasLimit;
            uint24 stalenessSeconds;
            uint16 gasCeilingMultiplier;
            uint96 minUpkeepSpend;
            uint32 maxPerformGas;
            uint32 maxCheckDataSize;
            uint32 maxPerformDataSize;
            uint256 fallbackGasPrice;
            uint256 fallbackLinkPrice;
            address transcoder;
            address registrar;
        }

        function getState()
            external
            view
            returns (
                State memory state,
                OnchainConfig memory config,
                address[] memory signers,
                address[] memory transmitters,
                uint8 f
            );

        function getActiveUpkeepIDs(uint256 startIndex, uint256 maxCount)
            external
            view
            returns (uint256[] memory);

        function checkUpkeep(uint256 id)
            external
            returns (
                bool upkeepNeeded,
                bytes memory performData,
                uint8 upkeepFailureReason,
                uint256 gasUsed,
                uint256 fastGasWei,
                uint256 linkNative
            );

        function simulatePerformUpkeep(uint256 id, bytes calldata performData)
            external
            returns (bool success, uint256 gasUsed);
    }
}
