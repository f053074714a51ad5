use alloy::sol;

// Events introduced by the v2 staking implementation. Everything else is
// emitted with the v1 signatures.
sol! {
    event ChipsMerged(address indexed user, address indexed nodeAddr, uint256 indexed newTokenId, uint256[] burnedTokenIds);
    event NodeTaxRateBasisPointsSet(address indexed nodeAddr, uint64 indexed taxRateBasisPoints);
}
