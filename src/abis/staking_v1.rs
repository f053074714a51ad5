use alloy::sol;

sol! {
    event Deposited(address indexed nodeAddr, uint256 indexed amount);
    event WithdrawRequested(address indexed nodeAddr, uint256 indexed amount, uint256 indexed requestId);
    event WithdrawalClaimed(uint256 indexed requestId);
    event Staked(address indexed user, address indexed nodeAddr, uint256 amount, uint256 startTokenId, uint256 endTokenId);
    event UnstakeRequested(address indexed user, address indexed nodeAddr, uint256 indexed requestId, uint256 unstakeAmount, uint256[] chipsIds);
    event UnstakeClaimed(uint256 indexed requestId, address indexed nodeAddr, address indexed user, uint256 unstakeAmount);
    event RewardDistributed(uint256 indexed epoch, uint256 startTimestamp, uint256 endTimestamp, address[] nodeAddrs, uint256[] operationRewards, uint256[] stakingRewards, uint256[] taxCollected, uint256[] requestCounts);
    event NodeCreated(uint256 indexed nodeId, address indexed nodeAddr, string name, string description, uint64 taxRateBasisPoints, bool publicGood, bool alpha);
    event NodeUpdated(address indexed nodeAddr, string name, string description);

    #[sol(rpc)]
    interface IStaking {
        function getChipInfo(uint256 chipId) external view returns (address nodeAddr, uint256 tokens);
    }
}
