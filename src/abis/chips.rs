use alloy::sol;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    #[sol(rpc)]
    interface IChips {
        function tokenURI(uint256 tokenId) external view returns (string memory);
    }
}
