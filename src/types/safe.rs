use alloy::sol;

sol! {
    /// The subset of the Safe singleton used by the relay.
    #[sol(rpc)]
    #[derive(Debug)]
    interface ISafe {
        event ExecutionSuccess(bytes32 txHash, uint256 payment);
        event ExecutionFailure(bytes32 txHash, uint256 payment);

        function setup(
            address[] calldata _owners,
            uint256 _threshold,
            address to,
            bytes calldata data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address paymentReceiver
        ) external;

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes calldata signatures
        ) external payable returns (bool success);

        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function nonce() external view returns (uint256);
    }

    /// The Safe proxy factory.
    #[sol(rpc)]
    #[derive(Debug)]
    interface IProxyFactory {
        event ProxyCreation(address proxy);

        function createProxyWithNonce(
            address _mastercopy,
            bytes memory initializer,
            uint256 saltNonce
        ) external returns (address proxy);

        function proxyCreationCode() external pure returns (bytes memory);
    }

    /// EIP-712 struct signed by Safe owners.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}
