use ethers::prelude::abigen;

// Generates the bindings for the `DisputeGameFactory` contract.
abigen!(
    DisputeGameFactory,
    r"[
        event DisputeGameCreated(address indexed disputeProxy, uint256 indexed batchIndex, bytes32 indexed rootClaim)
        function createGame(uint256 _batchIndex, bytes32 _claimedRoot) external payable returns (address _proxy)
        function gameCount() external view returns (uint256)
        function gameAtIndex(uint256 _index) external view returns (address)
        function hasActiveDispute(uint256 _batchIndex) external view returns (bool)
    ]"
);

// Generates the bindings for the `OutputOracle` contract.
abigen!(
    OutputOracle,
    r"[
        event OutputProposed(bytes32 indexed outputRoot, uint256 indexed batchIndex, uint256 indexed l2BlockNumber, uint256 timestamp)
        function nextBatchIndex() external view returns (uint256)
        function getOutputRoot(uint256 _batchIndex) external view returns (bytes32)
    ]"
);

// Generates the bindings for the `FaultDisputeGame` contract.
abigen!(
    FaultDisputeGame,
    r"[
        function attack(uint256 _parentIndex, bytes32 _claim) external payable
        function defend(uint256 _parentIndex, bytes32 _claim) external payable
        function step(uint256 _claimIndex, bytes calldata _stateData, bytes calldata _proof, bytes32 _postState) external
        function claimDataLen() external view returns (uint256)
        function claimData(uint256 _index) external view returns ((uint32,bool,address,uint128,bytes32,uint128,uint128))
        function status() external view returns (uint8)
        function rootClaim() external pure returns (bytes32)
        function batchIndex() external view returns (uint256)
        function startingBlock() external view returns (uint256)
        function maxGameDepth() external view returns (uint256)
        function createdAt() external view returns (uint64)
        function gameCreator() external view returns (address)
        function proposer() external view returns (address)
        function canResolve() external view returns (bool)
        function resolve() external returns (uint8)
    ]"
);

// Generates the bindings for the `ZkDisputeGame` contract variant, which
// shares the bisection surface of `FaultDisputeGame` but is resolved with a
// succinct proof instead of a VM step.
abigen!(
    ZkDisputeGame,
    r"[
        function proveBlock(bytes calldata _proofBytes, bytes calldata _publicValues) external
    ]"
);
