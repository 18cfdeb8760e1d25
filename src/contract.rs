//! ABI of the sample counter contract the monitor drives and watches.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface ISampleCounter {
        event Added(uint256 amount, uint256 total);
        event Subtracted(uint256 amount, uint256 total);

        function add(uint256 amount) external;
        function sub(uint256 amount) external;
        function total() external view returns (uint256);
    }
}
