pub mod gateway;
pub mod etherscan;

pub use gateway::ChainDataGateway;
#[cfg(test)]
pub use gateway::MockChainDataGateway;
pub use etherscan::EtherscanGateway;
