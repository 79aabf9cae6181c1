pub mod client;
pub mod error;
pub mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::AlloyChainClient;
pub use client::BatchChainClient;
pub use client::ChainClient;
pub use client::HeadTicker;
pub use error::CallError;
pub use error::ClientError;
pub use error::MultiError;
pub use error::RegistryError;
pub use registry::Registry;
pub use registry::ACTIVE_UPKEEP_ID_BATCH_SIZE;
