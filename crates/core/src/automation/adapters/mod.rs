//! AutomationClient adapter implementations.

mod bridge_client;
pub mod mock_client;

pub use bridge_client::BridgeClient;
pub use mock_client::MockClient;
