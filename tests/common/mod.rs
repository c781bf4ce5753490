//! Shared test fixtures.

pub mod mock_peer;

pub use mock_peer::MockPeer;
