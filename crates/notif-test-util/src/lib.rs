// notif-test-util: in-memory coordinator double and a bare WebSocket client,
// shared by unit tests inside `server` and the cross-instance integration
// suite at the workspace root.

pub mod fake_coordinator;
pub mod mock_ws_client;

pub use fake_coordinator::FakeCoordinator;
pub use mock_ws_client::MockWsClient;
