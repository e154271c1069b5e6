//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;

use keygate::config::{Config, ResourceConfig, ServerConfig};
use keygate::server::AppState;

/// API key accepted by the test configuration
pub const TEST_KEY: &str = "test-admin-key";

/// Header carrying the API key in the test configuration
pub const TEST_HEADER: &str = "X-API-Key";

/// Create a test configuration with authentication enabled
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.auth.enabled = true;
    config.auth.keys = vec![TEST_KEY.to_string()];
    config.lockout.max_attempts = 3;
    config.lockout.lockout_duration_secs = 60;
    config.document.title = "test-api".to_string();
    config.document.resources = vec![
        ResourceConfig {
            name: "items".to_string(),
            operations: vec!["get".to_string(), "post".to_string()],
        },
        ResourceConfig {
            name: "orders".to_string(),
            operations: vec!["get".to_string()],
        },
    ];
    config
}

/// Create a test application state from the test configuration
pub fn create_test_state() -> AppState {
    AppState::from_config(&create_test_config())
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0, // Let OS assign a free port
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(state: AppState) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = keygate::server::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start (100ms is sufficient for slow CI systems)
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

/// Send a GET request with an optional API key
pub async fn get_with_key(addr: SocketAddr, path: &str, key: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new().get(format!("http://{}{}", addr, path));
    if let Some(key) = key {
        request = request.header(TEST_HEADER, key);
    }
    request.send().await.expect("Failed to send request")
}
