//! Backend controller against fake and real servers

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use toolhost::backend::{
    BackendConfig, BackendController, BackendKind, BackendState, ServerController,
};

/// Answer every request with 200 and a tiny Ollama-shaped body
async fn always_healthy() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let body = r#"{"models":[]}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_running_server_is_adopted_without_spawning() {
    let port = always_healthy().await;

    for kind in BackendKind::ALL {
        let mut config = BackendConfig::new(kind);
        config.base_url = Some(format!("http://127.0.0.1:{}/v1", port));
        // Would fail loudly if a launch were attempted
        config.executable_path = Some("/nonexistent/backend".to_string());

        let mut controller = BackendController::new(config).unwrap();
        assert!(controller.check_status().await, "{} probe", kind);
        assert!(controller.ensure_server_running().await.unwrap());
        assert_eq!(controller.state(), BackendState::Healthy);
        assert!(controller.child_pid().is_none());
    }
}

#[tokio::test]
async fn test_status_false_on_closed_port_is_bounded() {
    let mut config = BackendConfig::new(BackendKind::LlamaCpp);
    config.base_url = Some(format!("http://127.0.0.1:{}/v1", closed_port()));
    let controller = BackendController::new(config).unwrap();

    let started = std::time::Instant::now();
    assert!(!controller.check_status().await);
    // Two health URLs, each bounded by the probe timeout
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_executable_does_not_spawn() {
    let mut config = BackendConfig::new(BackendKind::Ollama);
    config.base_url = Some(format!("http://127.0.0.1:{}/v1", closed_port()));
    config.executable_path = Some("/nonexistent/ollama".to_string());

    let mut controller = BackendController::new(config).unwrap();
    assert!(!controller.start_server().await.unwrap());
    assert!(controller.child_pid().is_none());
    assert!(matches!(
        controller.state(),
        BackendState::FailedToStart { .. }
    ));
}

#[tokio::test]
#[ignore = "requires a local Ollama install"]
async fn test_real_ollama_lifecycle() {
    let mut config = BackendConfig::new(BackendKind::Ollama);
    config.model = std::env::var("OLLAMA_MODEL").ok();

    let mut controller = BackendController::new(config).unwrap();
    assert!(controller.ensure_server_running().await.unwrap());
    assert!(controller.check_status().await);

    if controller.config().model.is_some() {
        assert!(controller.prepare_model().await);
        assert!(controller.warm_model().await);
    }
}
