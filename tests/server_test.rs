//! Integration tests for the logger's HTTP control surface

#[cfg(feature = "server")]
mod server_tests {
    use airlogger::config::Config;
    use airlogger::server::{run, ServerConfig};
    use airlogger::sink::csv_sink_factory;
    use airlogger::{create_shared_stats, SessionController, SourceSet};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_log_dir() -> PathBuf {
        std::env::temp_dir().join(format!("airlogger-server-test-{}", uuid::Uuid::new_v4()))
    }

    fn test_controller(log_dir: PathBuf) -> Arc<SessionController> {
        let mut config = Config::default().simulated();
        config.tick_interval = Duration::from_millis(20);
        config.log_dir = log_dir.clone();
        let sinks = csv_sink_factory(log_dir, false);
        Arc::new(SessionController::new(
            config,
            SourceSet::simulated(),
            sinks,
            create_shared_stats(),
        ))
    }

    async fn post(client: &reqwest::Client, url: String) -> (reqwest::StatusCode, serde_json::Value) {
        let response = client.post(url).send().await.expect("Failed to send request");
        let status = response.status();
        let body = response.json().await.expect("Failed to parse JSON");
        (status, body)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let log_dir = test_log_dir();
        let config = ServerConfig::new(0, test_controller(log_dir.clone()));

        // Start server
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let response = client
            .get(format!("http://{}/state", addr))
            .send()
            .await
            .expect("Failed to send request");
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["state"], "idle");

        // Shutdown server
        let _ = shutdown_tx.send(());
        let _ = std::fs::remove_dir_all(&log_dir);
    }

    #[tokio::test]
    async fn test_control_lifecycle() {
        let log_dir = test_log_dir();
        let config = ServerConfig::new(0, test_controller(log_dir.clone()));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();

        // Nothing to pause yet
        let (status, body) = post(&client, format!("http://{}/control/pause", addr)).await;
        assert!(status.is_success());
        assert_eq!(body["transition"]["outcome"], "ignored");
        assert_eq!(body["state"], "idle");

        let response = client
            .get(format!("http://{}/latest", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let (status, body) = post(&client, format!("http://{}/control/start", addr)).await;
        assert!(status.is_success());
        assert_eq!(body["transition"]["outcome"], "applied");
        assert_eq!(body["state"], "collecting");

        tokio::time::sleep(Duration::from_millis(200)).await;

        let response = client
            .get(format!("http://{}/latest", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let record: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert!(record["tick"].as_u64().unwrap_or(0) >= 1);
        assert!(record.get("cpu_temp").is_some());

        let response = client
            .get(format!("http://{}/status", addr))
            .send()
            .await
            .expect("Failed to send request");
        let status_body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(status_body["state"], "collecting");
        assert_eq!(status_body["sources"].as_array().map(|s| s.len()), Some(3));
        assert!(status_body["log_path"].as_str().is_some());

        let (status, body) = post(&client, format!("http://{}/control/stop", addr)).await;
        assert!(status.is_success());
        assert_eq!(body["state"], "stopped");

        // Shutdown server
        let _ = shutdown_tx.send(());
        let _ = std::fs::remove_dir_all(&log_dir);
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected() {
        let log_dir = test_log_dir();
        let config = ServerConfig::new(0, test_controller(log_dir.clone()));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let (status, body) = post(&client, format!("http://{}/control/launch", addr)).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "UNKNOWN_EVENT");

        let _ = shutdown_tx.send(());
        let _ = std::fs::remove_dir_all(&log_dir);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let log_dir = test_log_dir();
        let config = ServerConfig::new(0, test_controller(log_dir.clone()));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/control/start", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
        let _ = std::fs::remove_dir_all(&log_dir);
    }
}
