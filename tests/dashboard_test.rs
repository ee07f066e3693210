#[cfg(test)]
mod dashboard_tests {
    use minika::api_registry::ApiRegistry;
    use minika::dashboard::{has_metrics_changed, router, start_dashboard};
    use minika::metrics::MetricsCollector;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    async fn serve_dashboard(metrics: Arc<MetricsCollector>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(metrics, Arc::new(ApiRegistry::default()));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .expect("dashboard response timed out")
            .unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn test_versions_endpoint_lists_registry() {
        let addr = serve_dashboard(Arc::new(MetricsCollector::new())).await;

        let response = http_get(addr, "/api/versions").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        let ranges = concat!(
            r#"[{"api_key":18,"min_version":0,"max_version":4},"#,
            r#"{"api_key":75,"min_version":0,"max_version":0}]"#,
        );
        assert!(response.contains(ranges));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_counters() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record_request(18, "ApiVersions", 0).await;
        let addr = serve_dashboard(metrics).await;

        let response = http_get(addr, "/api/metrics").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""total_requests":1"#));
        assert!(response.contains(r#""name":"ApiVersions""#));
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let metrics = Arc::new(MetricsCollector::new());

        // Simulate some activity
        metrics.increment_connections().await;
        metrics.record_request(18, "ApiVersions", 0).await;
        metrics.record_request(75, "DescribeTopicPartitions", 3).await;
        metrics.increment_dropped_requests().await;

        let all_metrics = metrics.get_all_metrics().await;

        assert_eq!(all_metrics.broker.active_connections, 1);
        assert_eq!(all_metrics.broker.total_requests, 3);
        assert_eq!(all_metrics.broker.dropped_requests, 1);
        assert_eq!(all_metrics.apis.len(), 2);
        assert_eq!(all_metrics.apis[&75].name, "DescribeTopicPartitions");
    }

    #[tokio::test]
    async fn test_change_detection() {
        let metrics = MetricsCollector::new();
        let before = metrics.get_all_metrics().await;
        assert!(!has_metrics_changed(&before, &metrics.get_all_metrics().await));

        metrics.increment_malformed_frames().await;
        assert!(has_metrics_changed(&before, &metrics.get_all_metrics().await));
    }

    #[tokio::test]
    async fn test_dashboard_bind_failure_is_reported() {
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(ApiRegistry::default());

        let result = start_dashboard("not-an-address", metrics, registry).await;
        assert!(result.is_err());
    }
}
