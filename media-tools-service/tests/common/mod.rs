#![allow(dead_code)]

use media_tools_service::config::{
    MediaToolsConfig, MongoConfig, RateLimitConfig, RedisConfig, ResolverConfig, UsageConfig,
    UsageStoreKind,
};
use media_tools_service::services::InMemoryUsageStore;
use media_tools_service::startup::Application;
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
}

pub fn test_config() -> MediaToolsConfig {
    MediaToolsConfig {
        common: CoreConfig {
            port: 0,
            environment: "test".to_string(),
        },
        usage: UsageConfig {
            store: UsageStoreKind::Memory,
            limit: 2,
            window_secs: 3600,
        },
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "media_tools_test".to_string(),
        },
        redis: RedisConfig {
            url: "redis://localhost:6379".to_string(),
        },
        resolver: ResolverConfig {
            timeout_secs: 5,
            ..ResolverConfig::default()
        },
        rate_limit: RateLimitConfig {
            tiktok_per_minute: 0,
            trusted_proxies: Vec::new(),
        },
        otlp_endpoint: None,
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: MediaToolsConfig) -> Self {
        let app = Application::build_with_store(config, Arc::new(InMemoryUsageStore::new()))
            .await
            .expect("Failed to build test application");

        let port = app.http_port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
        }
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
