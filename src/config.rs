//! Configuration module for FetchForge
//!
//! This module handles loading and validating configuration from environment
//! variables, providing strongly-typed configuration structures for all
//! application components.

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure for FetchForge
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct Config {
    /// HTTP server configuration
    #[serde(flatten)]
    #[envconfig(nested)]
    pub server: ServerConfig,

    /// Redis connection configuration
    #[serde(flatten)]
    #[envconfig(nested)]
    pub redis: RedisConfig,

    /// Work queue list names
    #[serde(flatten)]
    #[envconfig(nested)]
    pub queues: QueueConfig,

    /// Consumer tuning configuration
    #[serde(flatten)]
    #[envconfig(nested)]
    pub consumer: ConsumerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct ServerConfig {
    /// Host to bind to
    #[envconfig(from = "HOST", default = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    /// Log level
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,

    /// Request timeout in seconds
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct RedisConfig {
    /// Redis host
    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub host: String,

    /// Redis port
    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub port: u16,

    /// Optional Redis password
    #[envconfig(from = "REDIS_PASSWORD")]
    pub password: Option<String>,

    /// Per-command timeout in milliseconds
    #[envconfig(from = "REDIS_TIMEOUT_MS", default = "4000")]
    pub timeout_ms: u64,

    /// Maximum number of concurrently active commands
    #[envconfig(from = "REDIS_MAX_ACTIVE", default = "20")]
    pub max_active: usize,
}

impl RedisConfig {
    /// Get command timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the Redis connection URL
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }

    /// Connection URL with the password masked for logging
    pub fn masked_url(&self) -> String {
        match &self.password {
            Some(_) => format!("redis://:***@{}:{}", self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Names of the three Redis lists that make up the reliable work queue
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct QueueConfig {
    /// List holding ready work units
    #[envconfig(from = "WORK_QUEUE")]
    pub work_queue: String,

    /// List holding claimed but unsettled work units
    #[envconfig(from = "WORKING_QUEUE")]
    pub working_queue: String,

    /// List holding settled outcomes
    #[envconfig(from = "COMPLETE_QUEUE")]
    pub complete_queue: String,
}

/// Consumer tuning configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct ConsumerConfig {
    /// Per-unit fetch wait in milliseconds
    #[envconfig(from = "FETCH_TIMEOUT_MS", default = "10000")]
    pub fetch_timeout_ms: u64,

    /// Number of worker tasks
    #[envconfig(from = "CONSUMER_THREADS", default = "1")]
    pub consumer_threads: usize,

    /// Capacity of the internal pool queue between dispatcher and workers
    #[envconfig(from = "CONSUMER_QUEUE_LIMIT", default = "10")]
    pub queue_limit: usize,

    /// Capacity of the downstream message channel
    #[envconfig(from = "MSG_CHANNEL_CAPACITY", default = "100")]
    pub message_channel_capacity: usize,

    /// Maximum broker reconnect attempts before a connection is poisoned
    #[envconfig(from = "RECONNECT_MAX_ATTEMPTS", default = "3")]
    pub reconnect_max_attempts: u32,

    /// Grace period for worker pool shutdown in milliseconds
    #[envconfig(from = "SHUTDOWN_TIMEOUT_MS", default = "10000")]
    pub shutdown_timeout_ms: u64,
}

impl ConsumerConfig {
    /// Get fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Get pool shutdown grace period as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        // Parse configuration from environment
        Config::init_from_env().map_err(Error::from)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("Server port cannot be 0"));
        }

        if self.redis.host.is_empty() {
            return Err(Error::config("Redis host cannot be empty"));
        }

        if self.queues.work_queue.is_empty()
            || self.queues.working_queue.is_empty()
            || self.queues.complete_queue.is_empty()
        {
            return Err(Error::config("Queue names cannot be empty"));
        }

        if self.queues.work_queue == self.queues.working_queue
            || self.queues.work_queue == self.queues.complete_queue
            || self.queues.working_queue == self.queues.complete_queue
        {
            return Err(Error::config("Queue names must be distinct"));
        }

        if self.consumer.consumer_threads == 0 {
            return Err(Error::config("Consumer thread count must be at least 1"));
        }

        if self.consumer.queue_limit == 0 {
            return Err(Error::config("Consumer queue limit must be at least 1"));
        }

        Ok(())
    }

    /// Log configuration (with sensitive data masked)
    pub fn log_config(&self) {
        tracing::info!(
            server_address = %self.server.address(),
            environment = %self.server.environment,
            log_level = %self.server.log_level,
            "Server configuration"
        );

        tracing::info!(
            url = %self.redis.masked_url(),
            timeout_ms = %self.redis.timeout_ms,
            max_active = %self.redis.max_active,
            "Redis configuration"
        );

        tracing::info!(
            work_queue = %self.queues.work_queue,
            working_queue = %self.queues.working_queue,
            complete_queue = %self.queues.complete_queue,
            "Queue configuration"
        );

        tracing::info!(
            workers = %self.consumer.consumer_threads,
            queue_limit = %self.consumer.queue_limit,
            fetch_timeout_ms = %self.consumer.fetch_timeout_ms,
            "Consumer configuration"
        );
    }
}
