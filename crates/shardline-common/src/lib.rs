//! # shardline-common
//!
//! Shared utilities: environment configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ApiConfig, AppSettings, CacheConfig, ClientConfig, ConfigError, Environment, GatewayConfig,
    ShardingConfig,
};
pub use telemetry::{
    init_tracing, init_tracing_for, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
