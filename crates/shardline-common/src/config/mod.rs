//! Configuration structs

mod client_config;

pub use client_config::{
    ApiConfig, AppSettings, CacheConfig, ClientConfig, ConfigError, Environment, GatewayConfig,
    ShardingConfig,
};
