//! Runtime configuration loaded from environment variables (§6). No config
//! file is required; every tunable has a default.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn default_service_port() -> u16 {
    8080
}
pub fn default_request_timeout() -> u64 {
    300
}
pub fn default_pool_max_connections() -> usize {
    1000
}
pub fn default_pool_max_keepalive() -> usize {
    200
}
pub fn default_max_continuations() -> u32 {
    5
}
pub fn default_continuation_max_tokens() -> u32 {
    8192
}
pub fn default_base_opus_probability() -> u8 {
    20
}

/// HTTP client pool tuning (§5). HTTP/2 is disabled by default: the upstream
/// treats one multiplexed TCP connection as a single client for admission
/// control, so multiple HTTP/1.1 connections are required instead.
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    pub max_connections: usize,
    pub max_keepalive: usize,
    pub keepalive_expiry: Duration,
    pub use_http2: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub pool_timeout: Duration,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_pool_max_connections(),
            max_keepalive: default_pool_max_keepalive(),
            keepalive_expiry: Duration::from_secs(30),
            use_http2: false,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
            pool_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    pub enabled: bool,
    pub max_continuations: u32,
    pub continuation_max_tokens: u32,
    pub truncated_ending_chars: usize,
    pub min_text_length: usize,
    pub max_consecutive_failures: u32,
    pub trigger_max_tokens: bool,
    pub trigger_incomplete_tool_json: bool,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("CONTINUATION_ENABLED", true),
            max_continuations: default_max_continuations(),
            continuation_max_tokens: default_continuation_max_tokens(),
            truncated_ending_chars: 500,
            min_text_length: 10,
            max_consecutive_failures: 3,
            trigger_max_tokens: true,
            trigger_incomplete_tool_json: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub max_messages: usize,
    pub max_chars: usize,
    pub summary_threshold_chars: usize,
    pub keep_recent: usize,
    pub retry_max_messages: usize,
    pub max_retries: u32,
    pub estimate_threshold_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_chars: 400_000,
            summary_threshold_chars: 60_000,
            keep_recent: 10,
            retry_max_messages: 100,
            max_retries: 2,
            estimate_threshold_chars: 200_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryCacheConfig {
    pub max_entries: usize,
    pub max_age_seconds: u64,
    pub delta_msgs: usize,
    pub delta_chars: usize,
}

impl Default for SummaryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            max_age_seconds: 3600,
            delta_msgs: 5,
            delta_chars: 4000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub enabled: bool,
    pub base_opus_probability: u8,
    pub first_turn_opus_probability: u8,
    pub first_turn_max_messages: usize,
    pub execution_tool_threshold: usize,
    pub execution_sonnet_probability: u8,
    pub opus_max_concurrent: usize,
    pub opus_model: String,
    pub sonnet_model: String,
    pub haiku_model: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("MODEL_ROUTING_ENABLED", true),
            base_opus_probability: env_or("BASE_OPUS_PROBABILITY", default_base_opus_probability()),
            first_turn_opus_probability: 50,
            first_turn_max_messages: 2,
            execution_tool_threshold: 3,
            execution_sonnet_probability: 90,
            opus_max_concurrent: 15,
            opus_model: "claude-opus-4-5-20251101".to_string(),
            sonnet_model: "claude-sonnet-4-5-20250929".to_string(),
            haiku_model: "claude-haiku-4-5".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextEnhancementConfig {
    pub enabled: bool,
    pub max_tokens: usize,
    pub update_interval_messages: usize,
}

impl Default for ContextEnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("CONTEXT_ENHANCEMENT_ENABLED", true),
            max_tokens: 200,
            update_interval_messages: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsyncSummaryConfig {
    pub enabled: bool,
    pub max_pending_tasks: usize,
    pub task_timeout_secs: u64,
    pub model: String,
}

impl Default for AsyncSummaryConfig {
    fn default() -> Self {
        Self {
            enabled: env_bool("ASYNC_SUMMARY_ENABLED", true),
            max_pending_tasks: 50,
            task_timeout_secs: 30,
            model: env_string("SUMMARY_MODEL", "claude-haiku-4-5"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub text_chunk_size: usize,
    pub tool_json_chunk_size: usize,
    pub thinking_chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: 2000,
            tool_json_chunk_size: 2000,
            thinking_chunk_size: 2000,
        }
    }
}

/// Process-wide runtime settings, built once at startup and held behind
/// `Arc<Settings>` in the service's shared state (§5, §9 "mutable globals").
#[derive(Debug, Clone)]
pub struct Settings {
    pub service_port: u16,
    pub request_timeout_secs: u64,
    pub kiro_api_key: String,
    pub kiro_proxy_base: String,
    pub native_tools_enabled: bool,
    pub http_pool: HttpPoolConfig,
    pub continuation: ContinuationConfig,
    pub history: HistoryConfig,
    pub summary_cache: SummaryCacheConfig,
    pub routing: RoutingConfig,
    pub context_enhancement: ContextEnhancementConfig,
    pub async_summary: AsyncSummaryConfig,
    pub streaming: StreamingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_port: env_or("SERVICE_PORT", default_service_port()),
            request_timeout_secs: env_or("REQUEST_TIMEOUT", default_request_timeout()),
            kiro_api_key: env_string("KIRO_API_KEY", ""),
            kiro_proxy_base: env_string("KIRO_PROXY_BASE", "https://kiro.example.internal"),
            native_tools_enabled: env_bool("NATIVE_TOOLS_ENABLED", false),
            http_pool: HttpPoolConfig {
                max_connections: env_or("HTTP_POOL_MAX_CONNECTIONS", default_pool_max_connections()),
                max_keepalive: env_or("HTTP_POOL_MAX_KEEPALIVE", default_pool_max_keepalive()),
                use_http2: env_bool("HTTP_USE_HTTP2", false),
                ..HttpPoolConfig::default()
            },
            continuation: ContinuationConfig::default(),
            history: HistoryConfig::default(),
            summary_cache: SummaryCacheConfig::default(),
            routing: RoutingConfig::default(),
            context_enhancement: ContextEnhancementConfig::default(),
            async_summary: AsyncSummaryConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings {
            kiro_api_key: "k".into(),
            ..Settings::default()
        };
        assert_eq!(s.continuation.max_continuations, 5);
        assert_eq!(s.continuation.continuation_max_tokens, 8192);
        assert_eq!(s.summary_cache.max_entries, 128);
        assert!(!s.http_pool.use_http2);
        assert_eq!(s.routing.base_opus_probability, 20);
    }
}
