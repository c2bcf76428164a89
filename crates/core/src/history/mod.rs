//! Bounded-context history management (§4.3): the shared LRU summary cache
//! and the four trimming strategies that use it.

pub mod cache;
pub mod manager;

pub use cache::SummaryCache;
pub use manager::{
    auto_truncate, error_retry, estimated_tokens_over_budget, is_content_length_error,
    needs_trimming, smart_summary, total_chars, HistoryStrategy, TrimOutcome,
};
