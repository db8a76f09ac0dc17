// src/utils/mod.rs
// Common utility functions

pub mod hash;
pub mod rate_limiter;
pub mod timeout;
pub mod timestamp;

pub use hash::{estimate_tokens, sha256_hash, sha256_hash_bytes};
pub use rate_limiter::RateLimiter;
pub use timeout::with_timeout;
pub use timestamp::{get_timestamp, get_timestamp_millis};
