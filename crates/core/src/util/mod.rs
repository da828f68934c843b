pub mod lazy;
pub mod retry;

pub use lazy::LazyModel;
pub use retry::{is_http_retryable, retry_with_backoff, RetryConfig};
