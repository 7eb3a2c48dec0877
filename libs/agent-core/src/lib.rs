//! C3 Loop Interceptor Chain + C5 Agent Runner (§4.3, §4.5): the outer
//! reason-and-act loop and the ordered post-inference processors that drive
//! it turn to turn.

pub mod attachments;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod interceptors;
pub mod retry;
pub mod runner;

pub use attachments::{AttachmentCache, NoAttachmentCache};
pub use config::{RetryConfig, RunnerConfig, StaticSystemPrompt, SystemPromptLoader};
pub use error::RunnerError;
pub use interceptor::{ChainAborted, Decision, InterceptResult, Interceptor, InterceptorContext, run_chain};
pub use interceptors::{ContinueOnMaxTokensInterceptor, ExternalErrorDetectorInterceptor, ToolExecutionInterceptor};
pub use retry::{RetryDelay, RetryDelaySource, exponential_backoff_ms, parse_retry_delay_from_headers, resolve_retry_delay_ms};
pub use runner::{SharedHistory, TaskRunner};
