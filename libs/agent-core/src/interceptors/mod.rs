mod continue_on_max_tokens;
mod error_detector;
mod tool_execution;

pub use continue_on_max_tokens::ContinueOnMaxTokensInterceptor;
pub use error_detector::ExternalErrorDetectorInterceptor;
pub use tool_execution::ToolExecutionInterceptor;
