// 导出模块
pub mod common;
pub mod pipeline;

// Re-export error types
pub use common::error::{AppError, Result};
