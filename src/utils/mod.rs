// ============================================================================
// 通用工具：错误类型
// ============================================================================

pub mod error;
