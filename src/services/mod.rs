// ============================================================================
// 业务层：纯 Rust 核心逻辑
// ✅ 特点：只依赖 Host trait，不依赖具体宿主实现，方便写 #[test]
// ⛔ 禁止：直接返回展示层专用的错误格式
// ============================================================================

pub mod ingestion;
pub mod notifier;
pub mod project_cache;
pub mod schema;
pub mod script_output;
