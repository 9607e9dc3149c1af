// ============================================================================
// [总线] 程序的组装车间
// ✅ 只能做：pub mod 暴露子模块、重新导出对外类型
// ⛔ 禁止：直接实现同步逻辑
// ============================================================================

pub mod commands;
pub mod config;
pub mod facade;
pub mod host;
pub mod models;
pub mod services;
pub mod utils;

pub use config::SyncConfig;
pub use facade::{SyncChange, SyncFacade, SyncSubscriber};
pub use host::memory::MemoryHost;
pub use host::{Delivery, Host, HostRequest, PushChannel, Subscription};
pub use models::dtos::{
    LoadReport, Notice, NoticeLevel, OutputChunk, OutputStream, PackageInfo, Project,
    ProjectEdit, SyncState, SyncStatus,
};
pub use services::ingestion::LoadGate;
pub use utils::error::{SyncError, SyncResult, ValidationFailure};
