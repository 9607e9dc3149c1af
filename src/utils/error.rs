// ============================================================================
// 统一错误类型定义
// 使用 thiserror 派生宏，所有失败路径都保持缓存处于最后一次已知的正确状态
// ============================================================================

use std::fmt;

use thiserror::Error;

/// 被校验的实体类型，用于在校验失败信息中标明来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    ProjectList,
    PackageInfo,
    ScriptEvent,
    FolderError,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::ProjectList => "project_list",
            EntityKind::PackageInfo => "package_info",
            EntityKind::ScriptEvent => "script_event",
            EntityKind::FolderError => "folder_error",
        }
    }
}

/// 单个字段的校验问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// 出错字段路径（如 `id`、`scripts.dev`、`[1].path`）
    pub field: String,
    /// 中文问题描述
    pub problem: String,
}

/// 结构化的校验失败：整份载荷被拒绝，列出全部出错字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub entity: EntityKind,
    pub issues: Vec<FieldIssue>,
}

impl ValidationFailure {
    /// 是否包含指定字段的问题
    pub fn mentions(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }

    /// 所有出错字段名
    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|issue| issue.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 数据无效：", self.entity.as_str())?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("；")?;
            }
            write!(f, "{} {}", issue.field, issue.problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// 同步层统一错误枚举
///
/// 通过 `impl From<SyncError> for String` 保持与返回 `Result<T, String>` 的
/// 命令式调用方的兼容性。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 跨进程载荷结构不符（载荷被丢弃，缓存不变）
    #[error("校验失败：{0}")]
    Validation(#[from] ValidationFailure),

    /// 宿主请求本身失败（触发该请求的操作无效果）
    #[error("宿主请求 {operation} 失败：{message}")]
    HostRequest {
        operation: &'static str,
        message: String,
    },

    /// 添加的文件夹路径已存在于缓存中
    #[error("该文件夹已作为项目添加：{path}")]
    DuplicateProject { path: String },

    /// 初始加载（项目列表请求）失败
    #[error("加载项目列表失败：{0}")]
    LoadFailure(String),

    /// 缓存中不存在该项目
    #[error("项目不存在：{0}")]
    UnknownProject(String),

    /// 项目未定义该脚本
    #[error("项目 {project} 未定义脚本 {script}")]
    UnknownScript { project: String, script: String },

    /// 订阅推送通道失败
    #[error("订阅推送通道 {channel} 失败：{message}")]
    Subscribe {
        channel: &'static str,
        message: String,
    },

    /// 配置文件解析失败
    #[error("配置错误：{0}")]
    Config(String),

    /// 文件系统 IO 错误
    #[error("IO 错误：{0}")]
    Io(#[from] std::io::Error),
}

/// 便捷类型别名，统一项目内的 Result 签名
pub type SyncResult<T> = Result<T, SyncError>;

/// 将 SyncError 转换为 String，供只接受字符串错误的调用方使用
impl From<SyncError> for String {
    fn from(err: SyncError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failure_display_lists_every_field() {
        let failure = ValidationFailure {
            entity: EntityKind::Project,
            issues: vec![
                FieldIssue {
                    field: "id".to_string(),
                    problem: "缺失".to_string(),
                },
                FieldIssue {
                    field: "scripts.dev".to_string(),
                    problem: "应为字符串".to_string(),
                },
            ],
        };

        let text = failure.to_string();
        assert!(text.starts_with("project 数据无效"));
        assert!(text.contains("id 缺失"));
        assert!(text.contains("scripts.dev 应为字符串"));
        assert_eq!(failure.fields(), vec!["id", "scripts.dev"]);
    }

    #[test]
    fn test_sync_error_into_string() {
        let err = SyncError::DuplicateProject {
            path: "/tmp/app".to_string(),
        };
        let text: String = err.into();
        assert!(text.contains("/tmp/app"));
    }
}
