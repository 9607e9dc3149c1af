// ============================================================================
// 数据传输对象（DTO）定义
// 同步层与展示层之间流转的数据结构，仅包含字段定义、序列化派生和取默认值的访问器
// ⛔ 禁止：包含缓存变更或宿主调用逻辑
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::SyncConfig;

/// 脚本名称 → 命令
pub type ScriptMap = BTreeMap<String, String>;

/// 项目信息：一个本地登记的项目目录
///
/// 可选字段保留"缺失"语义，默认值只在读取时通过 `*_or_default` 访问器填充。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// 宿主生成的唯一标识，事件与脚本输出都以它关联
    pub id: String,
    pub name: String,
    /// 项目目录的绝对路径，也是"文件夹已添加"事件的去重键
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// 由宿主从 package.json 旁的锁文件推断出的包管理器
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default)]
    pub scripts: ScriptMap,
}

impl Project {
    /// 仅包含必填字段的项目
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Project {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            framework: None,
            framework_url: None,
            description: None,
            status: None,
            package_manager: None,
            scripts: ScriptMap::new(),
        }
    }

    pub fn framework_or_default<'a>(&'a self, config: &'a SyncConfig) -> &'a str {
        self.framework
            .as_deref()
            .unwrap_or(config.default_framework.as_str())
    }

    pub fn description_or_default<'a>(&'a self, config: &'a SyncConfig) -> &'a str {
        self.description
            .as_deref()
            .unwrap_or(config.default_description.as_str())
    }

    pub fn status_or_default<'a>(&'a self, config: &'a SyncConfig) -> &'a str {
        self.status
            .as_deref()
            .unwrap_or(config.default_status.as_str())
    }

    pub fn package_manager_or_default<'a>(&'a self, config: &'a SyncConfig) -> &'a str {
        self.package_manager
            .as_deref()
            .unwrap_or(config.default_package_manager.as_str())
    }

    /// 用包信息整体替换脚本与包管理器（不做逐字段合并）
    pub fn merge_package_info(&mut self, info: PackageInfo) {
        self.package_manager = info.manager;
        self.scripts = info.scripts.unwrap_or_default();
    }
}

/// 包信息：宿主读取清单文件得到，只在拉取时合并进 Project，不单独存储
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub manager: Option<String>,
    pub scripts: Option<ScriptMap>,
}

/// 本地编辑：每个 `Some` 字段覆盖原值（字段级后写入者胜出）
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub framework: Option<String>,
}

impl ProjectEdit {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.framework.is_none()
    }

    pub fn apply_to(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.clone();
        }
        if let Some(description) = &self.description {
            project.description = Some(description.clone());
        }
        if let Some(status) = &self.status {
            project.status = Some(status.clone());
        }
        if let Some(framework) = &self.framework {
            project.framework = Some(framework.clone());
        }
    }
}

/// 脚本输出来源：`script_output` 为标准输出，`script_error` 为标准错误
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// 推送通道上的一条脚本输出事件
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEvent {
    pub project_id: String,
    pub output: String,
}

/// 脚本输出的一个片段（通常是一行）
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl OutputChunk {
    pub fn new(stream: OutputStream, text: impl Into<String>) -> Self {
        OutputChunk {
            stream,
            text: text.into(),
            received_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.stream == OutputStream::Stderr
    }
}

/// 通知级别
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// 发往展示层的瞬时通知（toast）
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// 加载与错误状态（不含项目列表）
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_loading: bool,
    pub error: Option<String>,
}

/// 门面对外暴露的读模型
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub projects: Arc<Vec<Project>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// 一次 `load()` 的结果
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// 写入缓存的项目数量
    pub loaded: usize,
    /// 包信息获取失败、以空脚本降级保留的项目 id
    pub degraded: Vec<String>,
    /// 宿主列表中重复 id / path 而被丢弃的项目 id
    pub dropped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_only_at_read_time() {
        let config = SyncConfig::default();
        let project = Project::new("p1", "shop", "/work/shop");

        assert_eq!(project.framework, None);
        assert_eq!(project.framework_or_default(&config), "unknown");
        assert_eq!(project.description_or_default(&config), config.default_description);
        assert_eq!(project.status_or_default(&config), config.default_status);
        assert_eq!(project.package_manager_or_default(&config), "npm");
    }

    #[test]
    fn test_merge_package_info_replaces_scripts_wholesale() {
        let mut project = Project::new("p1", "shop", "/work/shop");
        project.scripts.insert("old".to_string(), "echo old".to_string());
        project.package_manager = Some("yarn".to_string());

        let mut scripts = ScriptMap::new();
        scripts.insert("dev".to_string(), "vite".to_string());
        project.merge_package_info(PackageInfo {
            manager: Some("pnpm".to_string()),
            scripts: Some(scripts),
        });

        assert_eq!(project.package_manager.as_deref(), Some("pnpm"));
        assert_eq!(project.scripts.len(), 1);
        assert!(project.scripts.contains_key("dev"));

        project.merge_package_info(PackageInfo::default());
        assert_eq!(project.package_manager, None);
        assert!(project.scripts.is_empty());
    }

    #[test]
    fn test_project_edit_overwrites_only_given_fields() {
        let mut project = Project::new("p1", "shop", "/work/shop");
        project.description = Some("old".to_string());

        let edit = ProjectEdit {
            status: Some("已完成".to_string()),
            ..ProjectEdit::default()
        };
        edit.apply_to(&mut project);

        assert_eq!(project.name, "shop");
        assert_eq!(project.description.as_deref(), Some("old"));
        assert_eq!(project.status.as_deref(), Some("已完成"));
        assert!(!edit.is_empty());
        assert!(ProjectEdit::default().is_empty());
    }

    #[test]
    fn test_project_serializes_camel_case() {
        let mut project = Project::new("p1", "shop", "/work/shop");
        project.package_manager = Some("bun".to_string());
        let json = serde_json::to_value(&project).unwrap();

        assert_eq!(json["packageManager"], "bun");
        assert!(json.get("frameworkUrl").is_none());
    }
}
