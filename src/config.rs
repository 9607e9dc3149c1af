// ============================================================================
// 同步层配置
// 缺失字段的展示默认值、默认包管理器、通知通道容量
// ============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{SyncError, SyncResult};

/// 同步层配置，JSON 文件中缺失的字段取默认值
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// 项目未识别出框架时显示的名称
    pub default_framework: String,
    /// 项目没有描述时的占位文本
    pub default_description: String,
    /// 项目没有状态时的默认（进行中）状态
    pub default_status: String,
    /// 项目未解析出包管理器时执行脚本所用的管理器
    pub default_package_manager: String,
    /// 通知广播通道容量，慢消费者会丢失最早的通知
    pub notice_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            default_framework: "unknown".to_string(),
            default_description: "暂无描述".to_string(),
            default_status: "进行中".to_string(),
            default_package_manager: "npm".to_string(),
            notice_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// 从 JSON 文件读取配置
    ///
    /// # 返回
    /// - `Err(SyncError::Io)`: 文件无法读取
    /// - `Err(SyncError::Config)`: 文件内容不是合法配置
    pub fn load(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        config.validated()
    }

    /// 读取配置；文件不存在时使用默认配置
    pub fn load_or_default(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            log::info!("配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(SyncConfig::default());
        }
        Self::load(path)
    }

    fn validated(self) -> SyncResult<Self> {
        if self.notice_capacity == 0 {
            return Err(SyncError::Config("notice_capacity 必须大于 0".to_string()));
        }
        if self.default_package_manager.trim().is_empty() {
            return Err(SyncError::Config(
                "default_package_manager 不能为空".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{ "default_package_manager": "pnpm" }"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.default_package_manager, "pnpm");
        assert_eq!(config.default_framework, "unknown");
        assert_eq!(config.notice_capacity, 64);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, "{ not json").unwrap();

        let result = SyncConfig::load_or_default(&path);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{ "notice_capacity": 0 }"#).unwrap();

        let err = SyncConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("notice_capacity"));
    }
}
