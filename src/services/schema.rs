// ============================================================================
// 载荷校验：把跨进程边界的未受信 JSON 解析为强类型实体
// 纯函数，不依赖宿主与缓存；校验是整体的：任一字段不合法即拒绝整份载荷
// ============================================================================

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::models::dtos::{PackageInfo, Project, ScriptEvent, ScriptMap};
use crate::utils::error::{EntityKind, FieldIssue, ValidationFailure};

const MISSING: &str = "缺失";
const EMPTY: &str = "不能为空";
const NOT_STRING: &str = "应为字符串";
const NOT_OBJECT: &str = "应为对象";
const NOT_URL: &str = "应为合法的 URL";

fn url_pattern() -> Option<&'static Regex> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/?#]+\S*$")
            .map_err(|e| log::warn!("URL 正则编译失败，跳过 URL 校验：{}", e))
            .ok()
    })
    .as_ref()
}

// ============================================================================
// 字段读取器
// ============================================================================

/// 在 JSON 对象上逐字段读取并收集问题，而不是遇到第一个错误就返回
///
/// 每个字段可有多个别名（snake_case / camelCase），第一个别名作为报告用的字段名。
/// 值为 `null` 的可选字段视为缺失。
struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    prefix: String,
    issues: Vec<FieldIssue>,
}

impl<'a> FieldReader<'a> {
    fn new(map: &'a Map<String, Value>, prefix: impl Into<String>) -> Self {
        FieldReader {
            map,
            prefix: prefix.into(),
            issues: Vec::new(),
        }
    }

    fn report(&mut self, field: &str, problem: &str) {
        self.issues.push(FieldIssue {
            field: format!("{}{}", self.prefix, field),
            problem: problem.to_string(),
        });
    }

    fn lookup(&self, keys: &[&str]) -> Option<&'a Value> {
        let map = self.map;
        keys.iter()
            .filter_map(move |key| map.get(*key))
            .find(|value| !value.is_null())
    }

    fn required_str(&mut self, keys: &[&str]) -> Option<String> {
        match self.lookup(keys) {
            None => {
                self.report(keys[0], MISSING);
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.report(keys[0], EMPTY);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.report(keys[0], NOT_STRING);
                None
            }
        }
    }

    /// 必填但允许空字符串（如项目名称）
    fn required_any_str(&mut self, keys: &[&str]) -> Option<String> {
        match self.lookup(keys) {
            None => {
                self.report(keys[0], MISSING);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.report(keys[0], NOT_STRING);
                None
            }
        }
    }

    fn optional_str(&mut self, keys: &[&str]) -> Option<String> {
        match self.lookup(keys) {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.report(keys[0], NOT_STRING);
                None
            }
        }
    }

    fn optional_url(&mut self, keys: &[&str]) -> Option<String> {
        let url = self.optional_str(keys)?;
        match url_pattern() {
            Some(pattern) if !pattern.is_match(&url) => {
                self.report(keys[0], NOT_URL);
                None
            }
            _ => Some(url),
        }
    }

    fn optional_scripts(&mut self, keys: &[&str]) -> Option<ScriptMap> {
        match self.lookup(keys)? {
            Value::Object(entries) => {
                let mut scripts = ScriptMap::new();
                for (name, command) in entries {
                    match command {
                        Value::String(command) => {
                            scripts.insert(name.clone(), command.clone());
                        }
                        _ => self.report(&format!("{}.{}", keys[0], name), NOT_STRING),
                    }
                }
                Some(scripts)
            }
            _ => {
                self.report(keys[0], NOT_OBJECT);
                None
            }
        }
    }

    fn finish<T>(self, entity: EntityKind, value: Option<T>) -> Result<T, ValidationFailure> {
        match value {
            Some(value) if self.issues.is_empty() => Ok(value),
            _ => Err(ValidationFailure {
                entity,
                issues: self.issues,
            }),
        }
    }
}

fn root_failure(entity: EntityKind, problem: &str) -> ValidationFailure {
    ValidationFailure {
        entity,
        issues: vec![FieldIssue {
            field: "$".to_string(),
            problem: problem.to_string(),
        }],
    }
}

/// 载荷可能是序列化后的 JSON 字符串（宿主以 `to_string` 推送），先尝试解开一层
fn unwrap_embedded(payload: &Value) -> Cow<'_, Value> {
    if let Value::String(text) = payload {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(decoded) = serde_json::from_str::<Value>(text) {
                return Cow::Owned(decoded);
            }
        }
    }
    Cow::Borrowed(payload)
}

// ============================================================================
// 实体解析
// ============================================================================

fn read_project(map: &Map<String, Value>, prefix: &str) -> Result<Project, Vec<FieldIssue>> {
    let mut reader = FieldReader::new(map, prefix);

    let id = reader.required_str(&["id"]);
    let name = reader.required_any_str(&["name"]);
    let path = reader.required_str(&["path"]);
    let framework = reader.optional_str(&["framework"]);
    let framework_url = reader.optional_url(&["framework_url", "frameworkUrl"]);
    let description = reader.optional_str(&["description"]);
    let status = reader.optional_str(&["status"]);
    let package_manager = reader.optional_str(&["package_manager", "packageManager"]);
    let scripts = reader.optional_scripts(&["scripts"]);

    match (id, name, path) {
        (Some(id), Some(name), Some(path)) if reader.issues.is_empty() => Ok(Project {
            id,
            name,
            path,
            framework,
            framework_url,
            description,
            status,
            package_manager,
            scripts: scripts.unwrap_or_default(),
        }),
        _ => Err(reader.issues),
    }
}

/// 解析单个项目
pub fn parse_project(payload: &Value) -> Result<Project, ValidationFailure> {
    let payload = unwrap_embedded(payload);
    let Value::Object(map) = payload.as_ref() else {
        return Err(root_failure(EntityKind::Project, NOT_OBJECT));
    };
    read_project(map, "").map_err(|issues| ValidationFailure {
        entity: EntityKind::Project,
        issues,
    })
}

/// 解析项目列表；任一元素不合法则整体拒绝，问题字段带 `[下标].` 前缀
pub fn parse_project_list(payload: &Value) -> Result<Vec<Project>, ValidationFailure> {
    let payload = unwrap_embedded(payload);
    let Value::Array(items) = payload.as_ref() else {
        return Err(root_failure(EntityKind::ProjectList, "应为数组"));
    };

    let mut projects = Vec::with_capacity(items.len());
    let mut issues = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let prefix = format!("[{}].", index);
        match item {
            Value::Object(map) => match read_project(map, &prefix) {
                Ok(project) => projects.push(project),
                Err(item_issues) => issues.extend(item_issues),
            },
            _ => issues.push(FieldIssue {
                field: format!("[{}]", index),
                problem: NOT_OBJECT.to_string(),
            }),
        }
    }

    if issues.is_empty() {
        Ok(projects)
    } else {
        Err(ValidationFailure {
            entity: EntityKind::ProjectList,
            issues,
        })
    }
}

/// 解析包信息；`null` 表示宿主未找到清单文件，两个字段均缺失
pub fn parse_package_info(payload: &Value) -> Result<PackageInfo, ValidationFailure> {
    let payload = unwrap_embedded(payload);
    let map = match payload.as_ref() {
        Value::Null => return Ok(PackageInfo::default()),
        Value::Object(map) => map,
        _ => return Err(root_failure(EntityKind::PackageInfo, NOT_OBJECT)),
    };

    let mut reader = FieldReader::new(map, "");
    let manager = reader.optional_str(&["manager"]);
    let scripts = reader.optional_scripts(&["scripts"]);
    reader.finish(EntityKind::PackageInfo, Some(PackageInfo { manager, scripts }))
}

/// 解析脚本输出事件
///
/// 项目 id 接受 `projectId` / `project_id` / `id` 三种写法，
/// 值可以是字符串或非负整数（整数统一转为十进制字符串）。
pub fn parse_script_event(payload: &Value) -> Result<ScriptEvent, ValidationFailure> {
    let payload = unwrap_embedded(payload);
    let Value::Object(map) = payload.as_ref() else {
        return Err(root_failure(EntityKind::ScriptEvent, NOT_OBJECT));
    };

    let mut reader = FieldReader::new(map, "");
    let keys = ["projectId", "project_id", "id"];
    let project_id = match reader.lookup(&keys) {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => Some(n.to_string()),
            None => {
                reader.report(keys[0], "应为非负整数或字符串");
                None
            }
        },
        _ => reader.required_str(&keys),
    };
    let output = reader.required_any_str(&["output"]);

    let event = match (project_id, output) {
        (Some(project_id), Some(output)) => Some(ScriptEvent { project_id, output }),
        _ => None,
    };
    reader.finish(EntityKind::ScriptEvent, event)
}

/// 解析文件夹添加失败事件：载荷为错误描述字符串
pub fn parse_folder_error(payload: &Value) -> Result<String, ValidationFailure> {
    match payload {
        Value::String(message) if !message.trim().is_empty() => Ok(message.clone()),
        Value::String(_) => Err(root_failure(EntityKind::FolderError, EMPTY)),
        _ => Err(root_failure(EntityKind::FolderError, NOT_STRING)),
    }
}

// ============================================================================
// 单元测试
// ============================================================================
