// ============================================================================
// 项目缓存：已校验项目的权威内存集合
// 单一写入路径 + 多读者快照；快照是 Arc 克隆，读者永远看不到变更中途的状态
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;

use crate::host::{self, Host, HostRequest};
use crate::models::dtos::{LoadReport, PackageInfo, Project, ProjectEdit};
use crate::services::schema;
use crate::utils::error::{SyncError, SyncResult};

/// 项目列表快照
pub type ProjectSnapshot = Arc<Vec<Project>>;

/// `upsert` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// 新项目追加到末尾
    Inserted,
    /// 替换了原有条目（保持原位置）
    Replaced,
}

/// 项目缓存
///
/// 内部是一个 `watch` 通道：写入方替换/修改列表，订阅者在每次实际变更后被唤醒。
/// 克隆得到的是同一个缓存的另一个句柄。
#[derive(Clone)]
pub struct ProjectCache {
    tx: Arc<watch::Sender<ProjectSnapshot>>,
}

impl Default for ProjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        ProjectCache { tx: Arc::new(tx) }
    }

    // ========================================================================
    // 读取
    // ========================================================================

    /// 当前项目列表（不阻塞，反映最近一次完成的变更）
    pub fn snapshot(&self) -> ProjectSnapshot {
        self.tx.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.tx.borrow().iter().find(|p| p.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// 订阅变更通知
    pub fn subscribe(&self) -> watch::Receiver<ProjectSnapshot> {
        self.tx.subscribe()
    }

    // ========================================================================
    // 加载
    // ========================================================================

    /// 初始加载：列出项目 → 逐个并发获取包信息 → 合并 → 整体原子替换
    ///
    /// # 返回
    /// - `Ok(LoadReport)`: 加载成功；单个项目包信息失败不影响整体，记录在 `degraded`
    /// - `Err(SyncError::LoadFailure)`: 列表请求失败或列表无效，缓存保持不变
    pub async fn load(&self, host: &dyn Host) -> SyncResult<LoadReport> {
        let raw = host::invoke(host, HostRequest::ListProjects)
            .await
            .map_err(|e| SyncError::LoadFailure(e.to_string()))?;
        let listed = schema::parse_project_list(&raw)
            .map_err(|failure| SyncError::LoadFailure(failure.to_string()))?;

        log::debug!("宿主返回 {} 个项目，开始获取包信息", listed.len());

        let infos = join_all(listed.iter().map(|p| fetch_package_info(host, &p.path))).await;

        let mut degraded = Vec::new();
        let merged: Vec<Project> = listed
            .into_iter()
            .zip(infos)
            .map(|(mut project, info)| {
                match info {
                    Ok(info) => project.merge_package_info(info),
                    Err(e) => {
                        log::warn!("项目 {} 包信息获取失败，以空脚本保留：{}", project.id, e);
                        project.merge_package_info(PackageInfo::default());
                        degraded.push(project.id.clone());
                    }
                }
                project
            })
            .collect();

        let dropped = self.replace_all(merged);
        let report = LoadReport {
            loaded: self.len(),
            degraded,
            dropped,
        };
        log::info!(
            "项目加载完成：{} 个项目，{} 个降级",
            report.loaded,
            report.degraded.len()
        );
        Ok(report)
    }

    /// 整体替换缓存内容；重复 id / path 只保留第一次出现，返回被丢弃的 id
    pub fn replace_all(&self, projects: Vec<Project>) -> Vec<String> {
        let mut seen_ids = HashSet::new();
        let mut seen_paths = HashSet::new();
        let mut kept = Vec::with_capacity(projects.len());
        let mut dropped = Vec::new();

        for project in projects {
            if seen_ids.contains(&project.id) || seen_paths.contains(&project.path) {
                log::warn!("丢弃重复项目 {}（{}）", project.id, project.path);
                dropped.push(project.id);
                continue;
            }
            seen_ids.insert(project.id.clone());
            seen_paths.insert(project.path.clone());
            kept.push(project);
        }

        self.tx.send_replace(Arc::new(kept));
        dropped
    }

    // ========================================================================
    // 变更
    // ========================================================================

    /// 按 id 或 path 匹配已有条目并原位替换，否则追加
    ///
    /// id 与 path 分别命中两个不同条目时拒绝（返回 `DuplicateProject`），缓存不变。
    pub fn upsert(&self, project: Project) -> SyncResult<Upserted> {
        let mut outcome = Ok(Upserted::Inserted);
        self.tx.send_if_modified(|projects| {
            let by_id = projects.iter().position(|p| p.id == project.id);
            let by_path = projects.iter().position(|p| p.path == project.path);
            match (by_id, by_path) {
                (Some(i), Some(j)) if i != j => {
                    outcome = Err(SyncError::DuplicateProject {
                        path: project.path.clone(),
                    });
                    false
                }
                (Some(index), _) | (None, Some(index)) => {
                    Arc::make_mut(projects)[index] = project;
                    outcome = Ok(Upserted::Replaced);
                    true
                }
                (None, None) => {
                    Arc::make_mut(projects).push(project);
                    true
                }
            }
        });
        outcome
    }

    /// 插入新添加的文件夹项目，按 path（而非 id）去重
    ///
    /// 宿主独立生成 id，同一文件夹重复添加会得到不同 id，因此以 path 判断重复。
    pub fn insert_new(&self, project: Project) -> SyncResult<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|projects| {
            if projects
                .iter()
                .any(|p| p.path == project.path || p.id == project.id)
            {
                outcome = Err(SyncError::DuplicateProject {
                    path: project.path.clone(),
                });
                return false;
            }
            Arc::make_mut(projects).push(project);
            true
        });
        outcome
    }

    /// 删除项目；id 不存在时什么也不做（幂等），返回是否删除了条目
    pub fn remove(&self, id: &str) -> bool {
        self.tx.send_if_modified(|projects| {
            let Some(index) = projects.iter().position(|p| p.id == id) else {
                return false;
            };
            Arc::make_mut(projects).remove(index);
            true
        })
    }

    /// 用新拉取的包信息整体替换项目的脚本与包管理器
    pub fn apply_package_info(&self, id: &str, info: PackageInfo) -> SyncResult<Project> {
        self.modify(id, |project| project.merge_package_info(info))
    }

    /// 本地编辑（字段级后写入者胜出）
    pub fn edit(&self, id: &str, edit: &ProjectEdit) -> SyncResult<Project> {
        self.modify(id, |project| edit.apply_to(project))
    }

    fn modify<F>(&self, id: &str, f: F) -> SyncResult<Project>
    where
        F: FnOnce(&mut Project),
    {
        let mut updated = None;
        self.tx.send_if_modified(|projects| {
            let Some(index) = projects.iter().position(|p| p.id == id) else {
                return false;
            };
            let slot = &mut Arc::make_mut(projects)[index];
            f(slot);
            updated = Some(slot.clone());
            true
        });
        updated.ok_or_else(|| SyncError::UnknownProject(id.to_string()))
    }
}

/// 获取并校验单个项目的包信息
pub async fn fetch_package_info(host: &dyn Host, path: &str) -> SyncResult<PackageInfo> {
    let raw = host::invoke(
        host,
        HostRequest::PackageInfo {
            path: path.to_string(),
        },
    )
    .await?;
    Ok(schema::parse_package_info(&raw)?)
}

// ============================================================================
// 单元测试
// ============================================================================
