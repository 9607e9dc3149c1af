// ============================================================================
// 项目相关操作
// 负责：添加文件夹、删除项目、刷新包信息、本地编辑
// ============================================================================

use crate::facade::SyncFacade;
use crate::host::HostRequest;
use crate::models::dtos::{Project, ProjectEdit};
use crate::services::project_cache::fetch_package_info;
use crate::utils::error::{SyncError, SyncResult};

impl SyncFacade {
    /// 添加文件夹：请求宿主弹出文件夹选择对话框
    ///
    /// 此操作本身不修改缓存。选择结果由宿主经 `folder_success` / `folder_error`
    /// 推送，由推送事件接入负责插入，避免请求响应与推送事件重复插入同一项目。
    pub async fn add_folder(&self) -> SyncResult<()> {
        self.request(HostRequest::SelectFolder, "选择文件夹失败")
            .await?;
        Ok(())
    }

    /// 删除项目
    ///
    /// 宿主确认后从缓存移除并丢弃该项目的脚本输出；宿主失败时缓存不变。
    /// 若此时有加载进行中，移除推迟到加载的整体替换之后。
    pub async fn delete_project(&self, id: &str) -> SyncResult<()> {
        self.request(
            HostRequest::DeleteProject { id: id.to_string() },
            "删除项目失败",
        )
        .await?;
        self.settled().await;

        let removed = self.cache.remove(id);
        self.outputs.remove(id);
        if removed {
            self.notifier.success("项目已删除");
        } else {
            log::debug!("项目 {} 已不在缓存中，删除视为成功", id);
        }
        Ok(())
    }

    /// 重新读取项目清单，整体替换脚本与包管理器
    pub async fn refresh_project(&self, id: &str) -> SyncResult<Project> {
        let project = self.cache.get(id).ok_or_else(|| {
            let err = SyncError::UnknownProject(id.to_string());
            self.notifier.error(err.to_string());
            err
        })?;

        let info = fetch_package_info(self.host.as_ref(), &project.path)
            .await
            .inspect_err(|e| {
                self.notifier
                    .error(format!("刷新项目 \"{}\" 失败：{}", project.name, e))
            })?;
        self.cache.apply_package_info(id, info)
    }

    /// 本地编辑项目描述信息（不经过宿主）
    pub fn edit_project(&self, id: &str, edit: &ProjectEdit) -> SyncResult<Project> {
        self.cache
            .edit(id, edit)
            .inspect_err(|e| self.notifier.error(e.to_string()))
    }
}
