// ============================================================================
// 脚本相关操作
// 负责：执行项目脚本、清空与清理脚本输出
// ============================================================================

use crate::facade::SyncFacade;
use crate::host::HostRequest;
use crate::models::dtos::Project;
use crate::utils::error::{SyncError, SyncResult};

impl SyncFacade {
    /// 执行项目脚本
    ///
    /// 宿主只确认受理；实际输出随后经 `script_output` / `script_error` 推送。
    /// 本层不设超时，脚本的生命周期由宿主决定。
    pub async fn run_script(&self, project: &Project, script_name: &str) -> SyncResult<()> {
        if !project.scripts.contains_key(script_name) {
            let err = SyncError::UnknownScript {
                project: project.name.clone(),
                script: script_name.to_string(),
            };
            self.notifier.error(err.to_string());
            return Err(err);
        }

        let request = HostRequest::ExecuteScript {
            manager: project.package_manager_or_default(&self.config).to_string(),
            command: script_name.to_string(),
            path: project.path.clone(),
            project_id: project.id.clone(),
        };
        self.request(request, &format!("执行脚本 {} 失败", script_name))
            .await?;

        self.notifier.success(format!(
            "已为 {} 启动脚本 \"{}\"",
            project.name, script_name
        ));
        Ok(())
    }

    /// 清空项目的脚本输出（项目不存在或输出已空时什么也不做）
    pub fn clear_output(&self, project_id: &str) {
        self.outputs.clear(project_id);
    }

    /// 删除已不在缓存中的项目遗留的脚本输出，返回删除条目数
    pub fn prune_orphaned_outputs(&self) -> usize {
        let projects = self.cache.snapshot();
        self.outputs.prune(projects.iter().map(|p| p.id.as_str()))
    }
}
