// ============================================================================
// 同步门面：展示层唯一的入口
// 组装项目缓存、脚本输出聚合器、推送事件接入，对外暴露读模型与变更通知
// 具体操作（添加文件夹、删除项目、执行脚本等）见 commands 模块
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::config::SyncConfig;
use crate::host::{self, Host, HostRequest};
use crate::models::dtos::{LoadReport, Notice, OutputChunk, Project, SyncState, SyncStatus};
use crate::services::ingestion::{spawn_ingestion, IngestionHandle, Ingestor, LoadGate};
use crate::services::notifier::Notifier;
use crate::services::project_cache::{ProjectCache, ProjectSnapshot};
use crate::services::script_output::{OutputSnapshot, ScriptOutputStore};
use crate::utils::error::SyncResult;

/// 同步门面
///
/// 所有缓存变更都经由门面的操作或推送事件接入完成，展示层只读取快照。
pub struct SyncFacade {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) config: SyncConfig,
    pub(crate) cache: ProjectCache,
    pub(crate) outputs: ScriptOutputStore,
    pub(crate) notifier: Notifier,
    status: watch::Sender<SyncStatus>,
    gate: watch::Sender<LoadGate>,
    ingestion: Option<IngestionHandle>,
}

impl SyncFacade {
    /// 创建门面并订阅全部推送通道（须在 tokio 运行时内调用）
    ///
    /// 不执行初始加载；在第一次 `load()` 完成前到达的推送事件会排队等待。
    pub fn new(host: Arc<dyn Host>, config: SyncConfig) -> SyncResult<Self> {
        let cache = ProjectCache::new();
        let outputs = ScriptOutputStore::new();
        let notifier = Notifier::new(config.notice_capacity);
        let (gate, gate_rx) = watch::channel(LoadGate::default());
        let (status, _) = watch::channel(SyncStatus::default());

        let ingestor = Ingestor::new(cache.clone(), outputs.clone(), notifier.clone());
        let ingestion = spawn_ingestion(host.as_ref(), ingestor, gate_rx)?;

        Ok(SyncFacade {
            host,
            config,
            cache,
            outputs,
            notifier,
            status,
            gate,
            ingestion: Some(ingestion),
        })
    }

    /// 创建门面并执行初始加载
    ///
    /// 初始加载失败不会导致创建失败：错误记录在 `state().error` 中并发出通知。
    pub async fn start(host: Arc<dyn Host>, config: SyncConfig) -> SyncResult<Self> {
        let sync = Self::new(host, config)?;
        let _ = sync.load().await;
        Ok(sync)
    }

    /// 从宿主重新加载全部项目（原子替换缓存）
    ///
    /// 加载期间闸门关闭，推送事件排在整体替换之后应用；
    /// 加载结束（含被取消）时闸门计数归还，基线视为已建立。
    pub async fn load(&self) -> SyncResult<LoadReport> {
        self.gate.send_modify(|gate| gate.in_flight += 1);
        let _reopen = scopeguard::guard(&self.gate, |gate| {
            gate.send_modify(|gate| {
                gate.in_flight = gate.in_flight.saturating_sub(1);
                gate.baseline = true;
            })
        });
        self.status.send_modify(|status| status.is_loading = true);

        let result = self.cache.load(self.host.as_ref()).await;
        let error = match &result {
            Ok(report) => {
                if !report.dropped.is_empty() {
                    log::warn!("宿主返回了重复项目：{:?}", report.dropped);
                }
                None
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                Some(e.to_string())
            }
        };
        self.status.send_replace(SyncStatus {
            is_loading: false,
            error,
        });
        result
    }

    pub async fn reload(&self) -> SyncResult<LoadReport> {
        self.load().await
    }

    // ========================================================================
    // 读模型
    // ========================================================================

    pub fn state(&self) -> SyncState {
        let status = self.status.borrow().clone();
        SyncState {
            projects: self.cache.snapshot(),
            is_loading: status.is_loading,
            error: status.error,
        }
    }

    pub fn projects(&self) -> ProjectSnapshot {
        self.cache.snapshot()
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        self.cache.get(id)
    }

    pub fn outputs(&self) -> OutputSnapshot {
        self.outputs.snapshot()
    }

    pub fn output(&self, project_id: &str) -> Vec<OutputChunk> {
        self.outputs.chunks(project_id)
    }

    pub fn output_lines(&self, project_id: &str) -> Vec<String> {
        self.outputs.lines(project_id)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 基线缓存已建立且没有进行中的加载（推送事件正在应用）
    pub fn is_ready(&self) -> bool {
        self.gate.borrow().is_open()
    }

    /// 订阅读模型变更
    pub fn subscribe(&self) -> SyncSubscriber {
        SyncSubscriber {
            projects: self.cache.subscribe(),
            status: self.status.subscribe(),
            outputs: self.outputs.subscribe(),
        }
    }

    /// 订阅瞬时通知
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// 停止推送事件接入并注销全部通道；之后到达的推送不再产生任何变更或通知
    pub async fn shutdown(mut self) {
        if let Some(ingestion) = self.ingestion.take() {
            ingestion.shutdown().await;
        }
    }

    /// 等待进行中的加载全部结束，之后的缓存变更不会被整体替换覆盖
    pub(crate) async fn settled(&self) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(LoadGate::is_settled).await;
    }

    /// 发起宿主请求；失败时发出带上下文的错误通知
    pub(crate) async fn request(&self, request: HostRequest, context: &str) -> SyncResult<Value> {
        host::invoke(self.host.as_ref(), request)
            .await
            .inspect_err(|e| self.notifier.error(format!("{}：{}", context, e)))
    }
}

/// 读模型变更的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChange {
    Projects,
    Status,
    Outputs,
}

/// 读模型变更订阅
pub struct SyncSubscriber {
    projects: watch::Receiver<ProjectSnapshot>,
    status: watch::Receiver<SyncStatus>,
    outputs: watch::Receiver<OutputSnapshot>,
}

impl SyncSubscriber {
    /// 等待下一次变更；门面被销毁后返回 `None`
    pub async fn changed(&mut self) -> Option<SyncChange> {
        tokio::select! {
            changed = self.projects.changed() => changed.ok().map(|()| SyncChange::Projects),
            changed = self.status.changed() => changed.ok().map(|()| SyncChange::Status),
            changed = self.outputs.changed() => changed.ok().map(|()| SyncChange::Outputs),
        }
    }

    pub fn projects(&self) -> ProjectSnapshot {
        self.projects.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::host::PushChannel;
    use crate::models::dtos::NoticeLevel;
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::json;
    use std::time::Duration;

    pub(crate) fn seeded_host() -> MemoryHost {
        let host = MemoryHost::new();
        host.set_projects(json!([
            { "id": "p1", "name": "shop", "path": "/work/shop", "framework": "Next.js" },
            { "id": "p2", "name": "blog", "path": "/work/blog" }
        ]));
        host.set_package_info(
            "/work/shop",
            json!({ "manager": "pnpm", "scripts": { "dev": "next dev", "build": "next build" } }),
        );
        host.set_package_info("/work/blog", json!({ "manager": "npm", "scripts": { "start": "node ." } }));
        host
    }

    /// 等待直到条件成立（最多 1 秒）
    pub(crate) async fn wait_until<F>(sync: &SyncFacade, mut condition: F)
    where
        F: FnMut(&SyncFacade) -> bool,
    {
        let mut changes = sync.subscribe();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition(sync) {
                if changes.changed().await.is_none() {
                    break;
                }
            }
        })
        .await
        .expect("等待状态变化超时");
    }

    /// 包信息响应延迟返回的宿主，用于在加载进行中插入推送与操作
    struct SlowHost {
        inner: MemoryHost,
        delay: Duration,
    }

    impl Host for SlowHost {
        fn invoke(&self, request: HostRequest) -> BoxFuture<'static, Result<Value, String>> {
            let delay = match request {
                HostRequest::PackageInfo { .. } => self.delay,
                _ => Duration::ZERO,
            };
            let response = self.inner.invoke(request);
            async move {
                tokio::time::sleep(delay).await;
                response.await
            }
            .boxed()
        }

        fn listen(&self, channel: PushChannel) -> Result<crate::host::Subscription, String> {
            self.inner.listen(channel)
        }
    }

    fn slow(host: &MemoryHost) -> Arc<SlowHost> {
        Arc::new(SlowHost {
            inner: host.clone(),
            delay: Duration::from_millis(50),
        })
    }

    fn ids(sync: &SyncFacade) -> Vec<String> {
        sync.projects().iter().map(|p| p.id.clone()).collect()
    }

    pub(crate) async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_loads_projects() {
        let host = seeded_host();
        let sync = SyncFacade::start(Arc::new(host), SyncConfig::default())
            .await
            .unwrap();

        let state = sync.state();
        assert!(!state.is_loading);
        assert_eq!(state.error, None);
        assert_eq!(state.projects.len(), 2);
        assert_eq!(state.projects[0].scripts.len(), 2);
        assert!(sync.is_ready());
    }

    #[tokio::test]
    async fn test_load_failure_sets_error_and_notifies() {
        let host = seeded_host();
        host.fail("get_projects", "配置文件无法读取");
        let sync = SyncFacade::new(Arc::new(host.clone()), SyncConfig::default()).unwrap();
        let mut notices = sync.notices();

        assert!(sync.load().await.is_err());

        let state = sync.state();
        assert!(state.projects.is_empty());
        assert!(!state.is_loading);
        assert!(state.error.unwrap().contains("配置文件无法读取"));
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Error);

        host.clear_failure("get_projects");
        sync.reload().await.unwrap();
        assert_eq!(sync.state().error, None);
        assert_eq!(sync.projects().len(), 2);
    }

    #[tokio::test]
    async fn test_push_before_load_is_applied_after_baseline() {
        let host = seeded_host();
        let sync = SyncFacade::new(Arc::new(host.clone()), SyncConfig::default()).unwrap();

        host.emit(
            PushChannel::FolderSuccess,
            json!(r#"{"id":"p3","name":"docs","path":"/work/docs"}"#),
        );
        settle().await;
        assert!(sync.projects().is_empty());
        assert!(!sync.is_ready());

        sync.load().await.unwrap();
        wait_until(&sync, |s| s.projects().len() == 3).await;

        let ids: Vec<_> = sync.projects().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_failed_initial_load_still_opens_gate() {
        let host = MemoryHost::new();
        host.fail("get_projects", "宿主未就绪");
        let sync = SyncFacade::start(Arc::new(host.clone()), SyncConfig::default())
            .await
            .unwrap();
        assert!(sync.is_ready());

        host.emit(
            PushChannel::FolderSuccess,
            json!({ "id": "n1", "name": "new", "path": "/new" }),
        );
        wait_until(&sync, |s| s.projects().len() == 1).await;
    }

    #[tokio::test]
    async fn test_subscriber_sees_project_and_output_changes() {
        let host = seeded_host();
        let sync = SyncFacade::start(Arc::new(host.clone()), SyncConfig::default())
            .await
            .unwrap();
        let mut changes = sync.subscribe();

        host.emit(
            PushChannel::ScriptOutput,
            json!({ "projectId": "p1", "output": "ready in 300ms" }),
        );
        let change = tokio::time::timeout(Duration::from_secs(1), changes.changed())
            .await
            .unwrap();
        assert_eq!(change, Some(SyncChange::Outputs));
        assert_eq!(sync.output_lines("p1"), vec!["ready in 300ms"]);
        assert_eq!(changes.projects().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_mutation_and_notification() {
        let host = seeded_host();
        let sync = SyncFacade::start(Arc::new(host.clone()), SyncConfig::default())
            .await
            .unwrap();
        let cache = sync.cache.clone();
        let outputs = sync.outputs.clone();
        let mut notices = sync.notices();
        let before = cache.snapshot();

        sync.shutdown().await;

        for channel in PushChannel::ALL {
            assert_eq!(host.listener_count(channel), 0);
        }
        host.emit(
            PushChannel::FolderSuccess,
            json!({ "id": "p9", "name": "x", "path": "/x" }),
        );
        host.emit(PushChannel::FolderError, json!("无效文件夹"));
        host.emit(PushChannel::ScriptError, json!({ "projectId": "p1", "output": "x" }));
        settle().await;

        assert_eq!(cache.snapshot(), before);
        assert!(outputs.snapshot().is_empty());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_folder_added_during_reload_survives_replace() {
        let host = seeded_host();
        let sync = SyncFacade::start(slow(&host), SyncConfig::default())
            .await
            .unwrap();

        let (report, ()) = tokio::join!(sync.reload(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            host.emit(
                PushChannel::FolderSuccess,
                json!({ "id": "n1", "name": "new", "path": "/work/new" }),
            );
            settle().await;
            assert!(sync.project("n1").is_none());
            assert!(!sync.is_ready());
        });
        report.unwrap();

        wait_until(&sync, |s| s.project("n1").is_some()).await;
        assert_eq!(ids(&sync), vec!["p1", "p2", "n1"]);
        assert!(sync.is_ready());
    }

    #[tokio::test]
    async fn test_delete_during_reload_is_not_undone() {
        let host = seeded_host();
        let sync = SyncFacade::start(slow(&host), SyncConfig::default())
            .await
            .unwrap();

        let (report, deleted) = tokio::join!(sync.reload(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sync.delete_project("p2").await
        });
        report.unwrap();
        deleted.unwrap();

        assert_eq!(ids(&sync), vec!["p1"]);
    }
}
