// ============================================================================
// 推送事件接入
// 订阅宿主推送通道 → 校验载荷 → 折叠进项目缓存 / 脚本输出聚合器
// ============================================================================
//
// 每个通道的状态机：
//   监听 --收到载荷--> 校验 --成功--> 应用 --> 监听
//                           \--失败--> 报告（只发通知，不修改任何缓存） --> 监听
//
// 闸门关闭期间（基线尚未建立，或有加载进行中）到达的事件留在队列中，
// 闸门打开后按宿主推送的先后顺序（跨通道）依次应用。

use futures::future::select_all;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::host::{self, Delivery, Host, PushChannel, Subscription};
use crate::models::dtos::{OutputStream, Project};
use crate::services::notifier::Notifier;
use crate::services::project_cache::ProjectCache;
use crate::services::schema;
use crate::services::script_output::ScriptOutputStore;
use crate::utils::error::{SyncError, SyncResult};

// ============================================================================
// 单条载荷的折叠
// ============================================================================

/// 单条载荷的处理结果
#[derive(Debug)]
pub enum IngestOutcome {
    /// 已应用到缓存或输出聚合器
    Applied,
    /// 已作为通知报告，未修改任何缓存
    Reported(SyncError),
}

impl IngestOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, IngestOutcome::Applied)
    }
}

/// 推送载荷的折叠器（同步、无 await，便于单独测试）
#[derive(Clone)]
pub struct Ingestor {
    cache: ProjectCache,
    outputs: ScriptOutputStore,
    notifier: Notifier,
}

impl Ingestor {
    pub fn new(cache: ProjectCache, outputs: ScriptOutputStore, notifier: Notifier) -> Self {
        Ingestor {
            cache,
            outputs,
            notifier,
        }
    }

    /// 校验并应用一条推送载荷
    pub fn ingest(&self, channel: PushChannel, payload: &Value) -> IngestOutcome {
        let result = match channel {
            PushChannel::FolderSuccess => schema::parse_project(payload)
                .map_err(SyncError::from)
                .and_then(|project| self.add_project(project)),
            PushChannel::FolderError => match schema::parse_folder_error(payload) {
                Ok(message) => Err(SyncError::HostRequest {
                    operation: "select_folder",
                    message,
                }),
                Err(failure) => Err(failure.into()),
            },
            PushChannel::ScriptOutput => self.append_output(payload, OutputStream::Stdout),
            PushChannel::ScriptError => self.append_output(payload, OutputStream::Stderr),
        };

        match result {
            Ok(()) => IngestOutcome::Applied,
            Err(err) => {
                log::warn!("通道 {} 的载荷未应用：{}", channel, err);
                self.report(&err);
                IngestOutcome::Reported(err)
            }
        }
    }

    fn add_project(&self, project: Project) -> SyncResult<()> {
        let name = project.name.clone();
        self.cache.insert_new(project)?;
        self.notifier.success(format!("项目 \"{}\" 已添加", name));
        Ok(())
    }

    fn append_output(&self, payload: &Value, stream: OutputStream) -> SyncResult<()> {
        let event = schema::parse_script_event(payload)?;
        self.outputs.append(&event.project_id, stream, event.output);
        Ok(())
    }

    fn report(&self, err: &SyncError) {
        let message = match err {
            SyncError::HostRequest { message, .. } => message.clone(),
            SyncError::Validation(failure) => format!("收到无效的宿主数据：{}", failure),
            other => other.to_string(),
        };
        self.notifier.error(message);
    }
}

// ============================================================================
// 加载闸门
// ============================================================================

/// 加载闸门：基线建立且没有进行中的加载时才打开
///
/// 每次 `load()` 期间闸门关闭，推送事件在队列中等待整体替换完成后再应用，
/// 否则加载中途应用的变更会被随后的整体替换覆盖。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadGate {
    /// 是否已完成过至少一次加载
    pub baseline: bool,
    /// 进行中的加载数量
    pub in_flight: usize,
}

impl LoadGate {
    /// 基线已建立、无加载进行中的闸门
    pub fn open() -> Self {
        LoadGate {
            baseline: true,
            in_flight: 0,
        }
    }

    /// 是否可以应用推送事件
    pub fn is_open(&self) -> bool {
        self.baseline && self.in_flight == 0
    }

    /// 是否没有进行中的加载（不要求基线已建立）
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0
    }
}

// ============================================================================
// 订阅与有序收件箱
// ============================================================================

/// 四个推送通道的订阅，按宿主分配的序号合并为单一到达顺序
///
/// 每个通道至多暂存一条投递；每次取出前反复非阻塞拉取，直到一轮没有新投递，
/// 此时任何序号更小的投递都已入队并被看到，暂存中序号最小者即全局最早到达者。
struct Inbox {
    subscriptions: Vec<Subscription>,
    pending: Vec<Option<Delivery>>,
    closed: Vec<bool>,
}

impl Inbox {
    /// 逐个订阅；任一通道失败时，已获得的订阅随 `?` 提前返回而被丢弃并注销
    fn subscribe(host: &dyn Host) -> SyncResult<Self> {
        let subscriptions = PushChannel::ALL
            .into_iter()
            .map(|channel| host::listen(host, channel))
            .collect::<SyncResult<Vec<_>>>()?;
        let count = subscriptions.len();
        Ok(Inbox {
            subscriptions,
            pending: vec![None; count],
            closed: vec![false; count],
        })
    }

    /// 取出全局最早到达的一次投递；所有通道都关闭后返回 `None`
    async fn next(&mut self) -> Option<(PushChannel, Delivery)> {
        loop {
            while self.fill() {}

            let earliest = self
                .pending
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| slot.as_ref().map(|d| (index, d.seq)))
                .min_by_key(|(_, seq)| *seq)
                .map(|(index, _)| index);
            if let Some(index) = earliest {
                if let Some(delivery) = self.pending[index].take() {
                    return Some((self.subscriptions[index].channel(), delivery));
                }
            }

            let (index, delivery) = self.recv_any().await?;
            self.pending[index] = Some(delivery);
        }
    }

    /// 为空的暂存位非阻塞拉取一次，返回是否拉到了新投递
    fn fill(&mut self) -> bool {
        let mut added = false;
        for (slot, subscription) in self.pending.iter_mut().zip(self.subscriptions.iter_mut()) {
            if slot.is_none() {
                *slot = subscription.try_recv();
                added |= slot.is_some();
            }
        }
        added
    }

    /// 等待任一未关闭通道的下一次投递
    async fn recv_any(&mut self) -> Option<(usize, Delivery)> {
        loop {
            let closed = &self.closed;
            let waiting: Vec<_> = self
                .subscriptions
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| !closed[*index])
                .map(|(index, subscription)| {
                    Box::pin(async move { (index, subscription.recv().await) })
                })
                .collect();
            if waiting.is_empty() {
                return None;
            }

            let ((index, received), _, _) = select_all(waiting).await;
            match received {
                Some(delivery) => return Some((index, delivery)),
                None => {
                    log::debug!("推送通道 {} 已被宿主关闭", PushChannel::ALL[index]);
                    self.closed[index] = true;
                }
            }
        }
    }
}

// ============================================================================
// 事件循环
// ============================================================================

/// 运行中的事件接入任务
///
/// 句柄被丢弃时中止任务，任务持有的订阅随之注销；队列中尚未处理的载荷被静默丢弃。
pub struct IngestionHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IngestionHandle {
    /// 通知事件循环退出并等待其结束
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for IngestionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 订阅全部推送通道并启动事件循环（须在 tokio 运行时内调用）
///
/// 订阅在函数返回前完成，之后宿主推送的事件都不会丢失；
/// 每次应用事件前都等待闸门打开。
pub fn spawn_ingestion(
    host: &dyn Host,
    ingestor: Ingestor,
    gate: watch::Receiver<LoadGate>,
) -> SyncResult<IngestionHandle> {
    let inbox = Inbox::subscribe(host)?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(ingestor, inbox, gate, shutdown_rx));
    log::debug!("推送事件接入已启动");
    Ok(IngestionHandle {
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn wait_open(gate: &mut watch::Receiver<LoadGate>) -> bool {
    gate.wait_for(LoadGate::is_open).await.is_ok()
}

async fn run(
    ingestor: Ingestor,
    mut inbox: Inbox,
    mut gate: watch::Receiver<LoadGate>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let _stopped = scopeguard::guard((), |_| log::debug!("推送事件接入已停止"));

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = inbox.next() => next,
        };
        let Some((channel, delivery)) = next else {
            break;
        };

        let opened = tokio::select! {
            _ = &mut shutdown => false,
            opened = wait_open(&mut gate) => opened,
        };
        if !opened {
            break;
        }
        ingestor.ingest(channel, &delivery.payload);
    }
}

// ============================================================================
// 单元测试
// ============================================================================
