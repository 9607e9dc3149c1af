// ============================================================================
// 宿主接口
// 宿主进程是黑盒：只通过具名请求操作和具名推送通道与其交互
// ✅ 只能做：定义请求/通道名称、订阅句柄、Host trait
// ⛔ 禁止：假设宿主内部实现（文件系统、进程管理、包管理器检测）
// ============================================================================

pub mod memory;

use std::fmt;

use futures::future::BoxFuture;
use scopeguard::ScopeGuard;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::utils::error::{SyncError, SyncResult};

// ============================================================================
// 请求操作
// ============================================================================

/// 发往宿主的请求操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// 列出已登记的项目
    ListProjects,
    /// 读取项目清单中的包管理器与脚本
    PackageInfo { path: String },
    /// 执行脚本（仅确认受理，输出经 script_output / script_error 推送）
    ExecuteScript {
        manager: String,
        command: String,
        path: String,
        project_id: String,
    },
    /// 弹出文件夹选择（仅确认受理，结果经 folder_success / folder_error 推送）
    SelectFolder,
    /// 删除项目
    DeleteProject { id: String },
}

impl HostRequest {
    /// 宿主侧的命令名
    pub fn name(&self) -> &'static str {
        match self {
            HostRequest::ListProjects => "get_projects",
            HostRequest::PackageInfo { .. } => "get_package_info",
            HostRequest::ExecuteScript { .. } => "execute_script",
            HostRequest::SelectFolder => "select_folder",
            HostRequest::DeleteProject { .. } => "delete_project",
        }
    }

    /// 请求载荷
    pub fn payload(&self) -> Value {
        match self {
            HostRequest::ListProjects | HostRequest::SelectFolder => Value::Null,
            HostRequest::PackageInfo { path } => json!({ "path": path }),
            HostRequest::ExecuteScript {
                manager,
                command,
                path,
                project_id,
            } => json!({
                "manager": manager,
                "command": command,
                "path": path,
                "projectId": project_id,
            }),
            HostRequest::DeleteProject { id } => json!({ "id": id }),
        }
    }
}

// ============================================================================
// 推送通道
// ============================================================================

/// 宿主主动推送的事件通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PushChannel {
    FolderSuccess,
    FolderError,
    ScriptOutput,
    ScriptError,
}

impl PushChannel {
    pub const ALL: [PushChannel; 4] = [
        PushChannel::FolderSuccess,
        PushChannel::FolderError,
        PushChannel::ScriptOutput,
        PushChannel::ScriptError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PushChannel::FolderSuccess => "folder_success",
            PushChannel::FolderError => "folder_error",
            PushChannel::ScriptOutput => "script_output",
            PushChannel::ScriptError => "script_error",
        }
    }
}

impl fmt::Display for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// 订阅句柄
// ============================================================================

type ReleaseFn = Box<dyn FnOnce(()) + Send>;

/// 一次推送投递
///
/// `seq` 由宿主在推送时分配，在该宿主的所有通道之间单调递增，
/// 接收方据此恢复跨通道的到达顺序。
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub seq: u64,
    pub payload: Value,
}

/// 推送通道订阅句柄
///
/// 句柄被丢弃时（正常销毁、初始化出错提前返回、任务被中止）必定向宿主注销监听，
/// 之后宿主不会再向该监听投递事件。
pub struct Subscription {
    channel: PushChannel,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    _release: ScopeGuard<(), ReleaseFn>,
}

impl Subscription {
    /// 由宿主实现创建；`release` 在句柄丢弃时恰好执行一次
    pub fn new<F>(
        channel: PushChannel,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        release: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let release: ReleaseFn = Box::new(move |()| release());
        Subscription {
            channel,
            receiver,
            _release: scopeguard::guard((), release),
        }
    }

    pub fn channel(&self) -> PushChannel {
        self.channel
    }

    /// 等待下一次投递；宿主关闭通道后返回 `None`
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// 非阻塞地取出一次已到达的投递
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// 显式注销（等价于丢弃句柄）
    pub fn unsubscribe(self) {
        log::debug!("注销推送通道 {}", self.channel);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Host trait
// ============================================================================

/// 宿主进程接口
///
/// 请求失败以字符串描述返回，与宿主命令的 `Result<T, String>` 约定一致。
pub trait Host: Send + Sync {
    /// 发起请求，返回宿主的响应载荷（仅确认受理的操作返回 `Value::Null`）
    fn invoke(&self, request: HostRequest) -> BoxFuture<'static, Result<Value, String>>;

    /// 订阅推送通道
    ///
    /// 实现须在同一把锁内分配 `Delivery::seq` 并把投递放入接收队列，
    /// 使 `seq` 的顺序与各通道入队的先后一致。
    fn listen(&self, channel: PushChannel) -> Result<Subscription, String>;
}

/// 发起请求并把宿主失败转换为 `SyncError::HostRequest`
pub async fn invoke(host: &dyn Host, request: HostRequest) -> SyncResult<Value> {
    let operation = request.name();
    log::debug!("调用宿主命令 {}", operation);
    host.invoke(request)
        .await
        .map_err(|message| SyncError::HostRequest { operation, message })
}

/// 订阅推送通道并把失败转换为 `SyncError::Subscribe`
pub fn listen(host: &dyn Host, channel: PushChannel) -> SyncResult<Subscription> {
    host.listen(channel).map_err(|message| SyncError::Subscribe {
        channel: channel.name(),
        message,
    })
}
