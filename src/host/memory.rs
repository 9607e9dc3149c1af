// ============================================================================
// 进程内宿主
// 在内存中模拟宿主命令与推送通道，用于单元测试和无宿主环境下的演示
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{Delivery, Host, HostRequest, PushChannel, Subscription};

/// 进程内宿主：响应可预置，失败可注入，推送由调用方手动触发
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Arc<Mutex<HostState>>,
}

#[derive(Default)]
struct HostState {
    projects: Option<Value>,
    package_info: HashMap<String, Result<Value, String>>,
    failures: HashMap<&'static str, String>,
    refused: HashSet<PushChannel>,
    listeners: HashMap<PushChannel, Vec<(u64, mpsc::UnboundedSender<Delivery>)>>,
    next_listener: u64,
    next_seq: u64,
    calls: Vec<HostRequest>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 预置 `get_projects` 的响应（原样返回，不做校验）
    pub fn set_projects(&self, projects: Value) {
        self.state().projects = Some(projects);
    }

    /// 预置某个路径的 `get_package_info` 响应
    pub fn set_package_info(&self, path: impl Into<String>, info: Value) {
        self.state().package_info.insert(path.into(), Ok(info));
    }

    /// 让某个路径的 `get_package_info` 失败
    pub fn fail_package_info(&self, path: impl Into<String>, message: impl Into<String>) {
        self.state()
            .package_info
            .insert(path.into(), Err(message.into()));
    }

    /// 让指定命令（按宿主命令名）失败，直到 `clear_failure`
    pub fn fail(&self, operation: &'static str, message: impl Into<String>) {
        self.state().failures.insert(operation, message.into());
    }

    pub fn clear_failure(&self, operation: &'static str) {
        self.state().failures.remove(operation);
    }

    /// 拒绝后续对该通道的订阅
    pub fn refuse_listen(&self, channel: PushChannel) {
        self.state().refused.insert(channel);
    }

    /// 向通道推送载荷，返回实际投递到的监听数
    ///
    /// 序号分配与入队都在宿主锁内完成，跨通道的推送顺序因此可被接收方恢复。
    pub fn emit(&self, channel: PushChannel, payload: Value) -> usize {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        let Some(listeners) = state.listeners.get_mut(&channel) else {
            return 0;
        };
        listeners.retain(|(_, tx)| !tx.is_closed());
        listeners
            .iter()
            .filter(|(_, tx)| {
                tx.send(Delivery {
                    seq,
                    payload: payload.clone(),
                })
                .is_ok()
            })
            .count()
    }

    pub fn listener_count(&self, channel: PushChannel) -> usize {
        self.state()
            .listeners
            .get(&channel)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// 已收到的请求（按调用顺序）
    pub fn calls(&self) -> Vec<HostRequest> {
        self.state().calls.clone()
    }

    fn respond(&self, request: &HostRequest) -> Result<Value, String> {
        let mut state = self.state();
        state.calls.push(request.clone());

        if let Some(message) = state.failures.get(request.name()) {
            return Err(message.clone());
        }

        match request {
            HostRequest::ListProjects => Ok(state.projects.clone().unwrap_or_else(|| json!([]))),
            HostRequest::PackageInfo { path } => state
                .package_info
                .get(path)
                .cloned()
                .unwrap_or(Ok(Value::Null)),
            HostRequest::DeleteProject { id } => {
                if let Some(Value::Array(projects)) = state.projects.as_mut() {
                    projects.retain(|project| project.get("id").and_then(Value::as_str) != Some(id.as_str()));
                }
                Ok(Value::Null)
            }
            HostRequest::ExecuteScript { .. } | HostRequest::SelectFolder => Ok(Value::Null),
        }
    }
}

impl Host for MemoryHost {
    fn invoke(&self, request: HostRequest) -> BoxFuture<'static, Result<Value, String>> {
        future::ready(self.respond(&request)).boxed()
    }

    fn listen(&self, channel: PushChannel) -> Result<Subscription, String> {
        let mut state = self.state();
        if state.refused.contains(&channel) {
            return Err(format!("通道 {} 不可用", channel));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = state.next_listener;
        state.next_listener += 1;
        state.listeners.entry(channel).or_default().push((listener_id, tx));

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(channel, rx, move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(listeners) = state.listeners.get_mut(&channel) {
                    listeners.retain(|(id, _)| *id != listener_id);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_records_calls_and_injects_failures() {
        let host = MemoryHost::new();
        host.set_projects(json!([{ "id": "p1", "name": "a", "path": "/a" }]));
        host.fail("select_folder", "对话框不可用");

        let projects = host.invoke(HostRequest::ListProjects).await.unwrap();
        assert_eq!(projects.as_array().unwrap().len(), 1);

        let err = host.invoke(HostRequest::SelectFolder).await.unwrap_err();
        assert_eq!(err, "对话框不可用");

        host.clear_failure("select_folder");
        assert!(host.invoke(HostRequest::SelectFolder).await.is_ok());
        assert_eq!(host.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_package_info_defaults_to_null() {
        let host = MemoryHost::new();
        let info = host
            .invoke(HostRequest::PackageInfo {
                path: "/nowhere".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(info, Value::Null);
    }

    #[tokio::test]
    async fn test_emit_reaches_listener_until_dropped() {
        let host = MemoryHost::new();
        let mut subscription = host.listen(PushChannel::ScriptOutput).unwrap();
        assert_eq!(host.listener_count(PushChannel::ScriptOutput), 1);

        assert_eq!(host.emit(PushChannel::ScriptOutput, json!("line")), 1);
        assert_eq!(
            subscription.recv().await.map(|delivery| delivery.payload),
            Some(json!("line"))
        );

        drop(subscription);
        assert_eq!(host.listener_count(PushChannel::ScriptOutput), 0);
        assert_eq!(host.emit(PushChannel::ScriptOutput, json!("late")), 0);
    }

    #[test]
    fn test_emit_sequence_spans_channels() {
        let host = MemoryHost::new();
        let mut output = host.listen(PushChannel::ScriptOutput).unwrap();
        let mut error = host.listen(PushChannel::ScriptError).unwrap();

        host.emit(PushChannel::ScriptOutput, json!("a"));
        host.emit(PushChannel::ScriptError, json!("b"));
        host.emit(PushChannel::ScriptOutput, json!("c"));

        let first = output.try_recv().unwrap();
        let second = error.try_recv().unwrap();
        let third = output.try_recv().unwrap();
        assert!(first.seq < second.seq && second.seq < third.seq);
        assert_eq!(third.payload, json!("c"));
    }

    #[test]
    fn test_refused_channel() {
        let host = MemoryHost::new();
        host.refuse_listen(PushChannel::FolderError);
        assert!(host.listen(PushChannel::FolderError).is_err());
        assert!(host.listen(PushChannel::FolderSuccess).is_ok());
    }
}
