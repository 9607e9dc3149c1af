// ============================================================================
// 脚本输出聚合
// 按项目 id 保存只追加的有序输出序列，与项目缓存互相独立
// ============================================================================
//
// 累积策略：只追加。脚本输出是流，保留全部片段而不是只保留最新一行；
// 同一项目内的追加顺序等于该项目事件的到达顺序。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::models::dtos::{OutputChunk, OutputStream};

/// 所有项目的输出快照
pub type OutputSnapshot = Arc<HashMap<String, Vec<OutputChunk>>>;

/// 脚本输出聚合器，克隆得到同一存储的另一个句柄
#[derive(Clone)]
pub struct ScriptOutputStore {
    tx: Arc<watch::Sender<OutputSnapshot>>,
}

impl Default for ScriptOutputStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptOutputStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(HashMap::new()));
        ScriptOutputStore { tx: Arc::new(tx) }
    }

    /// 追加一段输出；项目尚无序列时创建
    ///
    /// 项目 id 不要求存在于项目缓存中：项目删除后才到达的输出同样保留，等待清理。
    pub fn append(&self, project_id: &str, stream: OutputStream, text: impl Into<String>) {
        let chunk = OutputChunk::new(stream, text);
        self.tx.send_modify(|outputs| {
            Arc::make_mut(outputs)
                .entry(project_id.to_string())
                .or_default()
                .push(chunk);
        });
    }

    /// 清空项目的输出序列；序列为空或不存在时什么也不做
    pub fn clear(&self, project_id: &str) {
        self.tx.send_if_modified(|outputs| {
            let has_output = outputs
                .get(project_id)
                .is_some_and(|chunks| !chunks.is_empty());
            if !has_output {
                return false;
            }
            if let Some(chunks) = Arc::make_mut(outputs).get_mut(project_id) {
                chunks.clear();
            }
            true
        });
    }

    /// 删除项目的整个输出条目（项目删除时调用）
    pub fn remove(&self, project_id: &str) -> bool {
        self.tx.send_if_modified(|outputs| {
            if !outputs.contains_key(project_id) {
                return false;
            }
            Arc::make_mut(outputs).remove(project_id);
            true
        })
    }

    /// 删除 `live_ids` 之外的孤立条目，返回删除数量
    pub fn prune<'a, I>(&self, live_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: std::collections::HashSet<&str> = live_ids.into_iter().collect();
        let mut removed = 0;
        self.tx.send_if_modified(|outputs| {
            let orphaned: Vec<String> = outputs
                .keys()
                .filter(|id| !live.contains(id.as_str()))
                .cloned()
                .collect();
            if orphaned.is_empty() {
                return false;
            }
            let map = Arc::make_mut(outputs);
            for id in &orphaned {
                map.remove(id);
            }
            removed = orphaned.len();
            true
        });
        if removed > 0 {
            log::debug!("清理了 {} 个孤立的脚本输出条目", removed);
        }
        removed
    }

    /// 项目的全部输出片段（按到达顺序）
    pub fn chunks(&self, project_id: &str) -> Vec<OutputChunk> {
        self.tx
            .borrow()
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 项目的输出文本（按到达顺序）
    pub fn lines(&self, project_id: &str) -> Vec<String> {
        self.tx
            .borrow()
            .get(project_id)
            .map(|chunks| chunks.iter().map(|c| c.text.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.tx.borrow().contains_key(project_id)
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OutputSnapshot> {
        self.tx.subscribe()
    }
}
