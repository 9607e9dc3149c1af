// ============================================================================
// 瞬时通知（toast）广播
// 除缓存变更外，同步层唯一对外可见的副作用
// ============================================================================

use tokio::sync::broadcast;

use crate::models::dtos::{Notice, NoticeLevel};

/// 通知广播器；没有订阅者时通知被直接丢弃
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Notifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => log::info!("{}", notice.message),
            NoticeLevel::Error => log::warn!("{}", notice.message),
        }
        let _ = self.tx.send(notice);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Notice::success(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Notice::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_reach_every_subscriber() {
        let notifier = Notifier::new(4);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.error("加载项目列表失败");

        assert_eq!(first.try_recv().unwrap(), Notice::error("加载项目列表失败"));
        assert_eq!(second.try_recv().unwrap().level, NoticeLevel::Error);
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let notifier = Notifier::new(0);
        notifier.success("已添加");
        let mut late = notifier.subscribe();
        assert!(late.try_recv().is_err());
    }
}
