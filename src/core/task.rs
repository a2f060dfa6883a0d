//! 可取消的后台任务：TaskHandle 与单槽位 TaskSlot
//!
//! 每个任务持有父令牌派生的子令牌；取消是协作式的，任务在每个挂起点检查令牌。
//! TaskSlot 同一时刻只保留一个任务，放入新任务前先取消旧任务（不等待其结束）。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    /// 翻译 + 逐词展示
    Reveal,
    /// 概念图生成与逐步发布
    Visualization,
    /// 单次发送的慢网络计时器，只由所属发送取消
    SlowNetworkTimer,
}

/// 任务 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// 以 parent 的子令牌启动任务；父令牌取消时任务一并取消
    pub fn spawn<F, Fut>(kind: TaskKind, parent: &CancellationToken, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let join = tokio::spawn(task(token.clone()));
        let id = TaskId::new();
        tracing::trace!("Spawned {:?} task {:?}", kind, id);
        Self {
            id,
            kind,
            token,
            join,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// 某类任务的单槽位
pub struct TaskSlot {
    kind: TaskKind,
    current: Option<TaskHandle>,
}

impl TaskSlot {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            current: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// 取消旧任务并放入新任务
    pub fn replace(&mut self, handle: TaskHandle) {
        debug_assert_eq!(handle.kind(), self.kind);
        self.cancel();
        self.current = Some(handle);
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            if !handle.is_finished() {
                tracing::debug!("Cancelling {:?} task {:?}", handle.kind(), handle.id());
            }
            handle.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.current
            .as_ref()
            .map(|h| !h.is_finished() && !h.is_cancelled())
            .unwrap_or(false)
    }
}
