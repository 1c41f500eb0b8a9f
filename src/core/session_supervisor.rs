//! 会话监管：单写者守卫与取消
//!
//! 同一个 Agent 同时只允许一个变更 Transcript 的调用；并发调用直接以 AgentBusy 拒绝。
//! 守卫在 Drop 时释放，调用方放弃（future 被丢弃）时也不会遗留占用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 会话级生命周期：busy 标志与根取消令牌
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    busy: Arc<AtomicBool>,
    cancel_token: CancellationToken,
}

/// 持有期间 Agent 处于 busy 状态
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试占用；已被占用时返回 AgentBusy
    pub fn acquire(&self) -> Result<BusyGuard, AgentError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AgentError::AgentBusy)?;
        Ok(BusyGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 关闭时取消所有由该监管者派生的请求（不可恢复）
    pub fn cancel_all(&self) {
        self.cancel_token.cancel();
    }

    /// 单个请求的子令牌
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
