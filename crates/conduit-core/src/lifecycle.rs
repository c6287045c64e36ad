//! 生命周期契约与前向状态机。
//!
//! # 设计背景（Why）
//! - 处理链、动态管线与宿主 Flow 都遵循同一条 `Constructed → Initialised → Started → Stopped → Disposed`
//!   生命周期；若各自维护布尔标记，极易出现“已释放仍可启动”一类的回退。
//! - 退役的处理链可能在另一线程仍被执行，`stop`/`dispose` 必须可重复调用且不 panic。
//!
//! # 逻辑解析（How）
//! - [`LifecycleTracker`] 以单个 `AtomicU8` 存储状态，通过 CAS 循环推进，仅允许前向跃迁；
//! - 重复进入已到达的状态返回 `Ok(false)`，调用方据此跳过成员回调，实现幂等。
//!
//! # 契约说明（What）
//! - `dispose` 可从任意未释放状态进入；`stop` 仅对 `Started` 生效，其余状态视为无操作；
//! - 任何离开 `Disposed` 或逆向的跃迁返回 [`codes::LIFECYCLE_INVALID_TRANSITION`]。

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::error::{CoreError, codes};

/// 参与生命周期管理的组件契约，所有方法默认无操作。
pub trait Lifecycle: Send + Sync {
    fn initialise(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn dispose(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// 生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Constructed = 0,
    Initialised = 1,
    Started = 2,
    Stopped = 3,
    Disposed = 4,
}

impl LifecycleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Constructed,
            1 => LifecycleState::Initialised,
            2 => LifecycleState::Started,
            3 => LifecycleState::Stopped,
            _ => LifecycleState::Disposed,
        }
    }

    /// 稳定的小写标签，用于日志字段。
    pub fn as_label(self) -> &'static str {
        match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::Initialised => "initialised",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// 跃迁判定结果。
enum Step {
    Apply,
    Skip,
    Reject,
}

fn classify(current: LifecycleState, target: LifecycleState) -> Step {
    use LifecycleState::*;

    if current == target {
        return Step::Skip;
    }
    match (current, target) {
        (Disposed, _) => Step::Reject,
        (_, Disposed) => Step::Apply,
        (Constructed, Initialised) => Step::Apply,
        (Initialised, Started) => Step::Apply,
        (Started, Stopped) => Step::Apply,
        // 未启动即停止：无可停止之物。
        (Constructed | Initialised, Stopped) => Step::Skip,
        _ => Step::Reject,
    }
}

/// 原子前向状态机。
///
/// # 教案式说明
/// - **意图（Why）**：让 `initialise/start/stop/dispose` 的并发调用收敛到唯一终态，
///   并保证成员回调对每个跃迁至多执行一次。
/// - **逻辑（How）**：`advance` 读取当前值，判定跃迁合法性后以 `compare_exchange` 提交；
///   竞争失败时以最新值重试。
/// - **契约（What）**：返回 `Ok(true)` 表示本次调用赢得跃迁，调用方负责执行成员回调；
///   `Ok(false)` 表示状态已到达或无需跃迁。
pub struct LifecycleTracker {
    state: AtomicU8,
}

impl LifecycleTracker {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Constructed as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == LifecycleState::Disposed
    }

    /// 尝试推进到 `target`。
    pub fn advance(&self, target: LifecycleState) -> Result<bool, CoreError> {
        let mut raw = self.state.load(Ordering::Acquire);
        loop {
            let current = LifecycleState::from_raw(raw);
            match classify(current, target) {
                Step::Skip => return Ok(false),
                Step::Reject => {
                    return Err(CoreError::new(
                        codes::LIFECYCLE_INVALID_TRANSITION,
                        format!("lifecycle transition {current} -> {target} is not permitted"),
                    ));
                }
                Step::Apply => match self.state.compare_exchange(
                    raw,
                    target as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(true),
                    Err(actual) => raw = actual,
                },
            }
        }
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LifecycleTracker").field(&self.state()).finish()
    }
}
