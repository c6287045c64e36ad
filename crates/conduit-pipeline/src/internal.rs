//! 动态管线内部的代际发布缓冲区。
//!
//! # 设计背景（Why）
//! - 处理路径需要无锁读取“当前代”，更新路径需要一次性替换整代并让观察者知道替换已完成；
//!   本模块以 `ArcSwap<T>` 加逻辑 epoch 封装这一协调点，不向外暴露实现类型。
//!
//! # 逻辑解析（How）
//! - 读：[`GenerationBuffer::load`] 调用 `load_full` 返回独立 `Arc`，调用方在整个处理过程中持有它；
//! - 写：调用方在外层互斥锁内构造完整新代，调用 [`GenerationBuffer::swap`] 原子替换并取回旧代，
//!   随后 [`GenerationBuffer::bump_epoch`] 推进逻辑时钟。
//!
//! # 风险与考量（Trade-offs）
//! - `epoch` 仅是逻辑时钟，写入的线性化仍依赖外层互斥锁；
//! - 读路径使用 `load_full` 而非 `load`，多一次引用计数递增，换来旧代强引用计数可用于判断在途调用是否排空。

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;

/// 单值快照与 epoch 计数。
pub(crate) struct GenerationBuffer<T> {
    current: ArcSwap<T>,
    epoch: AtomicU64,
}

impl<T> GenerationBuffer<T> {
    /// 以初始值构造，epoch 为 0。
    pub(crate) fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// 原子替换当前值，返回被替换的旧值。
    #[inline]
    pub(crate) fn swap(&self, next: Arc<T>) -> Arc<T> {
        self.current.swap(next)
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 在完成替换后自增 epoch，返回更新后的值。
    #[inline]
    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}
