//! 执行上下文与显式对象注册表。
//!
//! # 设计背景（Why）
//! - 处理器在运行前需要拿到宿主 Flow 的共享资源（连接器配置、计数器等）。
//!   这些资源通过 [`FlowContext`] 以引用方式注入，而不是从进程级全局表中按名查找，
//!   这样测试可以为每条 Flow 构造独立的上下文，互不污染。
//!
//! # 契约说明（What）
//! - [`ObjectRegistry`] 由运行时所有，读多写少，使用读写锁保护；
//! - 注入发生在处理链初始化之前，处理器应仅保存 `Arc<FlowContext>`，不得假设注入只发生一次。

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;

type SharedObject = Arc<dyn Any + Send + Sync>;

/// 按名称登记共享对象的注册表。
#[derive(Default)]
pub struct ObjectRegistry {
    entries: RwLock<BTreeMap<String, SharedObject>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记对象，返回被覆盖的旧值。
    pub fn register<T>(&self, name: impl Into<String>, value: Arc<T>) -> Option<SharedObject>
    where
        T: Any + Send + Sync,
    {
        self.entries.write().insert(name.into(), value as SharedObject)
    }

    /// 按名称与类型查找对象；类型不符时返回 `None`。
    pub fn lookup<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self.entries.read().get(name).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn unregister(&self, name: &str) -> Option<SharedObject> {
        self.entries.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// 已登记名称的有序快照。
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// 宿主 Flow 向处理器注入的执行上下文。
#[derive(Debug)]
pub struct FlowContext {
    flow_name: String,
    registry: ObjectRegistry,
}

impl FlowContext {
    pub fn new(flow_name: impl Into<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            registry: ObjectRegistry::new(),
        }
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// `registry().lookup` 的简写。
    pub fn lookup<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.registry.lookup(name)
    }
}
