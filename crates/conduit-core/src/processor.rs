//! 消息处理器契约。
//!
//! # 教案式说明
//! - **意图（Why）**：总线中的转换、路由、增强等步骤都归约为“事件进、事件出”的处理器；
//!   深层继承体系在这里收敛为一个 Trait 加三个钩子，具体变体只有普通处理器、
//!   拦截处理器（[`InterceptingProcessor`]）与处理链（[`ProcessorChain`](crate::ProcessorChain)）。
//! - **逻辑（How）**：`process` 返回 `Ok(None)` 表示显式短路，链路据此提前返回；
//!   `lifecycle`/`as_intercepting` 以 `Option` 暴露可选能力，避免调用方做类型向下转换。
//! - **契约（What）**：实现必须 `Send + Sync`，同一实例可能被多个线程同时调用。

use std::{borrow::Cow, fmt, ptr, sync::Arc};

use crate::{
    context::FlowContext, error::CoreError, event::MessageEvent, intercept::InterceptingProcessor,
    lifecycle::Lifecycle,
};

/// 处理器共享句柄。
pub type SharedProcessor = Arc<dyn MessageProcessor>;

/// 消息处理器。
pub trait MessageProcessor: Send + Sync {
    /// 处理一条事件；`Ok(None)` 表示短路，后续步骤不再执行。
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError>;

    /// 返回静态描述，用于日志与快照。
    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::anonymous()
    }

    /// 接收宿主执行上下文。
    fn inject_context(&self, _context: &Arc<FlowContext>) {}

    /// 若参与生命周期管理则返回自身视图。
    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }

    /// 若为拦截处理器则返回自身视图。
    fn as_intercepting(&self) -> Option<&dyn InterceptingProcessor> {
        None
    }
}

/// 处理器描述信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
}

impl ProcessorDescriptor {
    pub fn new(name: impl Into<Cow<'static, str>>, category: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// 未提供描述时的占位值。
    pub fn anonymous() -> Self {
        Self::new("anonymous", "processor")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

/// 按身份比较两个处理器句柄。
///
/// 仅比较数据指针，忽略 vtable，避免同一实例经不同路径转换后比较失败。
pub fn same_processor(left: &SharedProcessor, right: &SharedProcessor) -> bool {
    ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// 以闭包实现的普通处理器。
pub struct FnProcessor<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> MessageProcessor for FnProcessor<F>
where
    F: Fn(MessageEvent) -> Result<Option<MessageEvent>, CoreError> + Send + Sync,
{
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        (self.f)(event)
    }

    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(self.name.clone(), "fn")
    }
}

impl<F> fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 由闭包构造共享处理器。
///
/// ```rust
/// use conduit_core::{MessageEvent, MessageProcessor, processor_fn};
///
/// let upper = processor_fn("upper", |event: MessageEvent| {
///     let text = event.payload_text().unwrap_or_default().to_uppercase();
///     Ok(Some(MessageEvent::text(text)))
/// });
/// let out = upper.process(MessageEvent::text("abc")).unwrap().unwrap();
/// assert_eq!(out.payload_text(), Some("ABC"));
/// ```
pub fn processor_fn<F>(name: impl Into<Cow<'static, str>>, f: F) -> SharedProcessor
where
    F: Fn(MessageEvent) -> Result<Option<MessageEvent>, CoreError> + Send + Sync + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        f,
    })
}
