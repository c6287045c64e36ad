//! 拦截处理器契约与响应阶段适配器。
//!
//! # 设计背景（Why）
//! - 拦截处理器在完成自身工作后把事件交给唯一的下游“监听者”，形成责任链；
//!   处理链装配时会把拦截器之后的全部步骤打包为它的监听者。
//! - 响应阶段的后置处理（先让下游处理、再加工响应）天然就是一个拦截器，
//!   因此以 [`ResponseAdapter`] 提供统一实现，多个适配器串联时按注册逆序作用于响应。
//!
//! # 风险与权衡（Trade-offs）
//! - 监听者槽位在每次装配时被重写；同一个拦截器实例若同时出现在新旧两代处理链中，
//!   旧链上的在途调用会看到新的监听者。需要强一致的场景应为每一代构造独立实例。

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;

use crate::{
    context::FlowContext,
    error::CoreError,
    event::MessageEvent,
    lifecycle::Lifecycle,
    processor::{MessageProcessor, ProcessorDescriptor, SharedProcessor},
};

/// 持有单一下游监听者的处理器。
pub trait InterceptingProcessor: MessageProcessor {
    /// 设置下游监听者，覆盖先前的值。
    fn set_listener(&self, listener: SharedProcessor);

    /// 当前下游监听者。
    fn listener(&self) -> Option<SharedProcessor>;
}

/// 拦截器内部使用的监听者槽位。
///
/// # 教案式说明
/// - **意图（Why）**：读路径（每条消息）远多于写路径（每次装配），槽位以
///   `ArcSwapOption` 实现无锁读取。
/// - **逻辑（How）**：`ArcSwap` 要求被包裹类型定长，因此内部再包一层 `Arc`。
/// - **契约（What）**：未设置监听者时，[`Self::process_next`] 原样返回事件，
///   即拦截器位于链尾时不改变链路结果。
#[derive(Default)]
pub struct ListenerSlot {
    listener: ArcSwapOption<SharedProcessor>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listener: SharedProcessor) {
        self.listener.store(Some(Arc::new(listener)));
    }

    pub fn get(&self) -> Option<SharedProcessor> {
        self.listener
            .load_full()
            .map(|listener| Arc::clone(&*listener))
    }

    pub fn is_set(&self) -> bool {
        self.listener.load().is_some()
    }

    /// 把事件交给下游监听者。
    pub fn process_next(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        match self.listener.load_full() {
            Some(next) => next.process(event),
            None => Ok(Some(event)),
        }
    }
}

impl fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listener = self.get().map(|listener| listener.describe());
        f.debug_struct("ListenerSlot")
            .field("listener", &listener)
            .finish()
    }
}

/// 响应阶段适配器：先交给监听者，再用被包装的处理器加工响应。
///
/// ```rust
/// use conduit_core::{MessageEvent, MessageProcessor, ProcessorChain, ResponseAdapter, processor_fn};
///
/// let tag = |label: &'static str| {
///     processor_fn(label, move |mut event: MessageEvent| {
///         event.append_text(label)?;
///         Ok(Some(event))
///     })
/// };
/// let chain = ProcessorChain::builder("post")
///     .chain(ResponseAdapter::wrap(tag("(post1)")))
///     .chain(ResponseAdapter::wrap(tag("(post2)")))
///     .build();
/// let out = chain.process(MessageEvent::text("in->")).unwrap().unwrap();
/// assert_eq!(out.payload_text(), Some("in->(post2)(post1)"));
/// ```
pub struct ResponseAdapter {
    inner: SharedProcessor,
    next: ListenerSlot,
}

impl ResponseAdapter {
    pub fn new(inner: SharedProcessor) -> Self {
        Self {
            inner,
            next: ListenerSlot::new(),
        }
    }

    /// 包装并返回共享句柄。
    pub fn wrap(inner: SharedProcessor) -> SharedProcessor {
        Arc::new(Self::new(inner))
    }

    pub fn inner(&self) -> &SharedProcessor {
        &self.inner
    }
}

impl MessageProcessor for ResponseAdapter {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        match self.next.process_next(event)? {
            Some(response) => self.inner.process(response),
            None => Ok(None),
        }
    }

    fn describe(&self) -> ProcessorDescriptor {
        let inner = self.inner.describe();
        ProcessorDescriptor::new(inner.name().to_owned(), "response-adapter")
    }

    fn inject_context(&self, context: &Arc<FlowContext>) {
        self.inner.inject_context(context);
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        self.inner.lifecycle()
    }

    fn as_intercepting(&self) -> Option<&dyn InterceptingProcessor> {
        Some(self)
    }
}

impl InterceptingProcessor for ResponseAdapter {
    fn set_listener(&self, listener: SharedProcessor) {
        self.next.set(listener);
    }

    fn listener(&self) -> Option<SharedProcessor> {
        self.next.get()
    }
}
