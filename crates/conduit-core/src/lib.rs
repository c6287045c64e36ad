#![deny(unsafe_code)]
#![doc = "conduit-core: 面向企业集成总线的消息处理核心契约。"]
#![doc = ""]
#![doc = "本 Crate 只定义“单条消息如何被一串处理器依次加工”的最小语义："]
#![doc = "消息模型、处理器与拦截器契约、不可变处理链、生命周期状态机以及执行上下文。"]
#![doc = "运行期热替换、宿主 Flow 等装配能力位于 `conduit-pipeline`。"]

pub mod chain;
pub mod context;
pub mod error;
pub mod event;
pub mod intercept;
pub mod lifecycle;
pub mod processor;

pub use chain::{ProcessorChain, ProcessorChainBuilder};
pub use context::{FlowContext, ObjectRegistry};
pub use error::{CoreError, ErrorCause, codes};
pub use event::{EventId, MessageEvent, Payload};
pub use intercept::{InterceptingProcessor, ListenerSlot, ResponseAdapter};
pub use lifecycle::{Lifecycle, LifecycleState, LifecycleTracker};
pub use processor::{
    FnProcessor, MessageProcessor, ProcessorDescriptor, SharedProcessor, processor_fn,
    same_processor,
};

/// `conduit-core` 统一的结果别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;
