//! 管线宿主契约与默认宿主 [`Flow`]。
//!
//! # 设计背景（Why）
//! - 动态管线构建出的新段必须先拿到宿主的执行上下文并完成初始化，才能被发布；
//!   这一步由宿主负责，管线只通过 [`PipelineOwner`] 弱引用回调宿主。
//! - 所有权单向：宿主拥有管线，管线从不经由宿主改写自身状态。
//!
//! # 契约说明（What）
//! - [`Flow`] 以 `Arc::new_cyclic` 构造，使管线在构造期即可持有指向宿主的 `Weak`；
//! - Flow 负责静态段的生命周期，管线只负责自己构建的前后置段。

use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};

use conduit_core::{
    CoreError, FlowContext, InterceptingProcessor, Lifecycle, LifecycleState, LifecycleTracker,
    MessageEvent, MessageProcessor, ProcessorChain, SharedProcessor,
};

use crate::{
    config::PipelineConfig,
    dynamic::{DynamicPipeline, UpdateReport},
    error::PipelineError,
};

/// 动态管线的宿主。
///
/// 管线对每个新加入的成员，在随新一代发布之前依次调用 `inject_context`、
/// `initialise_if_applicable`，管线已启动时再调用 `start_if_applicable`。
/// 从上一代延续下来的成员不会再次经过这些钩子。
pub trait PipelineOwner: Send + Sync {
    /// 宿主名称，用于日志。
    fn owner_name(&self) -> &str;

    /// 向新加入的成员注入执行上下文。
    fn inject_context(&self, processor: &dyn MessageProcessor);

    /// 若处理器参与生命周期则完成初始化。
    fn initialise_if_applicable(&self, processor: &dyn MessageProcessor) -> Result<(), CoreError> {
        match processor.lifecycle() {
            Some(lifecycle) => lifecycle.initialise(),
            None => Ok(()),
        }
    }

    /// 若处理器参与生命周期则启动。
    fn start_if_applicable(&self, processor: &dyn MessageProcessor) -> Result<(), CoreError> {
        match processor.lifecycle() {
            Some(lifecycle) => lifecycle.start(),
            None => Ok(()),
        }
    }
}

/// 拥有静态处理链与一条动态管线的默认宿主。
pub struct Flow {
    name: String,
    context: Arc<FlowContext>,
    static_segment: Arc<ProcessorChain>,
    pipeline: Arc<DynamicPipeline>,
    state: LifecycleTracker,
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<FlowContext> {
        &self.context
    }

    pub fn pipeline(&self) -> &Arc<DynamicPipeline> {
        &self.pipeline
    }

    pub fn static_segment(&self) -> &Arc<ProcessorChain> {
        &self.static_segment
    }

    pub fn state(&self) -> LifecycleState {
        self.state.state()
    }

    /// 经由动态管线处理事件。
    pub fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        self.pipeline.process(event)
    }

    /// 一次性暂存前后置处理器并更新管线。
    pub fn update<P, Q>(&self, pre: P, post: Q) -> Result<UpdateReport, PipelineError>
    where
        P: IntoIterator<Item = SharedProcessor>,
        Q: IntoIterator<Item = SharedProcessor>,
    {
        self.pipeline
            .stage_all(pre.into_iter().collect(), post.into_iter().collect())?;
        self.pipeline.update_pipeline()
    }

    fn stop_members(&self) -> Result<(), CoreError> {
        let pipeline = self.pipeline.stop();
        let static_segment = self.static_segment.stop();
        pipeline.and(static_segment)
    }
}

impl PipelineOwner for Flow {
    fn owner_name(&self) -> &str {
        &self.name
    }

    fn inject_context(&self, processor: &dyn MessageProcessor) {
        processor.inject_context(&self.context);
    }
}

impl Lifecycle for Flow {
    fn initialise(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Initialised)? {
            return Ok(());
        }
        self.static_segment.initialise()?;
        self.pipeline.initialise()
    }

    fn start(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Started)? {
            return Ok(());
        }
        self.static_segment.start()?;
        self.pipeline.start()
    }

    fn stop(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Stopped)? {
            return Ok(());
        }
        self.stop_members()
    }

    fn dispose(&self) -> Result<(), CoreError> {
        let stopped = if self.state.state() == LifecycleState::Started {
            self.stop()
        } else {
            Ok(())
        };
        if !self.state.advance(LifecycleState::Disposed)? {
            return stopped;
        }
        let pipeline = self.pipeline.dispose();
        let static_segment = self.static_segment.dispose();
        stopped.and(pipeline).and(static_segment)
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("static_segment", &self.static_segment)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// [`Flow`] 的构建器。
pub struct FlowBuilder {
    name: String,
    config: Option<PipelineConfig>,
    context: FlowContext,
    processors: Vec<SharedProcessor>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            context: FlowContext::new(name.clone()),
            name,
            config: None,
            processors: Vec::new(),
        }
    }

    /// 指定管线配置；缺省时管线命名为 `<flow>-pipeline`。
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 向静态段追加处理器。
    pub fn processor(mut self, processor: SharedProcessor) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn processors<I>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = SharedProcessor>,
    {
        self.processors.extend(processors);
        self
    }

    /// 在 Flow 上下文中登记共享对象。
    pub fn register<T>(self, name: impl Into<String>, value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        self.context.registry().register(name, value);
        self
    }

    /// 构造 Flow：静态段注入上下文后交给管线捕获。
    pub fn build(self) -> Arc<Flow> {
        let FlowBuilder {
            name,
            config,
            context,
            processors,
        } = self;
        let config = config.unwrap_or_else(|| PipelineConfig::named(format!("{name}-pipeline")));
        let static_segment = Arc::new(
            ProcessorChain::builder(format!("{name}-static"))
                .chain_all(processors)
                .build(),
        );

        let flow = Arc::new_cyclic(|weak: &Weak<Flow>| {
            let owner: Weak<dyn PipelineOwner> = weak.clone();
            Flow {
                name,
                context: Arc::new(context),
                static_segment,
                pipeline: Arc::new(DynamicPipeline::with_owner(config, owner)),
                state: LifecycleTracker::new(),
            }
        });

        flow.static_segment.inject_context(&flow.context);
        let static_segment: SharedProcessor = flow.static_segment.clone();
        flow.pipeline.set_listener(static_segment);
        tracing::debug!(flow = %flow.name, pipeline = flow.pipeline.name(), "flow assembled");
        flow
    }
}
