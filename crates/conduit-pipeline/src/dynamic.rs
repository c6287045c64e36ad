//! 可在运行期替换前置段与后置段的动态管线。
//!
//! # 设计背景（Why）
//! - 总线在不停流的前提下需要为某条 Flow 临时插入审计、脱敏、采样等处理器；
//!   管线由固定的静态段与两段可替换的前置/后置段组成，替换只发生在前后两段。
//! - 运行中的调用必须看到完整的一代链路：要么全旧，要么全新。
//!
//! # 逻辑解析（How）
//! - 调用方先把处理器追加到暂存列表，再调用 [`DynamicPipeline::update_pipeline`]；
//! - 更新在互斥锁内完成“取走暂存 → 激活新加入的成员 → 装配 `pre → static → post` 单一处理链
//!   → 单次原子发布 → 推进 epoch → 拆除离开管线的成员”；
//! - `process` 只做一次 `load_full` 取得当前代，整个调用期间持有它，从不获取互斥锁。
//!
//! # 契约说明（What）
//! - 静态段由第一次 `set_listener` 捕获，此后不再改变，也从不由管线拆除；
//! - 生命周期按成员身份管理：重新暂存、延续到新一代的实例既不重复激活也不被拆除；
//! - 初始化失败时旧代保持发布状态，取走的暂存处理器按原顺序放回列表头部，且不被拆除，
//!   已激活的成员留待重试时直接复用；
//! - 释放后的管线拒绝处理与更新。
//!
//! # 风险与权衡（Trade-offs）
//! - [`TeardownPolicy::Immediate`] 下旧成员可能在仍被在途调用执行时被拆除；
//!   需要更强保证时选择 [`TeardownPolicy::Drain`]，代价是更新调用可能阻塞至超时。
//! - 拦截处理器的监听者在发布前一刻被改写；同一拦截器实例延续到新一代时，
//!   旧代上的在途调用可能经由它进入新一代的后继。

use std::{
    fmt, mem, ptr,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use conduit_core::{
    CoreError, FlowContext, InterceptingProcessor, Lifecycle, LifecycleState, LifecycleTracker,
    ListenerSlot, MessageEvent, MessageProcessor, ProcessorChain, ProcessorDescriptor,
    ResponseAdapter, SharedProcessor, codes as core_codes, same_processor,
};
use parking_lot::Mutex;

use crate::{
    config::{PipelineConfig, PostOrder, TeardownPolicy},
    error::PipelineError,
    flow::PipelineOwner,
    internal::GenerationBuffer,
    observability::ops,
};

/// Drain 策略下轮询在途调用的间隔。
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// 管线中的段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Pre,
    Static,
    Post,
}

impl Segment {
    /// 对应 `pipeline.segment` 日志字段的取值。
    pub fn as_label(self) -> &'static str {
        match self {
            Segment::Pre => "pre",
            Segment::Static => "static",
            Segment::Post => "post",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// 可暂存的一侧。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Pre,
    Post,
}

fn contains(members: &[SharedProcessor], processor: &SharedProcessor) -> bool {
    members
        .iter()
        .any(|member| same_processor(member, processor))
}

/// 暂存的前置/后置处理器。
#[derive(Default)]
struct Staging {
    pre: Vec<SharedProcessor>,
    post: Vec<SharedProcessor>,
}

impl Staging {
    fn take(&mut self) -> Staging {
        mem::take(self)
    }

    /// 把取走的快照放回列表头部，快照之后新加入的处理器排在其后。
    fn restore(&mut self, mut snapshot: Staging) {
        snapshot.pre.append(&mut self.pre);
        snapshot.post.append(&mut self.post);
        *self = snapshot;
    }

    fn list_mut(&mut self, side: Side) -> &mut Vec<SharedProcessor> {
        match side {
            Side::Pre => &mut self.pre,
            Side::Post => &mut self.post,
        }
    }

    /// 依暂存顺序列出成员及其所在段。
    fn members(&self) -> impl Iterator<Item = (Segment, &SharedProcessor)> {
        let pre = self.pre.iter().map(|processor| (Segment::Pre, processor));
        let post = self.post.iter().map(|processor| (Segment::Post, processor));
        pre.chain(post)
    }
}

/// 写锁保护的状态：已完成激活、尚未随任何一代发布的成员。
///
/// 初始化失败的更新会把已激活的成员留在这里，重试时直接复用；
/// 下一次发布时，未进入新一代的成员作为离场成员拆除。
#[derive(Default)]
struct Prepared {
    members: Vec<(Segment, SharedProcessor)>,
}

impl Prepared {
    fn contains(&self, processor: &SharedProcessor) -> bool {
        self.members
            .iter()
            .any(|(_, member)| same_processor(member, processor))
    }

    fn push(&mut self, segment: Segment, processor: &SharedProcessor) {
        self.members.push((segment, Arc::clone(processor)));
    }

    fn take(&mut self) -> Vec<(Segment, SharedProcessor)> {
        mem::take(&mut self.members)
    }
}

/// 第一次 `set_listener` 捕获的静态段。
struct StaticSegment {
    /// 调用方传入的原始处理器，用于身份比较与内省。
    source: SharedProcessor,
    /// 参与组装的处理器；原始处理器为拦截器时是其一元处理链封装。
    segment: SharedProcessor,
}

/// 一次发布的完整链路。
///
/// `pre`/`post` 保存暂存时的原始成员，用于生命周期与内省；
/// `entry` 是由 `pre → static → post` 装配出的单一处理链，拦截器的监听者即其后的全部成员。
struct Generation {
    epoch: u64,
    pre: Vec<SharedProcessor>,
    static_segment: Option<SharedProcessor>,
    post: Vec<SharedProcessor>,
    entry: Option<ProcessorChain>,
}

impl Generation {
    fn empty() -> Self {
        Self {
            epoch: 0,
            pre: Vec::new(),
            static_segment: None,
            post: Vec::new(),
            entry: None,
        }
    }

    fn process(
        &self,
        pipeline: &str,
        event: MessageEvent,
    ) -> Result<Option<MessageEvent>, CoreError> {
        match &self.entry {
            Some(entry) => entry.process(event),
            None => Err(CoreError::new(
                core_codes::PIPELINE_NOT_READY,
                format!("pipeline `{pipeline}` has no static segment yet"),
            )),
        }
    }

    fn contains(&self, processor: &SharedProcessor) -> bool {
        contains(&self.pre, processor) || contains(&self.post, processor)
    }

    /// 去重后的成员，按启动顺序（前置在前）排列。
    fn members_in_start_order(&self) -> Vec<(Segment, SharedProcessor)> {
        let mut members: Vec<(Segment, SharedProcessor)> = Vec::new();
        for (segment, list) in [(Segment::Pre, &self.pre), (Segment::Post, &self.post)] {
            for processor in list {
                if !members
                    .iter()
                    .any(|(_, member)| same_processor(member, processor))
                {
                    members.push((segment, Arc::clone(processor)));
                }
            }
        }
        members
    }

    /// 去重后的成员，按拆除顺序（启动顺序的逆序）排列。
    fn members_in_teardown_order(&self) -> Vec<(Segment, SharedProcessor)> {
        let mut members = self.members_in_start_order();
        members.reverse();
        members
    }
}

/// 当前发布代的只读视图。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub epoch: u64,
    pub pre: Vec<String>,
    pub static_segment: Option<String>,
    pub post: Vec<String>,
}

/// 一次成功更新的结果。
#[derive(Debug)]
pub struct UpdateReport {
    /// 新代的 epoch。
    pub epoch: u64,
    pub pre_len: usize,
    pub post_len: usize,
    /// 离场成员拆除时的失败；新代已生效，这些错误仅供上报。
    pub disposal_errors: Vec<PipelineError>,
}

impl UpdateReport {
    pub fn is_clean(&self) -> bool {
        self.disposal_errors.is_empty()
    }
}

/// 动态管线。
///
/// # 教案式说明
/// - **意图（Why）**：在静态段固定的前提下，以“旁路激活 + 单次原子发布”替换前后置段，
///   处理路径全程无锁。
/// - **逻辑（How）**：
///   1. `staging` 仅保护暂存列表，`mutation` 串行化全部写路径（更新、监听者捕获、生命周期），
///      并持有已激活未发布的成员；
///   2. 只有新加入管线的成员经宿主注入上下文并初始化，随后装配新代、`GenerationBuffer::swap` 发布、
///      `bump_epoch` 推进逻辑时钟；
///   3. 未进入新一代的旧成员按 [`TeardownPolicy`] 拆除。
/// - **契约（What）**：调用方通常以 `Arc` 持有管线；宿主通过 [`PipelineOwner`] 弱引用参与上下文注入，
///   宿主释放后更新返回 [`PipelineError::OwnerReleased`]。
pub struct DynamicPipeline {
    config: PipelineConfig,
    owner: Option<Weak<dyn PipelineOwner>>,
    staging: Mutex<Staging>,
    static_segment: OnceLock<StaticSegment>,
    external: ListenerSlot,
    generations: GenerationBuffer<Generation>,
    mutation: Mutex<Prepared>,
    state: LifecycleTracker,
    claimed_id: Mutex<Option<String>>,
}

impl DynamicPipeline {
    /// 构造不依附宿主的管线，新成员直接调用自身生命周期方法完成初始化。
    pub fn new(config: PipelineConfig) -> Self {
        Self::from_parts(config, None)
    }

    /// 构造由宿主管理上下文注入与初始化的管线。
    pub fn with_owner(config: PipelineConfig, owner: Weak<dyn PipelineOwner>) -> Self {
        Self::from_parts(config, Some(owner))
    }

    fn from_parts(config: PipelineConfig, owner: Option<Weak<dyn PipelineOwner>>) -> Self {
        Self {
            config,
            owner,
            staging: Mutex::new(Staging::default()),
            static_segment: OnceLock::new(),
            external: ListenerSlot::new(),
            generations: GenerationBuffer::new(Generation::empty()),
            mutation: Mutex::new(Prepared::default()),
            state: LifecycleTracker::new(),
            claimed_id: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 追加前置处理器，下次更新时生效。
    pub fn add_pre_message_processor(&self, processor: SharedProcessor) -> Result<(), PipelineError> {
        self.stage(Side::Pre, processor)
    }

    /// 追加后置处理器，下次更新时生效。
    pub fn add_post_message_processor(
        &self,
        processor: SharedProcessor,
    ) -> Result<(), PipelineError> {
        self.stage(Side::Post, processor)
    }

    /// 按身份移除第一个匹配的暂存前置处理器，返回是否找到。
    pub fn remove_pre_message_processor(&self, processor: &SharedProcessor) -> bool {
        self.unstage(Side::Pre, processor)
    }

    /// 按身份移除第一个匹配的暂存后置处理器，返回是否找到。
    pub fn remove_post_message_processor(&self, processor: &SharedProcessor) -> bool {
        self.unstage(Side::Post, processor)
    }

    pub fn staged_pre_len(&self) -> usize {
        self.staging.lock().pre.len()
    }

    pub fn staged_post_len(&self) -> usize {
        self.staging.lock().post.len()
    }

    /// 第一次 `set_listener` 捕获的原始处理器。
    pub fn static_segment(&self) -> Option<SharedProcessor> {
        self.static_segment
            .get()
            .map(|captured| Arc::clone(&captured.source))
    }

    /// 最近一次发布完成后的逻辑 epoch。
    pub fn epoch(&self) -> u64 {
        self.generations.epoch()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.state()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let generation = self.generations.load();
        let names = |members: &[SharedProcessor]| {
            members
                .iter()
                .map(|member| member.describe().name().to_owned())
                .collect()
        };
        PipelineSnapshot {
            epoch: generation.epoch,
            pre: names(&generation.pre),
            static_segment: generation
                .static_segment
                .as_ref()
                .map(|segment| segment.describe().name().to_owned()),
            post: names(&generation.post),
        }
    }

    /// 以暂存列表构建并发布新一代链路。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：
    ///   1. 取得写锁后校验生命周期与静态段；
    ///   2. 在暂存锁内一次性取走两个列表，之后到达的 `add_*` 只影响下一次更新；
    ///   3. 当前代与已激活列表之外的成员经宿主注入上下文并初始化（管线已启动时同时启动）；
    ///   4. 装配新代并以单次 `swap` 发布、推进 epoch，再拆除未进入新一代的旧成员。
    /// - **契约（What）**：失败时返回 [`PipelineError::Initialisation`]，旧代继续服务，
    ///   取走的处理器按原顺序放回暂存列表头部，任何成员都不会被拆除。
    pub fn update_pipeline(&self) -> Result<UpdateReport, PipelineError> {
        let mut prepared = self.mutation.lock();
        self.ensure_live()?;
        self.ensure_ready()?;

        let snapshot = self.staging.lock().take();
        if let Err(err) = self.activate_all(&mut prepared, &snapshot) {
            self.staging.lock().restore(snapshot);
            tracing::error!(
                pipeline.id = %self.config.name,
                pipeline.op = ops::UPDATE,
                error = %err,
                "pipeline update aborted; previous generation stays published"
            );
            return Err(err);
        }

        let epoch = self.generations.epoch() + 1;
        let Staging { pre, post } = snapshot;
        Ok(self.publish(&mut prepared, epoch, pre, post, ops::UPDATE))
    }

    /// [`Self::update_pipeline`] 的别名。
    pub fn build(&self) -> Result<UpdateReport, PipelineError> {
        self.update_pipeline()
    }

    /// 丢弃暂存处理器并发布只含静态段的新一代链路。
    pub fn reset_and_update(&self) -> Result<UpdateReport, PipelineError> {
        let mut prepared = self.mutation.lock();
        self.ensure_live()?;
        self.ensure_ready()?;

        let dropped = self.staging.lock().take();
        tracing::debug!(
            pipeline.id = %self.config.name,
            dropped_pre = dropped.pre.len(),
            dropped_post = dropped.post.len(),
            "staged processors discarded"
        );
        let epoch = self.generations.epoch() + 1;
        Ok(self.publish(&mut prepared, epoch, Vec::new(), Vec::new(), ops::RESET))
    }

    /// 认领管线并返回批量构建器。
    ///
    /// 第一次调用以 `id`（缺省时生成）认领管线；此后必须以相同 ID 调用，
    /// 否则返回 [`PipelineError::IdMismatch`]，防止两个调用方交替改写同一管线。
    pub fn dynamic_pipeline(
        &self,
        id: Option<&str>,
    ) -> Result<DynamicPipelineBuilder<'_>, PipelineError> {
        let mut claimed = self.claimed_id.lock();
        let id = match claimed.as_deref() {
            None => id.map_or_else(|| self.generate_id(), str::to_owned),
            Some(current) if id == Some(current) => current.to_owned(),
            Some(current) => {
                return Err(PipelineError::IdMismatch {
                    expected: current.to_owned(),
                    actual: id.unwrap_or("<none>").to_owned(),
                });
            }
        };
        if claimed.is_none() {
            *claimed = Some(id.clone());
        }
        drop(claimed);
        Ok(DynamicPipelineBuilder {
            pipeline: self,
            id,
            pre: Vec::new(),
            post: Vec::new(),
        })
    }

    /// 以当前发布代处理事件。
    pub fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        if self.state.is_disposed() {
            return Err(self.disposed_error());
        }
        let generation = self.generations.load();
        generation.process(&self.config.name, event)
    }

    fn generate_id(&self) -> String {
        let sequence = NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed);
        format!("{}-{sequence:08x}", self.config.name)
    }

    fn disposed_error(&self) -> CoreError {
        CoreError::new(
            core_codes::PIPELINE_DISPOSED,
            format!("pipeline `{}` has been disposed", self.config.name),
        )
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.state.is_disposed() {
            return Err(PipelineError::Lifecycle(self.disposed_error()));
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), PipelineError> {
        if self.static_segment.get().is_none() {
            return Err(PipelineError::NotReady {
                pipeline: self.config.name.clone(),
            });
        }
        Ok(())
    }

    fn validate(&self, processor: &SharedProcessor) -> Result<(), PipelineError> {
        self.ensure_live()?;
        if ptr::addr_eq(Arc::as_ptr(processor), self as *const Self) {
            return Err(PipelineError::argument(
                "a dynamic pipeline cannot be staged inside itself",
            ));
        }
        if let Some(captured) = self.static_segment.get()
            && (same_processor(processor, &captured.source)
                || same_processor(processor, &captured.segment))
        {
            return Err(PipelineError::argument(
                "the static segment cannot be staged as a pre or post processor",
            ));
        }
        Ok(())
    }

    fn stage(&self, side: Side, processor: SharedProcessor) -> Result<(), PipelineError> {
        self.validate(&processor)?;
        self.staging.lock().list_mut(side).push(processor);
        Ok(())
    }

    pub(crate) fn stage_all(
        &self,
        pre: Vec<SharedProcessor>,
        post: Vec<SharedProcessor>,
    ) -> Result<(), PipelineError> {
        for processor in pre.iter().chain(post.iter()) {
            self.validate(processor)?;
        }
        let mut staging = self.staging.lock();
        staging.pre.extend(pre);
        staging.post.extend(post);
        Ok(())
    }

    fn unstage(&self, side: Side, processor: &SharedProcessor) -> bool {
        let mut staging = self.staging.lock();
        let list = staging.list_mut(side);
        match list
            .iter()
            .position(|candidate| same_processor(candidate, processor))
        {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// 装配 `pre → static → post` 执行链。
    ///
    /// 后置顺序为 [`PostOrder::Reverse`] 时，普通后置处理器包装为响应阶段适配器；
    /// 本身即为拦截器的后置处理器保持原样，由其自行决定响应阶段行为。
    fn compose(
        &self,
        epoch: u64,
        pre: &[SharedProcessor],
        post: &[SharedProcessor],
    ) -> Option<ProcessorChain> {
        let captured = self.static_segment.get()?;
        let respond_in_reverse = self.config.post_order == PostOrder::Reverse;
        let post = post.iter().map(|processor| {
            if respond_in_reverse && processor.as_intercepting().is_none() {
                ResponseAdapter::wrap(Arc::clone(processor))
            } else {
                Arc::clone(processor)
            }
        });
        let chain = ProcessorChain::builder(format!("{}-{epoch}", self.config.name))
            .chain_all(pre.iter().cloned())
            .chain(Arc::clone(&captured.segment))
            .chain_all(post)
            .reset_trailing_listener()
            .build();
        Some(chain)
    }

    fn owner(&self) -> Result<Option<Arc<dyn PipelineOwner>>, PipelineError> {
        match &self.owner {
            None => Ok(None),
            Some(weak) => weak.upgrade().map(Some).ok_or(PipelineError::OwnerReleased),
        }
    }

    /// 激活当前代与已激活列表之外的成员，成功者记入 `prepared`。
    fn activate_all(&self, prepared: &mut Prepared, staged: &Staging) -> Result<(), PipelineError> {
        let current = self.generations.load();
        let fresh: Vec<(Segment, &SharedProcessor)> = staged
            .members()
            .filter(|(_, processor)| !current.contains(processor) && !prepared.contains(processor))
            .collect();
        drop(current);
        if fresh.is_empty() {
            return Ok(());
        }

        let owner = self.owner()?;
        let start = self.state.state() == LifecycleState::Started;
        for (segment, processor) in fresh {
            // 同一实例在本次暂存中出现多次时只激活一次。
            if prepared.contains(processor) {
                continue;
            }
            self.activate(owner.as_deref(), processor.as_ref(), start)
                .map_err(|source| PipelineError::Initialisation { segment, source })?;
            prepared.push(segment, processor);
        }
        Ok(())
    }

    fn activate(
        &self,
        owner: Option<&dyn PipelineOwner>,
        processor: &dyn MessageProcessor,
        start: bool,
    ) -> Result<(), CoreError> {
        let initialised = match owner {
            Some(owner) => {
                owner.inject_context(processor);
                owner.initialise_if_applicable(processor)
            }
            None => processor
                .lifecycle()
                .map_or(Ok(()), |lifecycle| lifecycle.initialise()),
        };
        initialised.map_err(|err| {
            self.member_error(
                processor,
                "initialise",
                core_codes::LIFECYCLE_INITIALISE_FAILED,
                err,
            )
        })?;
        if !start {
            return Ok(());
        }
        let started = match owner {
            Some(owner) => owner.start_if_applicable(processor),
            None => processor
                .lifecycle()
                .map_or(Ok(()), |lifecycle| lifecycle.start()),
        };
        started.map_err(|err| {
            self.member_error(processor, "start", core_codes::LIFECYCLE_START_FAILED, err)
        })
    }

    fn member_error(
        &self,
        processor: &dyn MessageProcessor,
        phase: &'static str,
        code: &'static str,
        cause: CoreError,
    ) -> CoreError {
        CoreError::new(
            code,
            format!(
                "processor `{}` in pipeline `{}` failed to {phase}",
                processor.describe().name(),
                self.config.name
            ),
        )
        .with_cause(cause)
    }

    /// 停止（管线已启动时）并释放一个离场成员，返回全部失败。
    fn tear_down(&self, processor: &dyn MessageProcessor, started: bool) -> Vec<CoreError> {
        let Some(lifecycle) = processor.lifecycle() else {
            return Vec::new();
        };
        let stopped = if started { lifecycle.stop().err() } else { None };
        [stopped, lifecycle.dispose().err()]
            .into_iter()
            .flatten()
            .map(|err| {
                self.member_error(
                    processor,
                    "tear down",
                    core_codes::LIFECYCLE_TEARDOWN_FAILED,
                    err,
                )
            })
            .collect()
    }

    /// 发布新代并拆除离场成员，调用方必须持有写锁。
    fn publish(
        &self,
        prepared: &mut Prepared,
        epoch: u64,
        pre: Vec<SharedProcessor>,
        post: Vec<SharedProcessor>,
        op: &'static str,
    ) -> UpdateReport {
        let (pre_len, post_len) = (pre.len(), post.len());
        let entry = self.compose(epoch, &pre, &post);
        let next = Arc::new(Generation {
            epoch,
            pre,
            static_segment: self
                .static_segment
                .get()
                .map(|captured| Arc::clone(&captured.segment)),
            post,
            entry,
        });
        let leftovers = prepared.take();
        let previous = self.generations.swap(Arc::clone(&next));
        let epoch = self.generations.bump_epoch();
        let disposal_errors = self.retire(previous, leftovers, &next);

        tracing::info!(
            pipeline.id = %self.config.name,
            pipeline.epoch = epoch,
            pipeline.op = op,
            pre = pre_len,
            post = post_len,
            "pipeline.mutation applied"
        );
        UpdateReport {
            epoch,
            pre_len,
            post_len,
            disposal_errors,
        }
    }

    /// 拆除旧代中、以及已激活却未被发布的成员里不属于新一代的部分。
    fn retire(
        &self,
        previous: Arc<Generation>,
        leftovers: Vec<(Segment, SharedProcessor)>,
        next: &Generation,
    ) -> Vec<PipelineError> {
        let mut departing = previous.members_in_teardown_order();
        for (segment, processor) in leftovers {
            if !departing
                .iter()
                .any(|(_, member)| same_processor(member, &processor))
            {
                departing.push((segment, processor));
            }
        }
        departing.retain(|(_, processor)| !next.contains(processor));
        if departing.is_empty() {
            return Vec::new();
        }
        if let TeardownPolicy::Drain { timeout } = self.config.teardown {
            self.drain(&previous, timeout);
        }

        let started = self.state.state() == LifecycleState::Started;
        let mut errors = Vec::new();
        for (segment, processor) in departing {
            for source in self.tear_down(processor.as_ref(), started) {
                tracing::warn!(
                    pipeline.id = %self.config.name,
                    pipeline.segment = segment.as_label(),
                    error = %source,
                    "retired processor teardown failed"
                );
                errors.push(PipelineError::Disposal { segment, source });
            }
        }
        errors
    }

    /// 等待持有旧代的在途调用结束；`previous` 自身占一个强引用。
    fn drain(&self, previous: &Arc<Generation>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Arc::strong_count(previous) > 1 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    pipeline.id = %self.config.name,
                    pipeline.epoch = previous.epoch,
                    in_flight = Arc::strong_count(previous) - 1,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "drain timed out; tearing down a generation that still has calls in flight"
                );
                return;
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    /// 当前代成员与已激活未发布成员，按启动顺序去重。
    fn live_members(&self, prepared: &Prepared) -> Vec<(Segment, SharedProcessor)> {
        let mut members = self.generations.load().members_in_start_order();
        for (segment, processor) in &prepared.members {
            if !members
                .iter()
                .any(|(_, member)| same_processor(member, processor))
            {
                members.push((*segment, Arc::clone(processor)));
            }
        }
        members
    }

    fn stop_locked(&self, prepared: &Prepared) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Stopped)? {
            return Ok(());
        }
        let mut first = None;
        for (segment, processor) in self.live_members(prepared).into_iter().rev() {
            let Some(lifecycle) = processor.lifecycle() else {
                continue;
            };
            if let Err(err) = lifecycle.stop() {
                let err = self.member_error(
                    processor.as_ref(),
                    "stop",
                    core_codes::LIFECYCLE_TEARDOWN_FAILED,
                    err,
                );
                tracing::warn!(
                    pipeline.id = %self.config.name,
                    pipeline.segment = segment.as_label(),
                    error = %err,
                    "processor failed to stop"
                );
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Lifecycle for DynamicPipeline {
    /// 成员在加入管线时已完成初始化，这里只推进管线自身的状态。
    fn initialise(&self) -> Result<(), CoreError> {
        let _guard = self.mutation.lock();
        self.state.advance(LifecycleState::Initialised).map(|_| ())
    }

    fn start(&self) -> Result<(), CoreError> {
        let prepared = self.mutation.lock();
        if !self.state.advance(LifecycleState::Started)? {
            return Ok(());
        }
        for (_, processor) in self.live_members(&prepared) {
            if let Some(lifecycle) = processor.lifecycle() {
                lifecycle.start().map_err(|err| {
                    self.member_error(
                        processor.as_ref(),
                        "start",
                        core_codes::LIFECYCLE_START_FAILED,
                        err,
                    )
                })?;
            }
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), CoreError> {
        let prepared = self.mutation.lock();
        self.stop_locked(&prepared)
    }

    /// 释放当前代与已激活未发布的成员并丢弃暂存处理器；静态段不受影响。
    fn dispose(&self) -> Result<(), CoreError> {
        let mut prepared = self.mutation.lock();
        let mut first = None;
        if self.state.state() == LifecycleState::Started
            && let Err(err) = self.stop_locked(&prepared)
        {
            first = Some(err);
        }
        if !self.state.advance(LifecycleState::Disposed)? {
            return first.map_or(Ok(()), Err);
        }
        drop(self.staging.lock().take());

        let members = self.live_members(&prepared);
        prepared.take();
        for (segment, processor) in members.into_iter().rev() {
            let Some(lifecycle) = processor.lifecycle() else {
                continue;
            };
            if let Err(err) = lifecycle.dispose() {
                let err = self.member_error(
                    processor.as_ref(),
                    "dispose",
                    core_codes::LIFECYCLE_TEARDOWN_FAILED,
                    err,
                );
                tracing::warn!(
                    pipeline.id = %self.config.name,
                    pipeline.segment = segment.as_label(),
                    error = %err,
                    "processor failed to dispose"
                );
                first.get_or_insert(err);
            }
        }
        tracing::debug!(pipeline.id = %self.config.name, "pipeline disposed");
        first.map_or(Ok(()), Err)
    }
}

impl MessageProcessor for DynamicPipeline {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        DynamicPipeline::process(self, event)
    }

    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(self.config.name.clone(), "dynamic-pipeline")
    }

    fn inject_context(&self, context: &Arc<FlowContext>) {
        for (_, processor) in self.generations.load().members_in_start_order() {
            processor.inject_context(context);
        }
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }

    fn as_intercepting(&self) -> Option<&dyn InterceptingProcessor> {
        Some(self)
    }
}

impl InterceptingProcessor for DynamicPipeline {
    /// 第一次调用捕获静态段并发布只含静态段的一代；此后只更新对外可见的监听者。
    ///
    /// 原始处理器为拦截器时先包装为一元处理链：前置拦截器的监听者包含静态段与后置段，
    /// 封装后静态段不会被改写为再拦截一次后置段。
    fn set_listener(&self, listener: SharedProcessor) {
        self.external.set(Arc::clone(&listener));

        let _guard = self.mutation.lock();
        if self.static_segment.get().is_some() {
            let descriptor = listener.describe();
            tracing::debug!(
                pipeline.id = %self.config.name,
                pipeline.op = ops::LISTENER,
                listener = descriptor.name(),
                "static segment already captured; only the external listener changed"
            );
            return;
        }

        let segment: SharedProcessor = if listener.as_intercepting().is_some() {
            Arc::new(ProcessorChain::single(Arc::clone(&listener)))
        } else {
            Arc::clone(&listener)
        };
        let captured = StaticSegment {
            source: listener,
            segment,
        };
        if self.static_segment.set(captured).is_err() {
            return;
        }

        let current = self.generations.load();
        let epoch = self.generations.epoch() + 1;
        let next = Arc::new(Generation {
            epoch,
            pre: current.pre.clone(),
            static_segment: self
                .static_segment
                .get()
                .map(|captured| Arc::clone(&captured.segment)),
            post: current.post.clone(),
            entry: self.compose(epoch, &current.pre, &current.post),
        });
        drop(current);
        self.generations.swap(next);
        let epoch = self.generations.bump_epoch();
        tracing::debug!(
            pipeline.id = %self.config.name,
            pipeline.epoch = epoch,
            pipeline.op = ops::LISTENER,
            pipeline.segment = Segment::Static.as_label(),
            "static segment captured"
        );
    }

    fn listener(&self) -> Option<SharedProcessor> {
        self.external.get()
    }
}

impl fmt::Debug for DynamicPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPipeline")
            .field("name", &self.config.name)
            .field("epoch", &self.epoch())
            .field("state", &self.state())
            .field("owned", &self.owner.is_some())
            .finish_non_exhaustive()
    }
}

/// 认领后的批量构建器，由 [`DynamicPipeline::dynamic_pipeline`] 返回。
pub struct DynamicPipelineBuilder<'a> {
    pipeline: &'a DynamicPipeline,
    id: String,
    pre: Vec<SharedProcessor>,
    post: Vec<SharedProcessor>,
}

impl DynamicPipelineBuilder<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 追加前置处理器。
    pub fn inject_before<I>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = SharedProcessor>,
    {
        self.pre.extend(processors);
        self
    }

    /// 追加后置处理器。
    pub fn inject_after<I>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = SharedProcessor>,
    {
        self.post.extend(processors);
        self
    }

    /// 暂存全部处理器并更新管线，返回认领 ID。
    ///
    /// 任一处理器校验失败时不暂存任何处理器。
    pub fn update_pipeline(self) -> Result<String, PipelineError> {
        self.pipeline.stage_all(self.pre, self.post)?;
        self.pipeline.update_pipeline()?;
        Ok(self.id)
    }

    /// 丢弃已注入与已暂存的处理器，发布只含静态段的链路，返回认领 ID。
    pub fn reset_and_update(self) -> Result<String, PipelineError> {
        self.pipeline.reset_and_update()?;
        Ok(self.id)
    }
}
