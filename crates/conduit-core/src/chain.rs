//! 不可变处理链。
//!
//! # 设计背景（Why）
//! - 动态管线的前置段、后置段都是“一串处理器当作一个处理器执行”，并且需要作为整体
//!   完成初始化、启动、停止与释放。
//! - 链一旦构建即不可变，运行期替换通过构造新链并整体发布完成，而不是原地修改。
//!
//! # 逻辑解析（How）
//! - [`ProcessorChainBuilder::build`] 依序扫描成员：遇到拥有后继的拦截处理器时，把后继打包为
//!   仅负责执行的监听段并设为其监听者，执行列表在该拦截器处截止；
//! - 位于末位的拦截器默认保留原有监听者；启用 [`ProcessorChainBuilder::reset_trailing_listener`]
//!   后改为空监听段，运行期重复装配同一实例时不会残留上一次装配的后继；
//! - 执行时逐步传递事件，遇到 `None` 或错误立即返回；
//! - 生命周期对所有成员生效：`initialise`/`start` 顺序执行，`stop`/`dispose` 逆序执行，
//!   先拆除依赖方再拆除被依赖方。
//!
//! # 契约说明（What）
//! - 处理链自身从不暴露为拦截处理器，外层装配不会改写链内部的监听关系；
//!   [`ProcessorChain::single`] 正是借此把一个拦截处理器“封口”。
//! - `stop`/`dispose` 会遍历全部成员，即使中途失败也继续，返回第一个错误并记录其余错误。

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    context::FlowContext,
    error::{CoreError, codes},
    event::MessageEvent,
    lifecycle::{Lifecycle, LifecycleState, LifecycleTracker},
    processor::{MessageProcessor, ProcessorDescriptor, SharedProcessor},
};

/// 依序执行步骤，短路或失败即返回。
fn run_steps(
    steps: &[SharedProcessor],
    event: MessageEvent,
) -> Result<Option<MessageEvent>, CoreError> {
    let mut current = event;
    for step in steps {
        match step.process(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// 拦截器之后的执行段，不参与生命周期，成员的生命周期由外层处理链负责。
struct ListenerSegment {
    steps: Vec<SharedProcessor>,
}

impl MessageProcessor for ListenerSegment {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        run_steps(&self.steps, event)
    }

    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new("listener-segment", "segment")
    }
}

/// 把成员列表装配为执行列表。
fn wire(members: &[SharedProcessor], reset_trailing: bool) -> Vec<SharedProcessor> {
    let mut entry = Vec::with_capacity(members.len());
    for (index, member) in members.iter().enumerate() {
        entry.push(Arc::clone(member));
        let Some(interceptor) = member.as_intercepting() else {
            continue;
        };
        let rest = &members[index + 1..];
        if !rest.is_empty() {
            interceptor.set_listener(Arc::new(ListenerSegment {
                steps: wire(rest, reset_trailing),
            }));
            break;
        }
        if reset_trailing {
            interceptor.set_listener(Arc::new(ListenerSegment { steps: Vec::new() }));
        }
    }
    entry
}

/// 有序、构建后不可变的处理链。
///
/// # 教案式说明
/// - **意图（Why）**：把一段处理器序列提升为单个 [`MessageProcessor`]，并统一管理其生命周期。
/// - **逻辑（How）**：`members` 保存全部成员（用于注入与生命周期），`entry` 保存装配后的执行列表；
///   两者在拦截器存在时不同。
/// - **契约（What）**：执行顺序等于插入顺序；状态机遵循 [`LifecycleTracker`] 的前向约束。
pub struct ProcessorChain {
    name: Cow<'static, str>,
    members: Vec<SharedProcessor>,
    entry: Vec<SharedProcessor>,
    state: LifecycleTracker,
}

impl ProcessorChain {
    pub fn builder(name: impl Into<Cow<'static, str>>) -> ProcessorChainBuilder {
        ProcessorChainBuilder::new(name)
    }

    /// 以单个处理器构造一元处理链。
    ///
    /// 用于封装拦截处理器：外层把它当作不透明的普通处理器，不会改写其监听者。
    pub fn single(processor: SharedProcessor) -> Self {
        let name = Cow::Owned(format!("{}-chain", processor.describe().name()));
        ProcessorChainBuilder::new(name).chain(processor).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[SharedProcessor] {
        &self.members
    }

    /// 成员名称快照，顺序与插入顺序一致。
    pub fn names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|member| member.describe().name().to_owned())
            .collect()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.state()
    }

    fn member_name(member: &SharedProcessor) -> String {
        member.describe().name().to_owned()
    }

    fn forward<F>(&self, phase: &'static str, code: &'static str, mut f: F) -> Result<(), CoreError>
    where
        F: FnMut(&dyn Lifecycle) -> Result<(), CoreError>,
    {
        for member in &self.members {
            if let Some(lifecycle) = member.lifecycle() {
                f(lifecycle).map_err(|err| {
                    CoreError::new(
                        code,
                        format!(
                            "processor `{}` in chain `{}` failed to {phase}",
                            Self::member_name(member),
                            self.name
                        ),
                    )
                    .with_cause(err)
                })?;
            }
        }
        Ok(())
    }

    fn reverse<F>(&self, phase: &'static str, mut f: F) -> Result<(), CoreError>
    where
        F: FnMut(&dyn Lifecycle) -> Result<(), CoreError>,
    {
        let mut first: Option<CoreError> = None;
        for member in self.members.iter().rev() {
            let Some(lifecycle) = member.lifecycle() else {
                continue;
            };
            if let Err(err) = f(lifecycle) {
                let wrapped = CoreError::new(
                    codes::LIFECYCLE_TEARDOWN_FAILED,
                    format!(
                        "processor `{}` in chain `{}` failed to {phase}",
                        Self::member_name(member),
                        self.name
                    ),
                )
                .with_cause(err);
                if first.is_none() {
                    first = Some(wrapped);
                } else {
                    tracing::warn!(chain = %self.name, phase, error = %wrapped, "additional teardown failure");
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl MessageProcessor for ProcessorChain {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        run_steps(&self.entry, event)
    }

    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new(self.name.clone(), "chain")
    }

    fn inject_context(&self, context: &Arc<FlowContext>) {
        for member in &self.members {
            member.inject_context(context);
        }
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

impl Lifecycle for ProcessorChain {
    fn initialise(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Initialised)? {
            return Ok(());
        }
        self.forward("initialise", codes::LIFECYCLE_INITIALISE_FAILED, |member| {
            member.initialise()
        })
    }

    fn start(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Started)? {
            return Ok(());
        }
        self.forward("start", codes::LIFECYCLE_START_FAILED, |member| member.start())
    }

    fn stop(&self) -> Result<(), CoreError> {
        if !self.state.advance(LifecycleState::Stopped)? {
            return Ok(());
        }
        self.reverse("stop", |member| member.stop())
    }

    fn dispose(&self) -> Result<(), CoreError> {
        // 已启动的链先补一次停止，保证成员看到完整的 stop -> dispose 序列。
        if self.state.state() == LifecycleState::Started {
            self.stop()?;
        }
        if !self.state.advance(LifecycleState::Disposed)? {
            return Ok(());
        }
        self.reverse("dispose", |member| member.dispose())
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("name", &self.name)
            .field("members", &self.names())
            .field("state", &self.state())
            .finish()
    }
}

/// [`ProcessorChain`] 的构建器。
pub struct ProcessorChainBuilder {
    name: Cow<'static, str>,
    members: Vec<SharedProcessor>,
    reset_trailing: bool,
}

impl ProcessorChainBuilder {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            reset_trailing: false,
        }
    }

    /// 追加一个成员。
    pub fn chain(mut self, processor: SharedProcessor) -> Self {
        self.members.push(processor);
        self
    }

    /// 依序追加多个成员。
    pub fn chain_all<I>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = SharedProcessor>,
    {
        self.members.extend(processors);
        self
    }

    /// 末位拦截器的监听者重置为空监听段，而不是保留原值。
    ///
    /// 运行期按代重建链路时使用：同一拦截器实例在上一代可能位于中部，
    /// 若保留其监听者，上一代的后继会混入新一代的执行路径。
    pub fn reset_trailing_listener(mut self) -> Self {
        self.reset_trailing = true;
        self
    }

    pub fn build(self) -> ProcessorChain {
        let entry = wire(&self.members, self.reset_trailing);
        ProcessorChain {
            name: self.name,
            members: self.members,
            entry,
            state: LifecycleTracker::new(),
        }
    }
}
