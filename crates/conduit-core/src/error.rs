use std::{borrow::Cow, error::Error as StdError};

use thiserror::Error;

/// 底层原因的统一装箱形式。
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// `CoreError` 是处理器、处理链与生命周期调用共享的稳定错误形态。
///
/// # 设计背景（Why）
/// - 处理链中的每一步都可能失败，调用方需要一个不依赖具体处理器类型的错误载体，
///   才能把失败原样透传给 `process()` 的原始调用者。
/// - 错误码为 `'static` 字符串，日志与告警可直接按码聚合，而不必解析自然语言消息。
///
/// # 契约说明（What）
/// - `code`：遵循 `<领域>.<语义>` 约定，框架内置码值见 [`codes`]；
/// - `message`：面向排障人员的描述，不应包含敏感数据；
/// - `cause`：可选底层原因，通过 [`StdError::source`] 暴露完整链路。
///
/// # 风险提示（Trade-offs）
/// - 消息使用 `Cow<'static, str>`，静态文案零分配，动态拼接时付出一次堆分配。
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// ```rust
    /// use conduit_core::{CoreError, codes};
    ///
    /// let err = CoreError::new(codes::PROCESSOR_FAILED, "enricher rejected message");
    /// assert_eq!(err.code(), codes::PROCESSOR_FAILED);
    /// assert!(err.cause().is_none());
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl Into<ErrorCause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 沿 `cause` 链查找第一个匹配错误码的 [`CoreError`]，包含自身。
    ///
    /// 生命周期失败往往被处理链包装一层，调用方据此判断根因是否来自某个特定码值。
    pub fn find_code(&self, code: &str) -> Option<&CoreError> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(core) = err.downcast_ref::<CoreError>()
                && core.code == code
            {
                return Some(core);
            }
            current = err.source();
        }
        None
    }
}

/// 框架内置的稳定错误码。
///
/// # 契约说明（What）
/// - 码值一经发布不得修改语义；新增码值需同步更新 `DESIGN.md` 的错误分类表。
pub mod codes {
    /// 处理器在 `process` 中失败的通用码值。
    pub const PROCESSOR_FAILED: &str = "processor.failed";
    /// 处理器收到了无法处理的负载类型。
    pub const PROCESSOR_PAYLOAD_MISMATCH: &str = "processor.payload_mismatch";
    /// 生命周期状态机拒绝了非法跃迁。
    pub const LIFECYCLE_INVALID_TRANSITION: &str = "lifecycle.invalid_transition";
    /// 某个成员在 `initialise` 阶段失败。
    pub const LIFECYCLE_INITIALISE_FAILED: &str = "lifecycle.initialise_failed";
    /// 某个成员在 `start` 阶段失败。
    pub const LIFECYCLE_START_FAILED: &str = "lifecycle.start_failed";
    /// 某个成员在 `stop`/`dispose` 阶段失败。
    pub const LIFECYCLE_TEARDOWN_FAILED: &str = "lifecycle.teardown_failed";
    /// 管线尚未获得静态段，无法处理消息。
    pub const PIPELINE_NOT_READY: &str = "pipeline.not_ready";
    /// 管线已被释放。
    pub const PIPELINE_DISPOSED: &str = "pipeline.disposed";
    /// 管线的宿主已被释放，无法完成上下文注入。
    pub const PIPELINE_OWNER_RELEASED: &str = "pipeline.owner_released";
}
