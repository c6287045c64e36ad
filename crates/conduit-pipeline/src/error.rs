//! 动态管线的错误分类。

use std::borrow::Cow;

use conduit_core::CoreError;
use thiserror::Error;

use crate::dynamic::Segment;

/// 管线层稳定错误码，与 `conduit_core::codes` 中的内置码值共同构成完整码表。
pub mod codes {
    /// 调用方传入了非法处理器（自身、静态段等）。
    pub const PIPELINE_ARGUMENT: &str = "pipeline.argument";
    /// 新构建的前置/后置段初始化失败，更新被中止。
    pub const PIPELINE_INITIALISATION_FAILED: &str = "pipeline.initialisation_failed";
    /// 退役段在 stop/dispose 阶段失败。
    pub const PIPELINE_DISPOSAL_FAILED: &str = "pipeline.disposal_failed";
    /// 动态管线构建器的认领 ID 不匹配。
    pub const PIPELINE_ID_MISMATCH: &str = "pipeline.id_mismatch";
    /// 配置文本无法解析或取值非法。
    pub const PIPELINE_CONFIG_INVALID: &str = "pipeline.config_invalid";
}

/// `PipelineError` 汇总动态管线对外暴露的全部失败路径。
///
/// # 教案式说明
/// - **意图 (Why)**：构建期失败可恢复（旧链继续服务）、处理期失败原样透传、释放期失败仅需上报，
///   三类语义截然不同，调用方需要按变体分流而不是解析字符串。
/// - **执行逻辑 (How)**：每个变体携带最小上下文；[`Self::code`] 给出稳定码值，
///   `From<PipelineError> for CoreError` 让错误可沿 `MessageProcessor::process` 向上传播。
/// - **设计权衡 (Trade-offs)**：`Processing` 与 `Lifecycle` 直接包裹 [`CoreError`]，转换时原样取回，
///   避免处理器错误被二次包装后丢失原始码值。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 调用方传入的处理器不合法，属于调用方缺陷，不应重试。
    #[error("invalid processor argument: {0}")]
    Argument(Cow<'static, str>),

    /// 静态段尚未设置，管线无法组装。
    #[error("pipeline `{pipeline}` has no static segment yet")]
    NotReady { pipeline: String },

    /// 新段初始化失败，先前发布的链保持不变，暂存列表保持原样。
    #[error("failed to initialise the new {segment} segment")]
    Initialisation {
        segment: Segment,
        #[source]
        source: CoreError,
    },

    /// 活动链中的处理器失败，原样透传。
    #[error(transparent)]
    Processing(CoreError),

    /// 退役段在拆除时失败；新链已生效，不做回滚。
    #[error("failed to tear down the retired {segment} segment")]
    Disposal {
        segment: Segment,
        #[source]
        source: CoreError,
    },

    /// 管线生命周期拒绝了本次操作（例如已释放）。
    #[error(transparent)]
    Lifecycle(CoreError),

    /// 动态管线已被其他 ID 认领。
    #[error("dynamic pipeline is claimed by `{expected}`, got `{actual}`")]
    IdMismatch { expected: String, actual: String },

    /// 宿主已被释放，无法为新段注入上下文。
    #[error("pipeline owner has been released")]
    OwnerReleased,

    /// 配置文本非法。
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl PipelineError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Argument(_) => codes::PIPELINE_ARGUMENT,
            PipelineError::NotReady { .. } => conduit_core::codes::PIPELINE_NOT_READY,
            PipelineError::Initialisation { .. } => codes::PIPELINE_INITIALISATION_FAILED,
            PipelineError::Processing(err) | PipelineError::Lifecycle(err) => err.code(),
            PipelineError::Disposal { .. } => codes::PIPELINE_DISPOSAL_FAILED,
            PipelineError::IdMismatch { .. } => codes::PIPELINE_ID_MISMATCH,
            PipelineError::OwnerReleased => conduit_core::codes::PIPELINE_OWNER_RELEASED,
            PipelineError::Config(_) => codes::PIPELINE_CONFIG_INVALID,
        }
    }

    pub(crate) fn argument(message: impl Into<Cow<'static, str>>) -> Self {
        PipelineError::Argument(message.into())
    }
}

impl From<PipelineError> for CoreError {
    /// 将管线错误折叠为核心错误。
    ///
    /// - 包裹型变体（`Processing`/`Lifecycle`）原样取回内部错误；
    /// - 携带原因的变体保留 `source` 作为 cause，其余仅携带码值与描述。
    fn from(value: PipelineError) -> Self {
        let code = value.code();
        let message = value.to_string();
        match value {
            PipelineError::Processing(err) | PipelineError::Lifecycle(err) => err,
            PipelineError::Initialisation { source, .. } | PipelineError::Disposal { source, .. } => {
                CoreError::new(code, message).with_cause(source)
            }
            PipelineError::Config(err) => CoreError::new(code, message).with_cause(err),
            _ => CoreError::new(code, message),
        }
    }
}
