//! 日志字段约定与订阅器安装入口。
//!
//! # 设计背景（Why）
//! - 管线的每次变更、初始化失败与拆除告警都以 `tracing` 事件输出；字段名集中定义在 [`keys`]，
//!   避免在调用点散落裸字符串导致命名漂移。
//! - 库本身从不安装全局订阅器；宿主进程在启动时调用一次 [`install`] 即可获得 `fmt + EnvFilter` 输出。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 结构化日志字段名，保持低基数。
pub mod keys {
    /// 管线名称或认领 ID。
    pub const PIPELINE_ID: &str = "pipeline.id";
    /// 发布后的逻辑 epoch。
    pub const EPOCH: &str = "pipeline.epoch";
    /// 变更类型，取值见 [`super::ops`]。
    pub const OP: &str = "pipeline.op";
    /// 段标签：`pre` / `static` / `post`。
    pub const SEGMENT: &str = "pipeline.segment";
}

/// `pipeline.op` 字段的稳定取值。
pub mod ops {
    pub const UPDATE: &str = "update";
    pub const RESET: &str = "reset";
    pub const LISTENER: &str = "listener";
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装阶段可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// `install` 被重复调用。
    #[error("conduit tracing subscriber is already installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局订阅器。
    #[error("a global tracing subscriber was set elsewhere")]
    SubscriberAlreadySet,
    /// 设置全局订阅器失败的底层错误。
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// 安装全局 `fmt + EnvFilter` 订阅器。
///
/// # 教案式说明
/// - **逻辑（How）**：`directives` 为空时读取 `RUST_LOG`，仍缺省则回退到 `info`；
///   随后组装 `registry().with(filter).with(fmt::layer())` 并设置为全局默认值。
/// - **契约（What）**：多次调用返回 [`InstallError::AlreadyInstalled`]；
///   外部已配置订阅器时返回 [`InstallError::SubscriberAlreadySet`]。
pub fn install(directives: Option<&str>) -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(directives))
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter(directives: Option<&str>) -> EnvFilter {
    match directives {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
