//! 动态管线配置。
//!
//! # 设计背景（Why）
//! - 后置段的执行顺序与退役段的拆除策略都属于宿主可选的行为，而非隐藏默认值；
//!   以配置结构显式暴露，宿主既可在代码中构造，也可从 TOML 片段加载。
//!
//! # 契约说明（What）
//! ```toml
//! name = "orders"
//! post_order = "reverse"      # forward（默认）| reverse
//!
//! [teardown]
//! mode = "drain"              # immediate（默认）| drain
//! drain_timeout_ms = 250      # 仅 drain 模式必填
//! ```

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 后置处理器的作用顺序。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOrder {
    /// 作为普通链步骤按注册顺序执行：`(static)(post1)(post2)`。
    #[default]
    Forward,
    /// 每个后置处理器包装为响应阶段适配器，按注册逆序作用于响应：`(static)(post2)(post1)`。
    Reverse,
}

/// 退役段的拆除策略。
///
/// # 教案式说明
/// - **Immediate**：发布后立即 stop + dispose 旧段，仍在旧段上执行的调用可能观察到已释放的处理器，
///   这是被接受的竞态。
/// - **Drain**：等待持有旧代的在途调用全部结束或超时后再拆除，超时以 WARN 记录并继续拆除。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TeardownSection", into = "TeardownSection")]
pub enum TeardownPolicy {
    #[default]
    Immediate,
    Drain { timeout: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TeardownMode {
    Immediate,
    Drain,
}

/// `TeardownPolicy` 在配置文本中的形态。
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TeardownSection {
    mode: TeardownMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    drain_timeout_ms: Option<u64>,
}

#[derive(Debug)]
struct TeardownSectionError(&'static str);

impl fmt::Display for TeardownSectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl TryFrom<TeardownSection> for TeardownPolicy {
    type Error = TeardownSectionError;

    fn try_from(section: TeardownSection) -> Result<Self, Self::Error> {
        match (section.mode, section.drain_timeout_ms) {
            (TeardownMode::Immediate, None) => Ok(TeardownPolicy::Immediate),
            (TeardownMode::Immediate, Some(_)) => Err(TeardownSectionError(
                "`drain_timeout_ms` is only valid with mode = \"drain\"",
            )),
            (TeardownMode::Drain, Some(ms)) => Ok(TeardownPolicy::Drain {
                timeout: Duration::from_millis(ms),
            }),
            (TeardownMode::Drain, None) => Err(TeardownSectionError(
                "mode = \"drain\" requires `drain_timeout_ms`",
            )),
        }
    }
}

impl From<TeardownPolicy> for TeardownSection {
    fn from(policy: TeardownPolicy) -> Self {
        match policy {
            TeardownPolicy::Immediate => TeardownSection {
                mode: TeardownMode::Immediate,
                drain_timeout_ms: None,
            },
            TeardownPolicy::Drain { timeout } => TeardownSection {
                mode: TeardownMode::Drain,
                drain_timeout_ms: Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            },
        }
    }
}

/// 动态管线配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// 管线名称，用于链命名与日志字段。
    pub name: String,
    pub post_order: PostOrder,
    pub teardown: TeardownPolicy,
}

impl PipelineConfig {
    pub const DEFAULT_NAME: &'static str = "dynamic-pipeline";

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_post_order(mut self, post_order: PostOrder) -> Self {
        self.post_order = post_order;
        self
    }

    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    /// 从 TOML 文本解析配置，缺省字段取默认值。
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        Ok(toml::from_str(text)?)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_owned(),
            post_order: PostOrder::default(),
            teardown: TeardownPolicy::default(),
        }
    }
}
