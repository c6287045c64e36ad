#![deny(unsafe_code)]
#![doc = "conduit-pipeline: 可在运行期替换前后置段的动态管线。"]
#![doc = ""]
#![doc = "管线由固定的静态段与可替换的前置/后置段组成；更新在旁路构建并初始化新段，"]
#![doc = "随后以单次原子发布切换，处理路径全程无锁。默认宿主 [`Flow`] 负责上下文注入与静态段生命周期。"]

pub mod config;
pub mod dynamic;
pub mod error;
pub mod flow;
mod internal;
pub mod observability;

pub use config::{PipelineConfig, PostOrder, TeardownPolicy};
pub use dynamic::{DynamicPipeline, DynamicPipelineBuilder, PipelineSnapshot, Segment, UpdateReport};
pub use error::{PipelineError, codes};
pub use flow::{Flow, FlowBuilder, PipelineOwner};
