//! 消息事件模型。
//!
//! # 教案式说明
//! - **意图（Why）**：处理链在步骤之间传递的唯一载体，需同时承载负载与头部属性，
//!   且能够按值在线程间移动。
//! - **逻辑（How）**：负载使用三态枚举区分空、文本与二进制；属性使用有序映射，
//!   保证日志与断言输出稳定。
//! - **契约（What）**：`EventId` 在进程内单调递增；克隆事件会保留原 ID，
//!   表示同一条逻辑消息的不同副本。

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;

use crate::error::{CoreError, codes};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// 事件标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    /// 分配下一个进程内唯一的事件 ID。
    pub fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 暴露原始数值，供日志字段使用。
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{}", self.0)
    }
}

/// 消息负载。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Payload {
    /// 无负载，常见于纯控制消息。
    #[default]
    Empty,
    /// UTF-8 文本负载。
    Text(String),
    /// 二进制负载，克隆为引用计数拷贝。
    Bytes(Bytes),
}

impl Payload {
    /// 若为文本负载则返回其内容。
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// 负载的字节长度。
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    /// 负载是否为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 在处理链中流转的消息事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    id: EventId,
    payload: Payload,
    properties: BTreeMap<String, String>,
}

impl MessageEvent {
    /// 以给定负载构造新事件，并分配新的事件 ID。
    pub fn new(payload: Payload) -> Self {
        Self {
            id: EventId::next(),
            payload,
            properties: BTreeMap::new(),
        }
    }

    /// 构造文本事件的便捷入口。
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Payload::Text(text.into()))
    }

    /// 构造二进制事件的便捷入口。
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Payload::Bytes(bytes.into()))
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// 文本负载的只读视图；非文本负载返回 `None`。
    pub fn payload_text(&self) -> Option<&str> {
        self.payload.as_text()
    }

    /// 替换负载并保留 ID 与属性。
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// 追加或覆盖一个属性。
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// 在文本负载末尾追加内容。
    ///
    /// # 契约（What）
    /// - 负载为 `Empty` 时视作空文本；
    /// - 负载为 `Bytes` 时返回 [`codes::PROCESSOR_PAYLOAD_MISMATCH`]，事件保持不变。
    pub fn append_text(&mut self, suffix: &str) -> Result<(), CoreError> {
        match &mut self.payload {
            Payload::Text(text) => {
                text.push_str(suffix);
                Ok(())
            }
            Payload::Empty => {
                self.payload = Payload::Text(suffix.to_owned());
                Ok(())
            }
            Payload::Bytes(_) => Err(CoreError::new(
                codes::PROCESSOR_PAYLOAD_MISMATCH,
                format!("event {} carries a binary payload, text append refused", self.id),
            )),
        }
    }
}
