//! 核心业务消息结构定义。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::MessageKind;

/// `ChatMessage` 是一条在用户之间路由的聊天消息，属于纯值对象，不被任何存储持有。
///
/// # 字段
/// - `sender`: 发送方用户标识。服务端在入站处理时会以连接的认证身份覆盖此字段，
///   客户端携带的任何取值都会被丢弃。
/// - `receiver`: 可选的接收方用户标识。存在且非空时选择单播，否则选择全局广播；
///   这一选择在生命周期控制器处做出一次，路由器内部不会重新判定。
/// - `content`: 消息正文（对路由器而言是不透明字符串）。对 `Join`/`Leave`
///   种类的消息，此字段携带目标房间标识。
/// - `kind`: 消息种类，见 [`MessageKind`]。
/// - `timestamp`: 服务端在构造时赋予的 UTC 时间戳，不信任客户端提供的取值。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    pub content: String,
    #[serde(rename = "messageType", default)]
    pub kind: MessageKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// 创建一条新的 `ChatMessage`，时间戳取服务端当前 UTC 时间。
    pub fn new(
        sender: impl Into<String>,
        receiver: Option<String>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// 判断消息是否携带了非空的接收方标识（即应当单播）。
    ///
    /// 空字符串视同缺失：既有客户端会以 `"receiver": ""` 表达"无接收方"。
    pub fn has_receiver(&self) -> bool {
        self.receiver.as_deref().is_some_and(|r| !r.is_empty())
    }
}
