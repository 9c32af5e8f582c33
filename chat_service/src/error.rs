// chat_service/src/error.rs

//! `chat_service` 服务端特定的错误类型定义模块。
//!
//! 本服务中没有任何失败会终止进程：认证失败只影响当次连接，
//! 解码失败只丢弃当条消息，投递失败以结果值（计数或本枚举）反馈给调用方。
//! 广播/组播中的部分失败不是错误，而是 `DeliveryReport` 中的失败计数。

use thiserror::Error;
use ws_transport::error::WsError;

/// 聊天路由服务的统一错误类型。
#[derive(Error, Debug)]
pub enum ChatServiceError {
    /// 握手阶段身份认证失败。对该连接是致命的：
    /// 服务端以策略违规关闭码拒绝连接，且不发生任何注册表变更。
    #[error("认证被拒绝: {0}")]
    AuthenticationRejected(String),

    /// 入站消息负载格式不正确。丢弃该条消息并尽力通知发送方，连接保持存活。
    #[error("消息解码失败: {0}")]
    DecodeError(String),

    /// 单播目标未注册或其连接已关闭。非致命，表现为零投递。
    #[error("接收方不可达: {receiver}")]
    RecipientUnavailable {
        /// 不可达的接收方用户标识。
        receiver: String,
    },

    /// 传输层或编解码错误。
    #[error("传输层错误: {0}")]
    Transport(#[from] WsError),
}
