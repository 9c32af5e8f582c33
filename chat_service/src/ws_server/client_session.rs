// chat_service/src/ws_server/client_session.rs

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use ws_transport::message::WsMessage;

/// 代表一个已认证用户的活动连接会话。
///
/// 会话由连接注册表独占持有（键为用户标识），在握手认证成功后创建，
/// 在断开或被显式注销时从注册表移除。`sender` 是传输层提供的可写句柄：
/// 向它发送的 `WsMessage` 由该连接的发送泵任务写到对端。
#[derive(Debug)]
pub struct UserSession {
    /// 服务端为这一次连接生成的会话标识，仅用于日志区分同一用户的先后连接。
    pub session_id: Uuid,
    /// 经过认证的用户标识，连接注册表以它为键。
    pub user_id: String,
    /// 用于向此连接异步发送 `WsMessage` 的通道发送端（不透明可写句柄）。
    pub sender: mpsc::Sender<WsMessage>,
    /// 对端的 IP 地址和端口。
    pub peer_addr: SocketAddr,
    /// 会话创建的时间戳。
    pub connected_at: DateTime<Utc>,
    /// 连接关闭信号。置位后该连接的收发循环会尽快退出。
    pub connection_should_close: Arc<AtomicBool>,
}

impl UserSession {
    /// 创建一个新的 `UserSession` 实例。
    pub fn new(
        user_id: impl Into<String>,
        sender: mpsc::Sender<WsMessage>,
        peer_addr: SocketAddr,
        connection_should_close: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            sender,
            peer_addr,
            connected_at: Utc::now(),
            connection_should_close,
        }
    }

    /// 查询此句柄在传输层面是否仍然可写。
    ///
    /// 关闭信号已置位、或发送通道的接收端已被丢弃的句柄视同"不存在"。
    /// 路由器据此跳过失效句柄，但不会据此清理注册表——
    /// 清理是生命周期控制器在断开事件中的职责。
    pub fn is_open(&self) -> bool {
        !self.connection_should_close.load(Ordering::SeqCst) && !self.sender.is_closed()
    }
}
