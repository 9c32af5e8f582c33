// chat_service/src/ws_server/lifecycle.rs

//! 连接生命周期控制器。
//!
//! 每条连接对应一个 `ConnectionLifecycle`，驱动
//! `Pending -> Established -> Closed` 状态机：连接事件触发认证与注册，
//! 入站消息事件解码并交给投递路由器，断开事件注销并退出全部已加入的房间。
//! 一条连接的事件流由传输层串行投递，因此控制器的方法都取 `&mut self`；
//! 跨连接的并发安全由两个共享存储自身保证。

use chat_models::enums::MessageKind;
use chat_models::messages::ChatMessage;
use chat_models::ws_payloads::CHAT_MESSAGE_TYPE;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use ws_transport::message::WsMessage;
use ws_transport::server::transport::ConnectMeta;

use crate::auth::Authenticator;
use crate::error::ChatServiceError;
use crate::ws_server::client_session::UserSession;
use crate::ws_server::connection_registry::ConnectionRegistry;
use crate::ws_server::message_router::{DeliveryReport, DeliveryRouter};
use crate::ws_server::room_store::RoomStore;

/// 一条连接的生命周期状态。`Closed` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 连接已建立但尚未通过认证。
    Pending,
    /// 认证通过，已注册进连接注册表，可以收发消息。
    Established,
    /// 连接已关闭（认证失败或断开），不再处理任何事件。
    Closed,
}

/// 单条连接的生命周期控制器。
pub struct ConnectionLifecycle {
    state: ConnectionState,
    session: Option<Arc<UserSession>>,
    /// 此连接的身份在其生命周期内加入过且尚未退出的房间。
    joined_rooms: HashSet<String>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    router: Arc<DeliveryRouter>,
}

impl ConnectionLifecycle {
    /// 为一条新连接创建处于 `Pending` 状态的控制器。
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomStore>,
        router: Arc<DeliveryRouter>,
    ) -> Self {
        Self {
            state: ConnectionState::Pending,
            session: None,
            joined_rooms: HashSet::new(),
            registry,
            rooms,
            router,
        }
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 此连接经过认证的用户标识（`Established` 之后可用）。
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.user_id.as_str())
    }

    /// 处理连接事件：认证并注册。
    ///
    /// 认证失败时直接进入 `Closed` 且不发生任何注册表变更，
    /// 返回 `AuthenticationRejected`，由调用方指示传输层以策略违规关闭连接。
    /// 认证成功时注册会话并加入默认房间（以用户自身标识命名的主房间），
    /// 两者都在该连接的任何入站消息被处理之前完成，随后进入 `Established`。
    pub async fn on_connect(
        &mut self,
        meta: &ConnectMeta,
        sender: mpsc::Sender<WsMessage>,
        connection_should_close: Arc<AtomicBool>,
        authenticator: &dyn Authenticator,
    ) -> Result<Arc<UserSession>, ChatServiceError> {
        if self.state != ConnectionState::Pending {
            warn!("收到重复的连接事件，当前状态: {:?}，忽略", self.state);
            return Err(ChatServiceError::AuthenticationRejected(
                "连接不处于待认证状态".to_string(),
            ));
        }

        let user_id = match authenticator.authenticate(meta) {
            Ok(user_id) => user_id,
            Err(e) => {
                self.state = ConnectionState::Closed;
                warn!("来自 {} 的连接认证失败: {}", meta.peer_addr, e);
                return Err(e);
            }
        };

        let session = Arc::new(UserSession::new(
            user_id.clone(),
            sender,
            meta.peer_addr,
            connection_should_close,
        ));
        self.registry.register(Arc::clone(&session));

        // 主房间加入与注册在同一连接事件内完成，两个存储不会失步
        self.rooms.join(&user_id, &user_id);
        self.joined_rooms.insert(user_id.clone());

        self.session = Some(Arc::clone(&session));
        self.state = ConnectionState::Established;
        info!(
            "用户 {} 的连接已建立: 会话 {} (来自 {})",
            user_id, session.session_id, meta.peer_addr
        );
        self.registry.debug_dump();
        self.rooms.debug_dump();

        Ok(session)
    }

    /// 处理入站消息事件。
    ///
    /// 仅在 `Established` 状态下有效；其他状态下的消息被无错误地丢弃。
    /// 负载被解码为 `ChatMessage` 后，其 `sender` 一律以本连接的认证身份覆盖，
    /// `timestamp` 一律以服务端时间覆盖。`Chat` 种类按 `receiver` 是否非空
    /// 选择单播或广播（此选择只在这里做出一次）；`Join`/`Leave` 种类以
    /// `content` 为房间标识变更成员关系，并向该房间组播通知。
    pub async fn on_message(
        &mut self,
        envelope: WsMessage,
    ) -> Result<DeliveryReport, ChatServiceError> {
        if self.state != ConnectionState::Established {
            debug!(
                "在 {:?} 状态下收到消息 (类型 {})，丢弃",
                self.state, envelope.message_type
            );
            return Ok(DeliveryReport::default());
        }

        if envelope.message_type != CHAT_MESSAGE_TYPE {
            return Err(ChatServiceError::DecodeError(format!(
                "不支持的消息类型: '{}'",
                envelope.message_type
            )));
        }

        let mut message: ChatMessage = envelope
            .deserialize_payload()
            .map_err(|e| ChatServiceError::DecodeError(e.to_string()))?;

        // 不信任客户端提供的发送方身份与时间戳
        let user_id = match self.user_id() {
            Some(user_id) => user_id.to_string(),
            None => {
                // 状态机保证 Established 必然持有会话；防御性丢弃而非 panic
                debug!("Established 状态缺少会话，丢弃消息");
                return Ok(DeliveryReport::default());
            }
        };
        message.sender = user_id.clone();
        message.timestamp = Utc::now();

        match message.kind {
            MessageKind::Chat => {
                if message.has_receiver() {
                    match self.router.deliver(&message).await {
                        Ok(report) => Ok(report),
                        Err(ChatServiceError::RecipientUnavailable { receiver }) => {
                            // 非致命：没有回执通道，记录并报告零投递
                            warn!(
                                "用户 {} 的私聊消息未投递: 接收方 {} 不可达",
                                user_id, receiver
                            );
                            Ok(DeliveryReport::default())
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    self.router.deliver_all(&message).await
                }
            }
            MessageKind::Join => {
                let room_id = self.room_id_from(&message)?;
                self.rooms.join(&room_id, &user_id);
                self.joined_rooms.insert(room_id.clone());
                self.rooms.debug_dump();
                self.router.deliver_to_room(&room_id, &message).await
            }
            MessageKind::Leave => {
                let room_id = self.room_id_from(&message)?;
                self.rooms.leave(&room_id, &user_id);
                self.joined_rooms.remove(&room_id);
                self.rooms.debug_dump();
                // 通知仍留在房间中的成员
                self.router.deliver_to_room(&room_id, &message).await
            }
        }
    }

    /// 处理断开事件：注销会话并退出全部已加入的房间。幂等——
    /// 同一连接的断开事件触发两次不会报错，状态与触发一次相同。
    pub async fn on_disconnect(&mut self) {
        if self.state == ConnectionState::Closed {
            debug!("连接已处于 Closed 状态，重复的断开事件为无操作");
            return;
        }
        self.state = ConnectionState::Closed;

        if let Some(session) = self.session.take() {
            session
                .connection_should_close
                .store(true, Ordering::SeqCst);
            if self.registry.unregister_session(&session) {
                for room_id in self.joined_rooms.drain() {
                    self.rooms.leave(&room_id, &session.user_id);
                }
                info!(
                    "用户 {} 断开连接: 会话 {} 已注销并退出全部房间",
                    session.user_id, session.session_id
                );
            } else {
                // 注册已被同一用户更新的连接替换，映射与房间成员关系归新连接所有
                self.joined_rooms.clear();
                info!(
                    "用户 {} 的旧连接断开: 会话 {} 的注册已被替换，跳过注销与房间退出",
                    session.user_id, session.session_id
                );
            }
            self.registry.debug_dump();
            self.rooms.debug_dump();
        }
    }

    /// 从 `Join`/`Leave` 消息的 `content` 字段解析房间标识。
    fn room_id_from(&self, message: &ChatMessage) -> Result<String, ChatServiceError> {
        let room_id = message.content.trim();
        if room_id.is_empty() {
            return Err(ChatServiceError::DecodeError(format!(
                "{} 消息缺少房间标识",
                message.kind
            )));
        }
        Ok(room_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::QueryAuthenticator;
    use std::net::SocketAddr;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9999".parse().expect("解析测试地址失败")
    }

    fn connect_meta(peer_addr: SocketAddr, query: Option<String>) -> ConnectMeta {
        ConnectMeta {
            peer_addr,
            path: "/chat".to_string(),
            query,
        }
    }

    struct LifecycleFixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomStore>,
        router: Arc<DeliveryRouter>,
        authenticator: QueryAuthenticator,
    }

    impl LifecycleFixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = Arc::new(RoomStore::new());
            let router = Arc::new(DeliveryRouter::new(
                Arc::clone(&registry),
                Arc::clone(&rooms),
            ));
            Self {
                registry,
                rooms,
                router,
                authenticator: QueryAuthenticator,
            }
        }

        fn lifecycle(&self) -> ConnectionLifecycle {
            ConnectionLifecycle::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.rooms),
                Arc::clone(&self.router),
            )
        }

        /// 建立一条已认证的连接，返回其生命周期控制器与出站接收端。
        async fn establish(
            &self,
            user_id: &str,
        ) -> (ConnectionLifecycle, mpsc::Receiver<WsMessage>) {
            let mut lifecycle = self.lifecycle();
            let (tx, rx) = mpsc::channel(16);
            let meta = connect_meta(
                test_addr(),
                Some(format!("userId={}&token=abc123", user_id)),
            );
            lifecycle
                .on_connect(&meta, tx, Arc::new(AtomicBool::new(false)), &self.authenticator)
                .await
                .expect("合法握手的连接事件不应失败");
            (lifecycle, rx)
        }
    }

    fn envelope_of(message: &ChatMessage) -> WsMessage {
        WsMessage::new(CHAT_MESSAGE_TYPE, message).expect("构造测试信封失败")
    }

    async fn recv_chat(rx: &mut mpsc::Receiver<WsMessage>) -> ChatMessage {
        rx.recv()
            .await
            .expect("应收到一条信封")
            .deserialize_payload()
            .expect("信封负载应能恢复为 ChatMessage")
    }

    #[tokio::test]
    /// 测试连接事件成功后进入 Established，注册表与主房间同步建立。
    async fn test_connect_registers_and_joins_home_room() {
        let fixture = LifecycleFixture::new();
        let (lifecycle, _rx) = fixture.establish("alice").await;

        assert_eq!(lifecycle.state(), ConnectionState::Established);
        assert_eq!(lifecycle.user_id(), Some("alice"));
        assert!(fixture.registry.lookup("alice").is_some(), "会话应已注册");
        assert!(
            fixture.rooms.members_of("alice").contains("alice"),
            "应已加入以自身标识命名的主房间"
        );
    }

    #[tokio::test]
    /// 测试认证失败时直接进入 Closed，且不发生任何注册表或成员关系变更。
    async fn test_connect_rejection_leaves_stores_untouched() {
        let fixture = LifecycleFixture::new();
        let mut lifecycle = fixture.lifecycle();
        let (tx, _rx) = mpsc::channel(4);
        let meta = connect_meta(test_addr(), Some("userId=alice".to_string()));

        let result = lifecycle
            .on_connect(&meta, tx, Arc::new(AtomicBool::new(false)), &fixture.authenticator)
            .await;
        assert!(
            matches!(result, Err(ChatServiceError::AuthenticationRejected(_))),
            "缺少令牌的握手应被拒绝"
        );
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(fixture.registry.is_empty(), "拒绝的连接不应触碰注册表");
        assert!(fixture.rooms.is_empty(), "拒绝的连接不应触碰房间存储");
    }

    #[tokio::test]
    /// 测试非 Established 状态下收到的消息被无错误地丢弃。
    async fn test_message_before_established_is_dropped() {
        let fixture = LifecycleFixture::new();
        let mut pending = fixture.lifecycle();

        let message = ChatMessage::new("mallory", None, "premature", MessageKind::Chat);
        let report = pending
            .on_message(envelope_of(&message))
            .await
            .expect("未建立连接时的消息应被静默丢弃");
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    /// 测试入站消息的发送方被认证身份覆盖，客户端伪造的发送方被丢弃。
    async fn test_sender_is_overwritten_with_authenticated_identity() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _alice_rx) = fixture.establish("alice").await;
        let (_bob, mut bob_rx) = fixture.establish("bob").await;

        let forged = ChatMessage::new("mallory", Some("bob".to_string()), "hi bob", MessageKind::Chat);
        let report = alice
            .on_message(envelope_of(&forged))
            .await
            .expect("可达接收方的私聊不应失败");
        assert_eq!(report.delivered, 1);

        let delivered = recv_chat(&mut bob_rx).await;
        assert_eq!(delivered.sender, "alice", "发送方应被认证身份覆盖");
        assert_eq!(delivered.content, "hi bob");
    }

    #[tokio::test]
    /// 测试 receiver 为空的 Chat 消息走全局广播，覆盖所有已注册连接。
    async fn test_chat_without_receiver_broadcasts() {
        let fixture = LifecycleFixture::new();
        let (mut alice, mut alice_rx) = fixture.establish("alice").await;
        let (_bob, mut bob_rx) = fixture.establish("bob").await;

        let message = ChatMessage::new("", None, "大家好", MessageKind::Chat);
        let report = alice
            .on_message(envelope_of(&message))
            .await
            .expect("广播不应失败");
        assert_eq!(report.delivered, 2, "广播应覆盖包括发送方在内的全部连接");

        assert_eq!(recv_chat(&mut alice_rx).await.content, "大家好");
        assert_eq!(recv_chat(&mut bob_rx).await.content, "大家好");
    }

    #[tokio::test]
    /// 测试单播目标不可达时生命周期吸收该条件：记录并报告零投递，连接不受影响。
    async fn test_unavailable_recipient_is_absorbed() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _alice_rx) = fixture.establish("alice").await;

        let message = ChatMessage::new("", Some("ghost".to_string()), "hi", MessageKind::Chat);
        let report = alice
            .on_message(envelope_of(&message))
            .await
            .expect("接收方不可达对发送连接而言不是错误");
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(alice.state(), ConnectionState::Established);
    }

    #[tokio::test]
    /// 测试 Join 消息把发送方加入 content 指定的房间并向房间组播通知。
    async fn test_join_message_updates_membership_and_notifies_room() {
        let fixture = LifecycleFixture::new();
        let (mut alice, mut alice_rx) = fixture.establish("alice").await;

        let join = ChatMessage::new("", None, "room1", MessageKind::Join);
        let report = alice
            .on_message(envelope_of(&join))
            .await
            .expect("Join 消息处理不应失败");

        assert!(fixture.rooms.members_of("room1").contains("alice"));
        assert_eq!(report.delivered, 1, "房间当前唯一的成员应收到加入通知");
        let notified = recv_chat(&mut alice_rx).await;
        assert_eq!(notified.kind, MessageKind::Join);
        assert_eq!(notified.sender, "alice");
    }

    #[tokio::test]
    /// 测试 Leave 消息把发送方移出房间并通知仍留在房间中的成员。
    async fn test_leave_message_updates_membership_and_notifies_rest() {
        let fixture = LifecycleFixture::new();
        let (mut alice, mut alice_rx) = fixture.establish("alice").await;
        let (mut bob, mut bob_rx) = fixture.establish("bob").await;

        alice
            .on_message(envelope_of(&ChatMessage::new("", None, "room1", MessageKind::Join)))
            .await
            .expect("alice 加入房间失败");
        bob.on_message(envelope_of(&ChatMessage::new("", None, "room1", MessageKind::Join)))
            .await
            .expect("bob 加入房间失败");
        // 清空前面的加入通知
        while alice_rx.try_recv().is_ok() {}
        while bob_rx.try_recv().is_ok() {}

        let report = alice
            .on_message(envelope_of(&ChatMessage::new("", None, "room1", MessageKind::Leave)))
            .await
            .expect("Leave 消息处理不应失败");

        assert!(!fixture.rooms.members_of("room1").contains("alice"));
        assert!(fixture.rooms.members_of("room1").contains("bob"));
        assert_eq!(report.delivered, 1, "只有仍在房间中的 bob 收到离开通知");
        assert_eq!(recv_chat(&mut bob_rx).await.kind, MessageKind::Leave);
    }

    #[tokio::test]
    /// 测试房间标识为空的 Join 消息报解码错误，连接保持存活。
    async fn test_join_without_room_id_is_decode_error() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _rx) = fixture.establish("alice").await;

        let join = ChatMessage::new("", None, "   ", MessageKind::Join);
        let result = alice.on_message(envelope_of(&join)).await;
        assert!(matches!(result, Err(ChatServiceError::DecodeError(_))));
        assert_eq!(alice.state(), ConnectionState::Established, "解码错误不应关闭连接");
    }

    #[tokio::test]
    /// 测试信封负载不是合法 ChatMessage 时报解码错误，且不触碰任何状态。
    async fn test_malformed_payload_is_decode_error() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _rx) = fixture.establish("alice").await;

        let bad = WsMessage::new(CHAT_MESSAGE_TYPE, &serde_json::json!({"content": 42}))
            .expect("构造畸形信封失败");
        let result = alice.on_message(bad).await;
        assert!(matches!(result, Err(ChatServiceError::DecodeError(_))));

        let unknown_type = WsMessage::new("Telemetry", &serde_json::json!({}))
            .expect("构造未知类型信封失败");
        let result = alice.on_message(unknown_type).await;
        assert!(matches!(result, Err(ChatServiceError::DecodeError(_))));
    }

    #[tokio::test]
    /// 测试断开事件注销会话、退出全部已加入的房间，且重复触发幂等。
    async fn test_disconnect_is_idempotent_and_leaves_all_rooms() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _rx) = fixture.establish("alice").await;
        alice
            .on_message(envelope_of(&ChatMessage::new("", None, "room1", MessageKind::Join)))
            .await
            .expect("加入房间失败");

        alice.on_disconnect().await;
        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(fixture.registry.is_empty(), "断开后注册表应为空");
        assert!(
            !fixture.rooms.members_of("room1").contains("alice"),
            "断开应退出显式加入的房间"
        );
        assert!(
            !fixture.rooms.contains("alice"),
            "断开应退出主房间（随之因空被移除）"
        );

        // 第二次断开：无操作，无错误
        alice.on_disconnect().await;
        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(fixture.registry.is_empty());
    }

    #[tokio::test]
    /// 测试同一用户快速重连后，旧连接的断开事件不注销新会话，
    /// 也不触碰新连接持有的主房间成员关系。
    async fn test_stale_disconnect_preserves_replacement_session() {
        let fixture = LifecycleFixture::new();
        let (mut first, _rx1) = fixture.establish("alice").await;
        let (_second, _rx2) = fixture.establish("alice").await;
        let replacement = fixture
            .registry
            .lookup("alice")
            .expect("重连后应查找到新会话");

        first.on_disconnect().await;
        assert_eq!(first.state(), ConnectionState::Closed);

        let current = fixture
            .registry
            .lookup("alice")
            .expect("替换后的新会话不应被旧连接的断开事件注销");
        assert_eq!(current.session_id, replacement.session_id);
        assert!(
            fixture.rooms.members_of("alice").contains("alice"),
            "新连接的主房间成员关系应保留"
        );
    }

    #[tokio::test]
    /// 测试断开后的消息被静默丢弃（而不是报错或 panic）。
    async fn test_message_after_disconnect_is_dropped() {
        let fixture = LifecycleFixture::new();
        let (mut alice, _rx) = fixture.establish("alice").await;
        alice.on_disconnect().await;

        let message = ChatMessage::new("", None, "too late", MessageKind::Chat);
        let report = alice
            .on_message(envelope_of(&message))
            .await
            .expect("Closed 状态下的消息应被静默丢弃");
        assert_eq!(report, DeliveryReport::default());
    }
}
