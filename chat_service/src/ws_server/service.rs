// chat_service/src/ws_server/service.rs

//! WebSocket 服务端核心服务：监听、连接接线与每连接任务编排。
//!
//! 传输层交付的每条连接在这里获得一个生命周期控制器、一条出站消息通道
//! 和一个发送泵任务。接收循环把入站信封交给生命周期控制器处理，
//! 发送泵把会话通道中的信封写给对端；两者都受连接关闭信号约束。

use anyhow::{Context, Result};
use chat_models::ws_payloads::{ErrorResponsePayload, ERROR_RESPONSE_MESSAGE_TYPE};
use futures_util::stream::SplitStream;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use ws_transport::error::WsError;
use ws_transport::message::WsMessage;
use ws_transport::server::transport::{
    receive_message, start_server, CloseCode, ConnectMeta, ConnectionHandler, WsStream,
};

use crate::auth::Authenticator;
use crate::config::ChatServiceConfig;
use crate::error::ChatServiceError;
use crate::ws_server::connection_registry::ConnectionRegistry;
use crate::ws_server::lifecycle::ConnectionLifecycle;
use crate::ws_server::message_router::DeliveryRouter;
use crate::ws_server::room_store::RoomStore;

/// 每条连接出站通道的容量。
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// 聊天路由服务，封装配置、共享存储与路由器。
pub struct ChatWsService {
    config: ChatServiceConfig,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    router: Arc<DeliveryRouter>,
    authenticator: Arc<dyn Authenticator>,
}

impl ChatWsService {
    /// 创建一个新的 `ChatWsService` 实例，并初始化两个共享存储与路由器。
    pub fn new(config: ChatServiceConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomStore::new());
        let router = Arc::new(DeliveryRouter::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
        ));
        info!("[ChatWsService] 服务实例已创建");
        Self {
            config,
            registry,
            rooms,
            router,
            authenticator,
        }
    }

    /// 启动 WebSocket 服务端并阻塞运行。
    pub async fn start(&self) -> Result<()> {
        let listen_addr = self.config.listen_addr();
        info!("[ChatWsService] 正在启动, 监听地址: {}", listen_addr);

        let registry = Arc::clone(&self.registry);
        let rooms = Arc::clone(&self.rooms);
        let router = Arc::clone(&self.router);
        let authenticator = Arc::clone(&self.authenticator);

        let on_connect = move |handler: ConnectionHandler,
                               receiver: SplitStream<WsStream>,
                               meta: ConnectMeta| {
            let registry = Arc::clone(&registry);
            let rooms = Arc::clone(&rooms);
            let router = Arc::clone(&router);
            let authenticator = Arc::clone(&authenticator);
            async move {
                handle_connection(handler, receiver, meta, registry, rooms, router, authenticator)
                    .await;
            }
        };

        start_server(&listen_addr, on_connect)
            .await
            .context("WebSocket 服务器启动失败或运行中遇到不可恢复错误")?;

        warn!("[ChatWsService] WebSocket 服务器意外停止");
        Ok(())
    }
}

/// 处理单条连接的完整生命周期：认证、收发循环、断开清理。
async fn handle_connection(
    mut handler: ConnectionHandler,
    mut receiver: SplitStream<WsStream>,
    meta: ConnectMeta,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
    router: Arc<DeliveryRouter>,
    authenticator: Arc<dyn Authenticator>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(OUTBOUND_CHANNEL_CAPACITY);
    let error_tx = outbound_tx.clone();
    let close_flag = Arc::new(AtomicBool::new(false));

    let mut lifecycle = ConnectionLifecycle::new(registry, rooms, router);
    let session = match lifecycle
        .on_connect(&meta, outbound_tx, Arc::clone(&close_flag), authenticator.as_ref())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!("[ChatWsService] 拒绝来自 {} 的连接: {}", meta.peer_addr, e);
            if let Err(close_err) = handler.close(CloseCode::Policy, "authentication rejected").await
            {
                debug!("[ChatWsService] 向被拒连接发送关闭帧失败: {}", close_err);
            }
            return;
        }
    };
    let session_id = session.session_id;
    let user_id = session.user_id.clone();
    drop(session);

    // 发送泵：独占写入半边，把会话通道中的信封写给对端
    let pump_close = Arc::clone(&close_flag);
    let sender_task = tokio::spawn(async move {
        loop {
            if pump_close.load(Ordering::SeqCst) {
                debug!("[SenderTask {}] 收到关闭信号，发送泵退出", session_id);
                break;
            }
            tokio::select! {
                maybe_msg = outbound_rx.recv() => match maybe_msg {
                    Some(envelope) => {
                        if let Err(e) = handler.send_message(&envelope).await {
                            warn!(
                                "[SenderTask {}] 向对端写入失败, 视为连接已断开: {}",
                                session_id, e
                            );
                            pump_close.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                    None => {
                        debug!("[SenderTask {}] 出站通道已关闭，发送泵退出", session_id);
                        break;
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    // 定期醒来复查关闭信号
                    continue;
                }
            }
        }
    });

    // 接收循环：入站信封交给生命周期控制器
    loop {
        if close_flag.load(Ordering::SeqCst) {
            info!(
                "[ChatWsService] 会话 {}: 接收循环检测到关闭信号，结束连接处理",
                session_id
            );
            break;
        }

        let received = tokio::select! {
            result = receive_message(&mut receiver) => Some(result),
            _ = tokio::time::sleep(Duration::from_secs(1)) => None,
        };

        match received {
            Some(Some(Ok(envelope))) => {
                let message_type = envelope.message_type.clone();
                match lifecycle.on_message(envelope).await {
                    Ok(report) => debug!(
                        "[ChatWsService] 会话 {}: 消息处理完成, 投递成功 {} 失败 {}",
                        session_id, report.delivered, report.failed
                    ),
                    Err(ChatServiceError::DecodeError(detail)) => {
                        warn!(
                            "[ChatWsService] 会话 {}: 消息解码失败, 丢弃该条消息: {}",
                            session_id, detail
                        );
                        send_error_response(&error_tx, Some(message_type), detail).await;
                    }
                    Err(e) => error!(
                        "[ChatWsService] 会话 {}: 消息处理出错: {}",
                        session_id, e
                    ),
                }
            }
            Some(Some(Err(WsError::DeserializationError(detail)))) => {
                // 信封本身解析失败：丢弃该条消息，连接保持存活
                warn!(
                    "[ChatWsService] 会话 {}: 入站帧不是合法信封: {}",
                    session_id, detail
                );
                send_error_response(&error_tx, None, detail).await;
            }
            Some(Some(Err(e))) => {
                warn!(
                    "[ChatWsService] 会话 {}: 传输错误, 断开连接: {}",
                    session_id, e
                );
                break;
            }
            Some(None) => {
                info!("[ChatWsService] 会话 {}: 对端关闭连接", session_id);
                break;
            }
            None => {
                // 接收超时，回到循环顶部复查关闭信号
                continue;
            }
        }
    }

    lifecycle.on_disconnect().await;
    close_flag.store(true, Ordering::SeqCst);
    drop(error_tx);

    if let Err(e) = sender_task.await {
        error!(
            "[ChatWsService] 会话 {}: 发送泵任务异常结束: {:?}",
            session_id, e
        );
    }
    info!(
        "[ChatWsService] 用户 {} 的连接处理结束 (会话 {})",
        user_id, session_id
    );
}

/// 向客户端回送标准错误响应（尽力而为）。
async fn send_error_response(
    sender: &mpsc::Sender<WsMessage>,
    original_message_type: Option<String>,
    error_message: String,
) {
    let payload = ErrorResponsePayload {
        original_message_type,
        error: error_message,
    };
    match WsMessage::new(ERROR_RESPONSE_MESSAGE_TYPE, &payload) {
        Ok(envelope) => {
            if sender.send(envelope).await.is_err() {
                debug!("错误响应未能入队，连接可能已关闭");
            }
        }
        Err(e) => error!("创建 ErrorResponse 信封失败: {}", e),
    }
}
