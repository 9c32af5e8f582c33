// chat_service/src/ws_server/message_router.rs

//! 投递路由器：基于连接注册表与房间成员存储实现
//! 单播 / 全局广播 / 房间组播三种投递算法。
//!
//! 三种操作都只读两个存储，不做任何注册表或成员关系变更。
//! 投递模式（单播还是广播）由生命周期控制器根据 `receiver` 是否非空
//! 在上游选择一次，路由器内部不重新判定。

use chat_models::messages::ChatMessage;
use chat_models::ws_payloads::CHAT_MESSAGE_TYPE;
use log::{debug, info, warn};
use std::sync::Arc;
use ws_transport::message::WsMessage;

use crate::error::ChatServiceError;
use crate::ws_server::client_session::UserSession;
use crate::ws_server::connection_registry::ConnectionRegistry;
use crate::ws_server::room_store::RoomStore;

/// 一次投递操作的结果计数。
///
/// 广播/组播中对单个句柄的写入失败不会中断对其余句柄的投递，
/// 只累加进 `failed`；部分失败以计数反馈，永远不会升级为错误。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 成功写入的句柄数。
    pub delivered: usize,
    /// 写入失败的句柄数。
    pub failed: usize,
}

/// 消息投递路由器。
#[derive(Debug)]
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomStore>,
}

impl DeliveryRouter {
    /// 创建一个新的 `DeliveryRouter` 实例。
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomStore>) -> Self {
        Self { registry, rooms }
    }

    /// 单播：将消息投递给 `message.receiver` 指定的单个接收方。
    ///
    /// 接收方已注册且句柄可写时，编码并写入，报告一次投递；
    /// 接收方未注册、句柄已关闭或写入失败时，报告零投递并返回
    /// `RecipientUnavailable`。该条件是非致命的：本核心没有回执通道，
    /// 调用方记录即可，不会反馈给发送方的传输连接。
    pub async fn deliver(&self, message: &ChatMessage) -> Result<DeliveryReport, ChatServiceError> {
        let receiver = message.receiver.as_deref().unwrap_or_default();

        let session = match self.registry.lookup(receiver) {
            Some(session) if session.is_open() => session,
            _ => {
                warn!(
                    "无法向 {} 投递私聊消息: 会话不存在或已关闭",
                    receiver
                );
                return Err(ChatServiceError::RecipientUnavailable {
                    receiver: receiver.to_string(),
                });
            }
        };

        let envelope = WsMessage::new(CHAT_MESSAGE_TYPE, message)?;
        debug!(
            "向 {} 发送私聊消息, 信封 {}",
            receiver, envelope.message_id
        );

        // 写入在分片锁之外进行；与断开事件竞争的失败视同接收方不可达
        if session.sender.send(envelope).await.is_err() {
            warn!("向 {} 写入私聊消息失败: 连接已在投递期间关闭", receiver);
            return Err(ChatServiceError::RecipientUnavailable {
                receiver: receiver.to_string(),
            });
        }

        info!("私聊消息已投递给 {}", receiver);
        Ok(DeliveryReport {
            delivered: 1,
            failed: 0,
        })
    }

    /// 全局广播：将消息投递给当前注册的全部连接。
    ///
    /// 目标集合是调用时刻的即时快照：快照之后才注册的会话收不到本条消息
    /// （接受的一致性放宽，替代方案需要跨发送 I/O 的全局锁）。
    /// 句柄关闭的会话被跳过，不计入任何计数；写入失败只累加失败计数并继续。
    pub async fn deliver_all(
        &self,
        message: &ChatMessage,
    ) -> Result<DeliveryReport, ChatServiceError> {
        let envelope = WsMessage::new(CHAT_MESSAGE_TYPE, message)?;
        let snapshot = self.registry.snapshot();

        let mut report = DeliveryReport::default();
        for session in &snapshot {
            self.send_isolated(session, &envelope, &mut report).await;
        }

        info!(
            "来自 {} 的广播完成: 成功 {} 个, 失败 {} 个 (快照 {} 个会话)",
            message.sender,
            report.delivered,
            report.failed,
            snapshot.len()
        );
        Ok(report)
    }

    /// 房间组播：将消息投递给房间的全部当前成员。
    ///
    /// 成员集合与注册表快照都在调用时刻解析。已加入房间但当前没有
    /// 注册连接的成员被静默跳过，不是错误；未知房间投递零次。
    pub async fn deliver_to_room(
        &self,
        room_id: &str,
        message: &ChatMessage,
    ) -> Result<DeliveryReport, ChatServiceError> {
        let members = self.rooms.members_of(room_id);
        if members.is_empty() {
            debug!("房间 {} 不存在或没有成员，本次组播投递零次", room_id);
            return Ok(DeliveryReport::default());
        }

        let envelope = WsMessage::new(CHAT_MESSAGE_TYPE, message)?;
        let mut report = DeliveryReport::default();
        for member in &members {
            match self.registry.lookup(member) {
                Some(session) => self.send_isolated(&session, &envelope, &mut report).await,
                None => {
                    // 在房间中但未连接，静默跳过
                    debug!("房间 {} 的成员 {} 当前未注册连接，跳过", room_id, member);
                }
            }
        }

        info!(
            "房间 {} 组播完成: 成功 {} 个, 失败 {} 个 (成员 {} 名)",
            room_id,
            report.delivered,
            report.failed,
            members.len()
        );
        Ok(report)
    }

    /// 向单个会话写入信封，隔离每个句柄的失败。
    ///
    /// 句柄关闭视同"不存在"，直接跳过且不计数；写入失败累加失败计数。
    /// 两种情况都不会清理注册表——发现失效句柄后的清理由断开事件驱动。
    async fn send_isolated(
        &self,
        session: &Arc<UserSession>,
        envelope: &WsMessage,
        report: &mut DeliveryReport,
    ) {
        if !session.is_open() {
            debug!("用户 {} 的句柄已关闭，跳过投递", session.user_id);
            return;
        }
        if session.sender.send(envelope.clone()).await.is_ok() {
            report.delivered += 1;
        } else {
            warn!("向用户 {} 写入失败，继续投递其余句柄", session.user_id);
            report.failed += 1;
        }
    }
}
