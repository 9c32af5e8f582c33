// chat_service/src/ws_server/connection_registry.rs

//! 连接注册表：用户身份到活动连接会话的并发映射。

use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

use crate::ws_server::client_session::UserSession;

/// 管理所有活动的用户会话。
///
/// 以用户标识为键，`DashMap` 的分片锁提供按键的原子性：不同键的并发
/// `register`/`unregister` 互不干扰，同一键的并发调用收敛到单一一致的最终状态。
/// 注册表只暴露下列操作，调用方无法绕过原子性直接触碰底层映射。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<UserSession>>,
}

impl ConnectionRegistry {
    /// 创建一个新的 `ConnectionRegistry` 实例。
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// 插入或替换指定用户的会话映射（后写者胜）。
    ///
    /// 同一用户的新连接会替换旧条目；旧句柄不会被本方法关闭，
    /// 其物理连接的收尾留给传输层。后续查找立即返回新句柄，
    /// 与使用旧句柄的在途发送之间没有顺序保证。重复注册同一会话是幂等的。
    ///
    /// # Returns
    /// 如果发生了替换，返回被替换的旧会话。
    pub fn register(&self, session: Arc<UserSession>) -> Option<Arc<UserSession>> {
        let replaced = self
            .sessions
            .insert(session.user_id.clone(), Arc::clone(&session));

        match &replaced {
            Some(old) => info!(
                "用户 {} 的会话已被替换: 旧会话 {} -> 新会话 {} (来自 {})",
                session.user_id, old.session_id, session.session_id, session.peer_addr
            ),
            None => info!(
                "用户 {} 注册会话成功: 会话 {} (来自 {})",
                session.user_id, session.session_id, session.peer_addr
            ),
        }
        debug!("当前活动会话总数: {}", self.sessions.len());

        replaced
    }

    /// 移除指定用户的会话映射。用户不存在时是无操作，不是错误。
    ///
    /// # Returns
    /// 如果找到并移除了会话，返回被移除的会话，否则返回 `None`。
    pub fn unregister(&self, user_id: &str) -> Option<Arc<UserSession>> {
        match self.sessions.remove(user_id) {
            Some((_key, session)) => {
                info!("用户 {} 注销会话: 会话 {}", user_id, session.session_id);
                debug!("移除后当前活动会话总数: {}", self.sessions.len());
                Some(session)
            }
            None => {
                debug!("注销不存在的用户 {}，无操作", user_id);
                None
            }
        }
    }

    /// 仅当给定会话仍是该用户当前注册的会话时将其移除。
    ///
    /// 断开事件用本方法注销自己的会话：已被同一用户更新连接替换的旧会话
    /// 匹配不到条目，注销为无操作，新会话的映射不受影响。
    ///
    /// # Returns
    /// 实际发生了移除时返回 `true`。
    pub fn unregister_session(&self, session: &Arc<UserSession>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.user_id.as_str(), |_key, current| {
                Arc::ptr_eq(current, session)
            })
            .is_some();
        if removed {
            info!(
                "用户 {} 注销会话: 会话 {}",
                session.user_id, session.session_id
            );
            debug!("移除后当前活动会话总数: {}", self.sessions.len());
        } else {
            debug!(
                "用户 {} 的会话 {} 已不是当前注册的会话，注销为无操作",
                session.user_id, session.session_id
            );
        }
        removed
    }

    /// 查找指定用户当前的会话。反映最近一次已完成的注册/注销调用的效果。
    pub fn lookup(&self, user_id: &str) -> Option<Arc<UserSession>> {
        self.sessions.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// 获取当前全部会话的即时快照，供广播迭代使用。
    ///
    /// 快照在调用时刻采集：之后才注册的会话不会出现在本次快照中。
    /// 迭代与写入都在快照副本上进行，任何存储分片锁都不会跨发送 I/O 持有。
    pub fn snapshot(&self) -> Vec<Arc<UserSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 当前活动会话数量。
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// 注册表是否为空。
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 以 debug 级别输出注册表内容，用于诊断。
    pub fn debug_dump(&self) {
        debug!("=== 连接注册表状态 ===");
        debug!("活动会话数: {}", self.sessions.len());
        for entry in self.sessions.iter() {
            let session = entry.value();
            debug!(
                "  - 用户: {}, 会话: {}, 可写: {}",
                session.user_id,
                session.session_id,
                session.is_open()
            );
        }
        debug!("=== 注册表状态结束 ===");
    }
}
