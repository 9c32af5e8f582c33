// chat_service/src/ws_server/room_store.rs

//! 房间成员存储：房间标识到成员用户标识集合的并发映射。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashSet;

/// 管理所有房间的成员关系。
///
/// 房间在首个成员加入时隐式创建，在成员集合变空的同一次操作内整体移除：
/// 稳态下房间标识永远不会映射到空集合。成员关系与连接注册表相互独立——
/// 用户离线不会自动退出房间，退出房间也不会断开连接。
/// 每次 `join`/`leave` 通过 `Entry` API 在单个键上原子完成，
/// 不同房间之间没有任何共享锁。
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomStore {
    /// 创建一个新的 `RoomStore` 实例。
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// 将用户加入房间，房间不存在时隐式创建。幂等。
    ///
    /// # Returns
    /// 用户此前不在房间中时返回 `true`。
    pub fn join(&self, room_id: &str, user_id: &str) -> bool {
        let added = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        if added {
            info!("用户 {} 加入房间 {}", user_id, room_id);
        } else {
            debug!("用户 {} 已在房间 {} 中，加入为无操作", user_id, room_id);
        }
        added
    }

    /// 将用户移出房间；移除后集合为空时整体删除该房间。
    /// 房间或成员不存在时是无操作，不是错误。
    ///
    /// # Returns
    /// 实际发生了移除时返回 `true`。
    pub fn leave(&self, room_id: &str, user_id: &str) -> bool {
        let removed = match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let removed = occupied.get_mut().remove(user_id);
                if occupied.get().is_empty() {
                    // 空房间在同一次持锁操作内移除，外部永远观察不到空集合
                    occupied.remove();
                    debug!("房间 {} 已无成员，移除房间", room_id);
                }
                removed
            }
            Entry::Vacant(_) => false,
        };
        if removed {
            info!("用户 {} 离开房间 {}", user_id, room_id);
        }
        removed
    }

    /// 返回房间成员集合的即时快照。未知房间返回空集合，不是错误。
    pub fn members_of(&self, room_id: &str) -> HashSet<String> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// 房间当前是否存在（即至少有一名成员）。
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// 当前存在的房间数量。
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// 是否没有任何房间。
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// 以 debug 级别输出房间成员关系，用于诊断。
    pub fn debug_dump(&self) {
        debug!("=== 房间成员状态 ===");
        debug!("活动房间数: {}", self.rooms.len());
        for entry in self.rooms.iter() {
            debug!("  - 房间: {}, 成员: {:?}", entry.key(), entry.value());
        }
        debug!("=== 房间状态结束 ===");
    }
}
