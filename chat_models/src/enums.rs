//! 通用枚举模块。
//!
//! 本模块定义了在聊天路由服务的多个组件之间共享的枚举类型。
//! 所有枚举都派生 `Serialize`, `Deserialize`, `Debug`, `Clone`, `PartialEq`, `Eq`
//! 以支持数据交换、调试、实例复制和比较。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 表示一条聊天消息的业务种类。
///
/// 消息种类是一个封闭的枚举，而非自由字符串：非法的种类在编译期即不可表示。
/// 线上序列化形式为大写标签（`"CHAT"` / `"JOIN"` / `"LEAVE"`），
/// 与既有客户端的字段取值保持一致。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// 普通聊天消息。根据 `receiver` 是否存在选择单播或全局广播。
    #[default]
    Chat,
    /// 加入房间。`content` 字段携带目标房间标识。
    Join,
    /// 离开房间。`content` 字段携带目标房间标识。
    Leave,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 使用 Debug 格式化，枚举成员名即为显示名称
        write!(f, "{:?}", self)
    }
}
