// chat_service/src/auth.rs

//! 握手阶段的身份认证协作方。
//!
//! 认证在任何注册表变更之前执行一次：成功返回经过认证的用户标识，
//! 失败则该连接以策略违规关闭码被拒绝。对路由核心而言，
//! 认证是一个黑盒谓词，本模块通过 `Authenticator` trait 把它隔离在接缝之外。

use crate::error::ChatServiceError;
use ws_transport::server::transport::ConnectMeta;

/// 身份认证协作方接口。
///
/// 每个连接事件调用一次 `authenticate`；实现方从握手元数据中解析并校验身份，
/// 返回非空的用户标识，或返回 `ChatServiceError::AuthenticationRejected`。
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, meta: &ConnectMeta) -> Result<String, ChatServiceError>;
}

/// 基于握手查询串的认证实现。
///
/// 从请求查询串中提取 `userId` 与 `token` 两个参数，
/// 两者都必须存在且非空。
#[derive(Debug, Default)]
pub struct QueryAuthenticator;

impl QueryAuthenticator {
    /// 校验握手令牌。
    // TODO: 接入真实的 JWT 校验（与主后端共享密钥/公钥），当前仅要求令牌非空。
    fn validate_token(&self, token: &str) -> bool {
        !token.is_empty()
    }
}

impl Authenticator for QueryAuthenticator {
    fn authenticate(&self, meta: &ConnectMeta) -> Result<String, ChatServiceError> {
        let user_id = meta
            .query_param("userId")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ChatServiceError::AuthenticationRejected("握手请求缺少非空的 userId 参数".to_string())
            })?;

        let token = meta.query_param("token").unwrap_or_default();
        if !self.validate_token(&token) {
            return Err(ChatServiceError::AuthenticationRejected(format!(
                "用户 {} 的握手令牌校验失败",
                user_id
            )));
        }

        Ok(user_id)
    }
}
