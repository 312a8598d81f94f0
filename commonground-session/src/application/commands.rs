use crate::application::service::PrincipalKind;

/// 创建会话命令
#[derive(Debug, Clone)]
pub struct CreateSessionCommand {
    pub principal: PrincipalKind,
    pub user_id: String,
    pub user_agent: Option<String>,
}

impl CreateSessionCommand {
    pub fn user(user_id: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            principal: PrincipalKind::User,
            user_id: user_id.into(),
            user_agent,
        }
    }

    pub fn admin(user_id: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            principal: PrincipalKind::Admin,
            user_id: user_id.into(),
            user_agent,
        }
    }
}
