use async_trait::async_trait;

use crate::identity::UserIdentity;

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Called once per completed login, before the session is established.
///
/// Use it to provision or update the user in your own database. A failing hook is logged and
/// does not prevent the login.
#[async_trait]
pub trait PostLoginHook: Send + Sync + 'static {
    async fn after_user_login(&self, user: &UserIdentity) -> Result<(), HookError>;
}
