use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolError};

/// Identity and session of the caller.
pub struct GetUserInfo;

#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub login: String,
    pub id: u64,
    pub name: Option<String>,
    pub session_id: String,
}

#[async_trait]
impl Tool for GetUserInfo {
    const NAME: &'static str = "get_user_info";
    type Args = NoArgs;
    type Output = UserInfo;

    fn description(&self) -> &'static str {
        "Get the authenticated user's GitHub login, display name and current session id."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, ctx: &ToolContext, _args: NoArgs) -> Result<UserInfo, ToolError> {
        Ok(UserInfo {
            login: ctx.user.login.clone(),
            id: ctx.user.id,
            name: ctx.user.name.clone(),
            session_id: ctx.session.to_string(),
        })
    }
}
