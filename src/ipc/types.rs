use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    /// Session token issued by `auth.login`; resolved per request.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

/// The signed-in user a request acts for.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub name: String,
    pub email: String,
}
