use crate::alloc::AllocError;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, UserContext};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

/// Sessions older than this must log in again.
pub const SESSION_TTL_HOURS: i64 = 24 * 7;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        match self.code {
            "validation_failed" | "bad_params" | "conflict" => {
                tracing::warn!(request = id, code = self.code, "{}", self.message)
            }
            c if c.starts_with("db_") || c == "io_failed" => {
                tracing::error!(request = id, code = self.code, "{}", self.message)
            }
            _ => tracing::debug!(request = id, code = self.code, "{}", self.message),
        }
        err(id, self.code, self.message, self.details)
    }
}

impl From<AllocError> for HandlerErr {
    fn from(e: AllocError) -> Self {
        let details = json!({ "level": e.level(), "field": e.field() });
        Self::new("validation_failed", e.to_string()).with_details(details)
    }
}

pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Resolves the request's session token to the user it belongs to.
pub fn require_user(conn: &Connection, req: &Request) -> Result<UserContext, HandlerErr> {
    let token = req
        .session
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("unauthorized", "please log in"))?;
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT u.id, u.name, u.email, u.status
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ? AND s.created_at >= ?",
            params![token, db::ts_hours_ago(SESSION_TTL_HOURS)],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((user_id, name, email, status)) = row else {
        return Err(HandlerErr::new("unauthorized", "session expired or unknown"));
    };
    if status != "active" {
        return Err(HandlerErr::new("unauthorized", "account is not active"));
    }
    Ok(UserContext {
        user_id,
        name,
        email,
    })
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Like `required_str` but keeps surrounding whitespace (passwords).
pub fn required_raw_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `params.today` lets a caller pin the reference date; defaults to the local date.
pub fn today_param(params: &Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today") {
        None | Some(Value::Null) => Ok(db::today()),
        Some(Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("today must be YYYY-MM-DD")),
        Some(_) => Err(HandlerErr::bad_params("today must be a YYYY-MM-DD string")),
    }
}
