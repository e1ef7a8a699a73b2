use crate::auth;
use crate::db;
use crate::ipc::handlers::dashboard::hour_game_for;
use crate::ipc::helpers::{
    db_conn, opt_str, require_user, required_raw_str, required_str, respond, today_param,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const INVALID_LOGIN: &str = "Invalid email or password";
/// Reset tickets older than this are refused.
pub const RESET_TTL_HOURS: i64 = 1;

fn raw_str<'a>(params: &'a Value, key: &str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn user_json(conn: &Connection, user_id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, email, dob, role, status, created_at, last_login
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "dob": r.get::<_, String>(3)?,
                "role": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "lastLogin": r.get::<_, Option<String>>(7)?
            }))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "user not found"))
}

fn email_owner(conn: &Connection, email: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT id FROM users WHERE email = ?", [email], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Checks name, email and date of birth, appending each broken rule.
fn check_identity(
    name: Option<&str>,
    email: &str,
    dob: Option<&str>,
    errors: &mut Vec<&'static str>,
) {
    if name.is_none() {
        errors.push("Name is required");
    }
    if !auth::is_valid_email(email) {
        errors.push("Enter a valid email address");
    }
    if dob.and_then(auth::parse_dob).is_none() {
        errors.push("Date of birth must be a valid YYYY-MM-DD date");
    }
}

fn canonical_dob(dob: String) -> String {
    auth::parse_dob(&dob)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or(dob)
}

fn rejected(message: &str, errors: Vec<&'static str>) -> HandlerErr {
    HandlerErr::new("validation_failed", message).with_details(json!({ "errors": errors }))
}

fn auth_register(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = opt_str(&req.params, "name");
    let email = auth::normalize_email(raw_str(&req.params, "email"));
    let dob = opt_str(&req.params, "dob");
    let password = raw_str(&req.params, "password");
    let confirm = raw_str(&req.params, "confirmPassword");

    let mut errors = Vec::new();
    check_identity(name.as_deref(), &email, dob.as_deref(), &mut errors);
    if let Some(msg) = auth::check_new_password(password, confirm) {
        errors.push(msg);
    }
    let (Some(name), Some(dob), true) = (name, dob, errors.is_empty()) else {
        return Err(rejected("registration rejected", errors));
    };
    let dob = canonical_dob(dob);

    if email_owner(conn, &email)?.is_some() {
        return Err(HandlerErr::new(
            "conflict",
            "An account with this email already exists",
        ));
    }

    let hash = auth::hash_password(password).map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, email, dob, password_hash, role, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'student', 'active', ?)",
        params![
            user_id,
            name,
            email,
            dob,
            hash,
            db::now_ts()
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(user = %user_id, "account registered");

    Ok(json!({ "userId": user_id }))
}

fn auth_login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let email = auth::normalize_email(&required_str(&req.params, "email")?);
    let password = required_raw_str(&req.params, "password")?;

    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, status FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((user_id, hash, status)) = row else {
        return Err(HandlerErr::new("unauthorized", INVALID_LOGIN));
    };
    if !auth::verify_password(&password, &hash) {
        return Err(HandlerErr::new("unauthorized", INVALID_LOGIN));
    }
    if status != "active" {
        return Err(HandlerErr::new("unauthorized", "account is not active"));
    }

    let token = Uuid::new_v4().to_string();
    let now = db::now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        params![token, user_id, now],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tx.execute(
        "UPDATE users SET last_login = ? WHERE id = ?",
        params![now, user_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::info!(user = %user_id, "login");

    Ok(json!({
        "session": token,
        "user": user_json(conn, &user_id)?
    }))
}

fn auth_logout(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    conn.execute(
        "DELETE FROM sessions WHERE token = ?",
        [req.session.as_deref().unwrap_or("").trim()],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tracing::info!(user = %user.user_id, "logout");
    Ok(json!({ "ok": true }))
}

fn auth_forgot_password(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let email = auth::normalize_email(&required_str(&req.params, "email")?);
    let dob = required_str(&req.params, "dob")?;
    if auth::parse_dob(&dob).is_none() {
        return Err(HandlerErr::bad_params("dob must be YYYY-MM-DD"));
    }
    let dob = canonical_dob(dob);

    let user_id: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ? AND dob = ?",
            params![email, dob],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::new(
            "not_found",
            "No account matches that email and date of birth",
        ));
    };

    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO password_resets(token, user_id, created_at) VALUES(?, ?, ?)",
        params![token, user_id, db::now_ts()],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({ "resetToken": token }))
}

fn auth_reset_password(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let token = required_str(&req.params, "resetToken")?;
    let password = raw_str(&req.params, "password");
    let confirm = raw_str(&req.params, "confirmPassword");

    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM password_resets WHERE token = ? AND created_at >= ?",
            params![token, db::ts_hours_ago(RESET_TTL_HOURS)],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::new(
            "not_found",
            "reset token is unknown, used or expired",
        ));
    };
    if let Some(msg) = auth::check_new_password(password, confirm) {
        return Err(rejected(msg, vec![msg]));
    }
    let hash = auth::hash_password(password).map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        params![hash, user_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute("DELETE FROM password_resets WHERE user_id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::info!(user = %user_id, "password reset");

    Ok(json!({ "ok": true }))
}

fn profile_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let today = today_param(&req.params)?;
    Ok(json!({
        "user": user_json(conn, &user.user_id)?,
        "game": hour_game_for(conn, &user.user_id, today)?
    }))
}

fn profile_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let name = opt_str(&req.params, "name");
    let email = auth::normalize_email(raw_str(&req.params, "email"));
    let dob = opt_str(&req.params, "dob");
    let new_password = raw_str(&req.params, "newPassword");

    let mut errors = Vec::new();
    check_identity(name.as_deref(), &email, dob.as_deref(), &mut errors);
    if !new_password.is_empty() {
        let stored: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?",
                [&user.user_id],
                |r| r.get(0),
            )
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if !auth::verify_password(raw_str(&req.params, "currentPassword"), &stored) {
            errors.push("Current password is incorrect");
        }
        if let Some(msg) =
            auth::check_new_password(new_password, raw_str(&req.params, "confirmPassword"))
        {
            errors.push(msg);
        }
    }
    let (Some(name), Some(dob), true) = (name, dob, errors.is_empty()) else {
        return Err(rejected("profile update rejected", errors));
    };
    let dob = canonical_dob(dob);

    if email_owner(conn, &email)?.is_some_and(|owner| owner != user.user_id) {
        return Err(HandlerErr::new(
            "conflict",
            "An account with this email already exists",
        ));
    }

    let new_hash = if new_password.is_empty() {
        None
    } else {
        Some(
            auth::hash_password(new_password)
                .map_err(|e| HandlerErr::db("db_update_failed", e))?,
        )
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE users SET name = ?, email = ?, dob = ? WHERE id = ?",
        params![name, email, dob, user.user_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if let Some(hash) = new_hash {
        tx.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            params![hash, user.user_id],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "user": user_json(conn, &user.user_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.register" => auth_register(state, req),
        "auth.login" => auth_login(state, req),
        "auth.logout" => auth_logout(state, req),
        "auth.forgotPassword" => auth_forgot_password(state, req),
        "auth.resetPassword" => auth_reset_password(state, req),
        "profile.get" => profile_get(state, req),
        "profile.update" => profile_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
