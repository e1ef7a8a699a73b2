use crate::db;
use crate::ipc::helpers::{db_conn, require_user, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::{json, Value};

fn completed_param(params: &Value) -> Result<bool, HandlerErr> {
    match params.get("completed") {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) if n.as_i64() == Some(0) => Ok(false),
        Some(Value::Number(n)) if n.as_i64() == Some(1) => Ok(true),
        _ => Err(HandlerErr::bad_params("completed must be a boolean")),
    }
}

fn topics_set_completed(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let topic_id = required_str(&req.params, "topicId")?;
    let completed = completed_param(&req.params)?;

    let owner: Option<(String, String)> = conn
        .query_row(
            "SELECT d.plan_id, p.user_id
             FROM plan_details d JOIN study_plans p ON p.id = d.plan_id
             WHERE d.id = ?",
            [&topic_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((plan_id, owner_id)) = owner else {
        return Err(HandlerErr::new("not_found", "topic not found"));
    };
    if owner_id != user.user_id {
        return Err(HandlerErr::new("forbidden", "topic belongs to another user"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // Re-marking a done topic keeps its first completion time.
    tx.execute(
        "UPDATE plan_details
         SET is_completed = ?1,
             completed_at = CASE WHEN ?1 = 1 THEN COALESCE(completed_at, ?2) ELSE NULL END
         WHERE id = ?3",
        params![completed as i64, db::now_ts(), topic_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let (total, done) =
        db::refresh_progress(&tx, &plan_id).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::debug!(topic = %topic_id, plan = %plan_id, completed, "topic toggled");

    Ok(json!({
        "planId": plan_id,
        "topicId": topic_id,
        "completed": completed,
        "totalTopics": total,
        "completedTopics": done
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "topics.setCompleted" => Some(respond(req, topics_set_completed(state, req))),
        _ => None,
    }
}
