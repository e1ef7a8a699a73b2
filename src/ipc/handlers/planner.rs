use crate::alloc::{self, Allocation, DifficultyPolicy, PlanRequest};
use crate::db;
use crate::ipc::handlers::setup::load_planner_setup;
use crate::ipc::helpers::{db_conn, require_user, required_str, respond, today_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::params;
use serde_json::{json, Value};
use uuid::Uuid;

fn configured_policy(state: &AppState) -> DifficultyPolicy {
    state
        .db
        .as_ref()
        .map(|conn| load_planner_setup(conn).difficulty_policy)
        .unwrap_or_default()
}

fn build_allocation(state: &AppState, req: &Request) -> Result<Allocation, HandlerErr> {
    let today = today_param(&req.params)?;
    let request = PlanRequest::from_json(&req.params, configured_policy(state))?;
    tracing::debug!(
        subjects = request.subjects().len(),
        hours = request.total_hours(),
        "plan request accepted"
    );
    Ok(alloc::allocate(&request, today)?)
}

/// Preview needs no account or workspace; the workspace only supplies the
/// difficulty policy when one is open.
fn planner_preview(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let allocation = build_allocation(state, req)?;
    let rows: Vec<Value> = allocation
        .rows
        .iter()
        .map(|r| {
            json!({
                "subject": r.subject,
                "topic": r.topic,
                "examDate": r.exam_date,
                "daysLeft": r.days_left,
                "difficulty": r.difficulty,
                "allocatedHours": r.allocated_hours,
                "timeLabel": alloc::format_study_time(r.allocated_hours)
            })
        })
        .collect();
    Ok(json!({
        "totalHours": allocation.total_hours,
        "subjects": allocation.subjects,
        "rows": rows
    }))
}

fn plans_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plan_name = required_str(&req.params, "planName")?;
    let allocation = build_allocation(state, req)?;

    let plan_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute(
        "INSERT INTO study_plans(id, user_id, plan_name, total_hours, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![plan_id, user.user_id, plan_name, allocation.total_hours, now],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let mut subject_ids: Vec<String> = Vec::with_capacity(allocation.subjects.len());
    for (i, s) in allocation.subjects.iter().enumerate() {
        let subject_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO plan_subjects(id, plan_id, sort_order, name, exam_date, difficulty, hours_allocated)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![
                subject_id,
                plan_id,
                i as i64,
                s.name,
                s.exam_date.format("%Y-%m-%d").to_string(),
                s.difficulty,
                alloc::round_hours(s.hours)
            ],
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        subject_ids.push(subject_id);
    }

    for (i, r) in allocation.rows.iter().enumerate() {
        let Some(subject_id) = subject_ids.get(r.subject_index) else {
            return Err(HandlerErr::new("db_insert_failed", "topic without subject"));
        };
        tx.execute(
            "INSERT INTO plan_details(
                id, plan_id, subject_id, sort_order, subject, subtopic, exam_date,
                difficulty, hours_allocated, is_completed, completed_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL)",
            params![
                Uuid::new_v4().to_string(),
                plan_id,
                subject_id,
                i as i64,
                r.subject,
                r.topic,
                r.exam_date.format("%Y-%m-%d").to_string(),
                r.difficulty,
                alloc::round_hours(r.allocated_hours)
            ],
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }

    tx.execute(
        "INSERT INTO progress(plan_id, user_id, total_subtopics, completed_subtopics, last_updated)
         VALUES(?, ?, ?, 0, ?)",
        params![plan_id, user.user_id, allocation.rows.len() as i64, now],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(
        plan = %plan_id,
        user = %user.user_id,
        subjects = allocation.subjects.len(),
        topics = allocation.rows.len(),
        "plan created"
    );

    Ok(json!({
        "planId": plan_id,
        "planName": plan_name,
        "totalHours": allocation.total_hours,
        "subjectCount": allocation.subjects.len(),
        "topicCount": allocation.rows.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "planner.preview" => Some(respond(req, planner_preview(state, req))),
        "plans.create" => Some(respond(req, plans_create(state, req))),
        _ => None,
    }
}
