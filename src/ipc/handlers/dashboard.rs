use crate::ipc::handlers::plans::plan_summaries;
use crate::ipc::handlers::setup::{load_game_rules, load_planner_setup};
use crate::ipc::helpers::{db_conn, require_user, respond, today_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, HourGame};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Allocated hours across every plan the user owns: `(completed, total)`.
pub(crate) fn user_hours(conn: &Connection, user_id: &str) -> Result<(f64, f64), HandlerErr> {
    conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN d.is_completed = 1 THEN d.hours_allocated ELSE 0 END), 0),
            COALESCE(SUM(d.hours_allocated), 0)
         FROM plan_details d JOIN study_plans p ON p.id = d.plan_id
         WHERE p.user_id = ?",
        [user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Distinct calendar days on which the user completed at least one topic.
pub(crate) fn completion_days(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<NaiveDate>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT substr(d.completed_at, 1, 10)
             FROM plan_details d JOIN study_plans p ON p.id = d.plan_id
             WHERE p.user_id = ? AND d.is_completed = 1 AND d.completed_at IS NOT NULL
             ORDER BY 1",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let days = stmt
        .query_map([user_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(days
        .iter()
        .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .collect())
}

pub(crate) fn hour_game_for(
    conn: &Connection,
    user_id: &str,
    today: NaiveDate,
) -> Result<HourGame, HandlerErr> {
    let rules = load_game_rules(conn);
    let (completed_hours, _) = user_hours(conn, user_id)?;
    let streak = stats::current_streak(&completion_days(conn, user_id)?, today);
    Ok(stats::hour_game(completed_hours, &rules, streak))
}

fn dashboard_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let today = today_param(&req.params)?;
    let setup = load_planner_setup(conn);

    let recent_plans = plan_summaries(conn, &user.user_id, Some(setup.recent_plans_limit))?;
    let (completed_hours, total_hours) = user_hours(conn, &user.user_id)?;
    let game = hour_game_for(conn, &user.user_id, today)?;

    Ok(json!({
        "user": { "id": user.user_id, "name": user.name, "email": user.email },
        "recentPlans": recent_plans,
        "completedHours": completed_hours,
        "totalHours": total_hours,
        "completionPercentage": stats::completion_percentage(completed_hours, total_hours),
        "game": game,
        "quote": stats::quote_of_the_day(today)
    }))
}

fn history_achievements(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let today = today_param(&req.params)?;
    let rules = load_game_rules(conn);

    let (total_plans, total_topics, completed_topics, first, last): (
        i64,
        i64,
        i64,
        Option<String>,
        Option<String>,
    ) = conn
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM study_plans WHERE user_id = ?1),
                COUNT(d.id),
                COALESCE(SUM(CASE WHEN d.is_completed = 1 THEN 1 ELSE 0 END), 0),
                MIN(CASE WHEN d.is_completed = 1 THEN d.completed_at END),
                MAX(CASE WHEN d.is_completed = 1 THEN d.completed_at END)
             FROM plan_details d JOIN study_plans p ON p.id = d.plan_id
             WHERE p.user_id = ?1",
            [&user.user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let days = completion_days(conn, &user.user_id)?;
    let level = stats::topic_level(completed_topics, &rules);

    Ok(json!({
        "totalPlans": total_plans,
        "totalTopics": total_topics,
        "totalCompletedTopics": completed_topics,
        "firstCompletion": first,
        "lastCompletion": last,
        "currentStreak": stats::current_streak(&days, today),
        "longestStreak": stats::longest_streak(&days),
        "level": level.level,
        "levelProgress": level.level_progress,
        "topicsPerLevel": rules.topics_per_level
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.open" => Some(respond(req, dashboard_open(state, req))),
        "history.achievements" => Some(respond(req, history_achievements(state, req))),
        _ => None,
    }
}
