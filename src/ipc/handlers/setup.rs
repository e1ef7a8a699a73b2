use crate::alloc::DifficultyPolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats::GameRules;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Planner,
    Gamification,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "gamification" => Some(Self::Gamification),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Planner => "setup.planner",
            Self::Gamification => "setup.gamification",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Planner => json!({
            "difficultyPolicy": "reject",
            "recentPlansLimit": 3
        }),
        SetupSection::Gamification => json!({
            "hoursPerLevel": 10,
            "pointsPerHour": 10,
            "topicsPerLevel": 10
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Planner => match k.as_str() {
                "difficultyPolicy" => {
                    let policy = v
                        .as_str()
                        .and_then(DifficultyPolicy::parse)
                        .ok_or_else(|| "difficultyPolicy must be one of: reject, fallback".to_string())?;
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "recentPlansLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown planner field: {}", k)),
            },
            SetupSection::Gamification => match k.as_str() {
                "hoursPerLevel" | "topicsPerLevel" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "pointsPerHour" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                _ => return Err(format!("unknown gamification field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

#[derive(Clone, Debug)]
pub(crate) struct PlannerSetup {
    pub difficulty_policy: DifficultyPolicy,
    pub recent_plans_limit: i64,
}

pub(crate) fn load_planner_setup(conn: &Connection) -> PlannerSetup {
    let obj = load_section(conn, SetupSection::Planner).unwrap_or_else(|e| {
        tracing::warn!("planner setup unreadable, using defaults: {e}");
        default_section(SetupSection::Planner)
    });
    PlannerSetup {
        difficulty_policy: obj
            .get("difficultyPolicy")
            .and_then(|v| v.as_str())
            .and_then(DifficultyPolicy::parse)
            .unwrap_or_default(),
        recent_plans_limit: obj
            .get("recentPlansLimit")
            .and_then(|v| v.as_i64())
            .filter(|v| *v > 0)
            .unwrap_or(3),
    }
}

pub(crate) fn load_game_rules(conn: &Connection) -> GameRules {
    let obj = load_section(conn, SetupSection::Gamification).unwrap_or_else(|e| {
        tracing::warn!("gamification setup unreadable, using defaults: {e}");
        default_section(SetupSection::Gamification)
    });
    let defaults = GameRules::default();
    GameRules {
        hours_per_level: obj
            .get("hoursPerLevel")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.hours_per_level),
        points_per_hour: obj
            .get("pointsPerHour")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.points_per_hour),
        topics_per_level: obj
            .get("topicsPerLevel")
            .and_then(|v| v.as_i64())
            .unwrap_or(defaults.topics_per_level),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let planner = match load_section(conn, SetupSection::Planner) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let gamification = match load_section(conn, SetupSection::Gamification) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "planner": planner,
            "gamification": gamification
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    let mut result = Map::new();
    result.insert("ok".to_string(), Value::Bool(true));
    result.insert(section_raw.to_string(), current);
    ok(&req.id, Value::Object(result))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
