use crate::backup;
use crate::db;
use crate::ipc::helpers::{required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn workspace_param(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = required_str(&req.params, "outPath")?;
    let workspace_path = workspace_param(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!("checkpoint before export failed: {e}");
        }
    }

    let out = PathBuf::from(&out_path);
    let export = backup::export_workspace_bundle(&workspace_path, &out).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(path = %out_path, sha256 = %export.db_sha256, "workspace bundle exported");

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

/// Puts the handle dropped for a failed import back on the selected workspace.
fn reopen_previous(state: &mut AppState) {
    let Some(workspace) = state.workspace.clone() else {
        return;
    };
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => tracing::error!(
            workspace = %workspace.to_string_lossy(),
            "failed to reopen workspace after import failure: {e:#}"
        ),
    }
}

fn backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let in_path = required_str(&req.params, "inPath")?;
    let workspace_path = workspace_param(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let imported = backup::import_workspace_bundle(&src, &workspace_path)
        .map_err(|e| {
            HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
        })
        .and_then(|import| {
            db::open_db(&workspace_path)
                .map(|conn| (import, conn))
                .map_err(|e| HandlerErr::db("db_open_failed", e))
        });
    let (import, conn) = match imported {
        Ok(v) => v,
        Err(e) => {
            reopen_previous(state);
            return Err(e);
        }
    };
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);
    tracing::info!(
        path = %in_path,
        format = %import.bundle_format_detected,
        "workspace bundle imported"
    );

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => {
            Some(respond(req, backup_export_workspace_bundle(state, req)))
        }
        "backup.importWorkspaceBundle" => {
            Some(respond(req, backup_import_workspace_bundle(state, req)))
        }
        _ => None,
    }
}
