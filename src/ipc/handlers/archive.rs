use crate::archive::{read_archive, write_archive};
use crate::error::MigrateError;
use crate::export::export_store;
use crate::import::{commit, parse_archive, validate, CancelToken, Issue};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progress::ProgressTracker;
use crate::store::SqliteStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const ISSUE_LIMIT: usize = 250;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn require_store(state: &AppState) -> Result<Arc<SqliteStore>, HandlerErr> {
    state.store.clone().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    })
}

fn path_param(req: &Request, key: &str) -> Result<PathBuf, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(HandlerErr {
            code: "bad_params",
            message: format!("missing {key}"),
            details: None,
        }),
    }
}

fn issues_json(issues: &[Issue]) -> serde_json::Value {
    let shown: Vec<&Issue> = issues.iter().take(ISSUE_LIMIT).collect();
    json!(shown)
}

fn load_archive(req: &Request) -> Result<(PathBuf, crate::archive::Archive), HandlerErr> {
    let in_path = path_param(req, "inPath")?;
    if !in_path.is_file() {
        return Err(HandlerErr {
            code: "not_found",
            message: "archive file not found".into(),
            details: Some(json!({ "path": in_path.to_string_lossy() })),
        });
    }
    let archive = read_archive(&in_path).map_err(|e| HandlerErr {
        code: "bad_archive",
        message: format!("{e:#}"),
        details: Some(json!({ "path": in_path.to_string_lossy() })),
    })?;
    Ok((in_path, archive))
}

fn export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let out_path = path_param(req, "outPath")?;

    let report = export_store(&*store).map_err(|e| HandlerErr {
        code: e.code(),
        message: e.to_string(),
        details: None,
    })?;
    let summary = write_archive(&report.archive, &out_path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": out_path.to_string_lossy() })),
    })?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "format": summary.format,
        "entryCount": summary.entry_count,
        "fingerprint": summary.fingerprint,
        "rows": report.rows,
        "fetched": report.fetched,
        "attachmentCount": report.archive.attachment_names().len(),
        "warningsCount": report.issues.len(),
        "warnings": issues_json(&report.issues),
    }))
}

fn preview(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (in_path, archive) = load_archive(req)?;
    let ctx = parse_archive(&archive);
    let mut blocking: Vec<Issue> = ctx.errors().cloned().collect();
    let mut warnings: Vec<Issue> = ctx.warnings().cloned().collect();
    for issue in validate(&ctx) {
        if issue.is_error() {
            blocking.push(issue);
        } else {
            warnings.push(issue);
        }
    }

    Ok(json!({
        "path": in_path.to_string_lossy(),
        "fingerprint": ctx.fingerprint,
        "counts": ctx.counts(),
        "photoCount": ctx.photos.len(),
        "warningsCount": warnings.len(),
        "warnings": issues_json(&warnings),
        "errorsCount": blocking.len(),
        "errors": issues_json(&blocking),
        "canImport": blocking.is_empty(),
    }))
}

fn import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let (in_path, archive) = load_archive(req)?;
    let cfg = state.config.clone().apply_params(&req.params);

    let ctx = parse_archive(&archive);
    let progress = ProgressTracker::for_import();
    state.progress = progress.clone();

    log::info!(
        "importing {} (concurrency {}, validate {})",
        in_path.to_string_lossy(),
        cfg.max_concurrency,
        cfg.validate_before_commit
    );
    let report = commit(&ctx, &*store, &cfg, &progress, &CancelToken::new()).map_err(
        |e| {
            let mut details = json!({ "steps": progress.snapshot() });
            match &e {
                MigrateError::StepFailed {
                    step, completed, ..
                } => {
                    details["failedStep"] = json!(step);
                    details["completedSteps"] = json!(completed);
                }
                MigrateError::Cancelled { next, completed } => {
                    details["nextStep"] = json!(next);
                    details["completedSteps"] = json!(completed);
                }
                MigrateError::Validation(issues) => {
                    details["errorsCount"] = json!(issues.len());
                    details["errors"] = issues_json(issues);
                }
                MigrateError::AlreadyImported { fingerprint } => {
                    details["fingerprint"] = json!(fingerprint);
                }
                _ => {}
            }
            HandlerErr {
                code: e.code(),
                message: e.to_string(),
                details: Some(details),
            }
        },
    )?;

    let mut warnings: Vec<Issue> = ctx.warnings().cloned().collect();
    warnings.extend(report.warnings);
    Ok(json!({
        "path": in_path.to_string_lossy(),
        "fingerprint": ctx.fingerprint,
        "steps": progress.snapshot(),
        "created": report.created,
        "photosSaved": report.photos_saved,
        "warningsCount": warnings.len(),
        "warnings": issues_json(&warnings),
    }))
}

fn handle_archive_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    match export(state, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_archive_preview(_state: &mut AppState, req: &Request) -> serde_json::Value {
    match preview(req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_archive_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    match import(state, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_import_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "steps": state.progress.snapshot(),
            "statuses": state.progress.get_all(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "archive.export" => Some(handle_archive_export(state, req)),
        "archive.preview" => Some(handle_archive_preview(state, req)),
        "archive.import" => Some(handle_archive_import(state, req)),
        "import.status" => Some(handle_import_status(state, req)),
        _ => None,
    }
}
