use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/studyplanner.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "studyplanner-workspace-v1";
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.to_string_lossy()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_sha256 = file_sha256(&db_path)?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": crate::db::now_ts(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let zipped = is_zip_file(in_path)?;
    if !zipped && !has_sqlite_header(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle or SQLite database: {}",
            in_path.to_string_lossy()
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let detected = if zipped {
        extract_bundle_db(in_path, &tmp_dst)?;
        BUNDLE_FORMAT_V1
    } else {
        std::fs::copy(in_path, &tmp_dst).with_context(|| {
            format!(
                "failed to copy sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                tmp_dst.to_string_lossy()
            )
        })?;
        "sqlite3"
    };

    let dst = workspace_path.join(DB_FILE);
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move imported database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: detected.to_string(),
    })
}

/// Writes the bundle's database to `tmp_dst` once format, checksum and
/// header all check out. Nothing is left at `tmp_dst` on failure.
fn extract_bundle_db(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<()> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase());

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    let extracted = archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/studyplanner.sqlite3")
        .and_then(|mut entry| {
            std::io::copy(&mut entry, &mut db_out).context("failed to extract database entry")
        })
        .and_then(|_| db_out.flush().context("failed to flush extracted database"));
    drop(db_out);

    let checked = extracted.and_then(|_| {
        if let Some(expected) = expected_sha {
            let actual = file_sha256(tmp_dst)?;
            if actual != expected {
                return Err(anyhow!(
                    "database checksum mismatch: expected {}, got {}",
                    expected,
                    actual
                ));
            }
        }
        if !has_sqlite_header(tmp_dst)? {
            return Err(anyhow!("bundle database entry is not a SQLite database"));
        }
        Ok(())
    });
    if checked.is_err() {
        let _ = std::fs::remove_file(tmp_dst);
    }
    checked
}

fn has_sqlite_header(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut header = [0u8; 16];
    match f.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file header"),
    }
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn tamper_bundle(src: &Path, dst: &Path) {
        let mut archive = ZipArchive::new(File::open(src).expect("open")).expect("zip");
        let mut manifest = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read manifest");
        let mut db_bytes = Vec::new();
        archive
            .by_name(DB_ENTRY)
            .expect("db entry")
            .read_to_end(&mut db_bytes)
            .expect("read db");
        db_bytes.push(0);

        let mut zip = ZipWriter::new(File::create(dst).expect("create"));
        let opts = FileOptions::default();
        zip.start_file(MANIFEST_ENTRY, opts).expect("start");
        zip.write_all(manifest.as_bytes()).expect("write");
        zip.start_file(DB_ENTRY, opts).expect("start");
        zip.write_all(&db_bytes).expect("write");
        zip.finish().expect("finish");
    }

    #[test]
    fn bundle_checksum_is_verified_on_import() {
        let ws = temp_dir("studyplanner-backup-src");
        crate::db::open_db(&ws).expect("open db");
        let bundle = ws.join("out").join("ws.zip");
        let export = export_workspace_bundle(&ws, &bundle).expect("export");
        assert_eq!(export.bundle_format, BUNDLE_FORMAT_V1);
        assert_eq!(export.db_sha256.len(), 64);

        let restored = temp_dir("studyplanner-backup-dst");
        let import = import_workspace_bundle(&bundle, &restored).expect("import");
        assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT_V1);
        assert!(restored.join(DB_FILE).is_file());

        let tampered = ws.join("out").join("tampered.zip");
        tamper_bundle(&bundle, &tampered);
        let other = temp_dir("studyplanner-backup-tampered");
        let e = import_workspace_bundle(&tampered, &other).expect_err("checksum");
        assert!(e.to_string().contains("checksum mismatch"));
        assert!(!other.join(DB_FILE).exists());
    }

    #[test]
    fn foreign_file_never_replaces_workspace_database() {
        let ws = temp_dir("studyplanner-backup-keep");
        {
            let conn = crate::db::open_db(&ws).expect("open db");
            crate::db::settings_set_json(&conn, "marker", &json!("kept")).expect("marker");
        }
        let before = std::fs::read(ws.join(DB_FILE)).expect("read db");

        let notes = ws.join("notes.txt");
        std::fs::write(&notes, "definitely not a database, just some text").expect("write");
        let e = import_workspace_bundle(&notes, &ws).expect_err("text file");
        assert!(e.to_string().contains("not a workspace bundle"), "{e}");

        let short = ws.join("short.bin");
        std::fs::write(&short, b"SQL").expect("write");
        import_workspace_bundle(&short, &ws).expect_err("truncated file");

        assert_eq!(std::fs::read(ws.join(DB_FILE)).expect("read db"), before);
        assert!(!ws.join(format!("{}.importing", DB_FILE)).exists());
    }

    #[test]
    fn bare_sqlite_file_is_imported() {
        let src = temp_dir("studyplanner-backup-bare-src");
        {
            let conn = crate::db::open_db(&src).expect("open db");
            crate::db::settings_set_json(&conn, "marker", &json!("from-bare")).expect("marker");
        }
        let dst = temp_dir("studyplanner-backup-bare-dst");
        crate::db::open_db(&dst).expect("open db");

        let import = import_workspace_bundle(&src.join(DB_FILE), &dst).expect("import");
        assert_eq!(import.bundle_format_detected, "sqlite3");
        let conn = crate::db::open_db(&dst).expect("reopen");
        let marker = crate::db::settings_get_json(&conn, "marker").expect("read marker");
        assert_eq!(marker, Some(json!("from-bare")));
    }
}
