use crate::tables::TABLE_FILES;
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const ARCHIVE_FORMAT_V1: &str = "flockport-archive-v1";

/// Archive contents in memory: CSV tables by file name plus loose binary
/// attachments (photos) by file name.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    tables: BTreeMap<String, String>,
    attachments: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub format: String,
    pub entry_count: usize,
    pub fingerprint: String,
}

impl Archive {
    pub fn table(&self, name: &str) -> Option<&str> {
        self.tables.get(name).map(String::as_str)
    }

    pub fn insert_table(&mut self, name: &str, text: String) {
        self.tables.insert(name.to_string(), text);
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Look up an attachment by name; a path-qualified name also matches by
    /// its file name.
    pub fn attachment(&self, name: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.attachments.get(name) {
            return Some(bytes);
        }
        let base = file_name(name);
        self.attachments.get(base).map(Vec::as_slice)
    }

    pub fn insert_attachment(&mut self, name: &str, bytes: Vec<u8>) {
        self.attachments.insert(name.to_string(), bytes);
    }

    pub fn attachment_names(&self) -> Vec<&str> {
        self.attachments.keys().map(String::as_str).collect()
    }

    /// SHA-256 over the tables in name order. Attachments are excluded so a
    /// re-export with the same data keeps its fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, text) in &self.tables {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(text.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn canonical_table_name(name: &str) -> Option<&'static str> {
    TABLE_FILES
        .iter()
        .copied()
        .find(|t| t.eq_ignore_ascii_case(name))
}

pub fn write_archive(archive: &Archive, out_path: &Path) -> anyhow::Result<WriteSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let fingerprint = archive.fingerprint();
    let manifest = json!({
        "format": ARCHIVE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "tables": archive.table_names(),
        "attachments": archive.attachment_names(),
        "fingerprint": fingerprint,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for (name, text) in &archive.tables {
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start table entry {name}"))?;
        zip.write_all(text.as_bytes())
            .with_context(|| format!("failed to write table entry {name}"))?;
    }
    // Photos are already compressed.
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in &archive.attachments {
        zip.start_file(name.as_str(), stored)
            .with_context(|| format!("failed to start attachment entry {name}"))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write attachment entry {name}"))?;
    }

    zip.finish().context("failed to finalize zip archive")?;

    Ok(WriteSummary {
        format: ARCHIVE_FORMAT_V1.to_string(),
        entry_count: 1 + archive.tables.len() + archive.attachments.len(),
        fingerprint,
    })
}

pub fn read_archive(in_path: &Path) -> anyhow::Result<Archive> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a zip archive: {}",
            in_path.to_string_lossy()
        ));
    }
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open archive {}", in_path.to_string_lossy()))?;
    let mut zip = ZipArchive::new(in_file).context("invalid zip archive")?;

    // Hand-built CSV zips have no manifest; accept them as-is.
    if let Ok(mut entry) = zip.by_name(MANIFEST_ENTRY) {
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .context("failed to read manifest.json")?;
        let manifest: serde_json::Value =
            serde_json::from_str(&text).context("manifest.json is invalid JSON")?;
        let format = manifest
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if format != ARCHIVE_FORMAT_V1 {
            return Err(anyhow!("unsupported archive format: {}", format));
        }
    }

    let mut archive = Archive::default();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .with_context(|| format!("failed to read archive entry {i}"))?;
        if entry.is_dir() {
            continue;
        }
        let full_name = entry.name().to_string();
        let name = file_name(&full_name).to_string();
        if name.is_empty() || name == MANIFEST_ENTRY {
            continue;
        }
        if name.to_ascii_lowercase().ends_with(".csv") {
            let Some(table) = canonical_table_name(&name) else {
                log::warn!("ignoring unknown table {full_name} in archive");
                continue;
            };
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("failed to read table {full_name}"))?;
            archive.insert_table(table, String::from_utf8_lossy(&bytes).into_owned());
        } else {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("failed to read attachment {full_name}"))?;
            archive.insert_attachment(&name, bytes);
        }
    }
    Ok(archive)
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
