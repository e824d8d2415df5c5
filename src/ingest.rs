//! File ingestion: uploaded bytes to named tables.
//!
//! Turns each uploaded file into one [`Table`] named after the file stem,
//! and derives the session id from the content of every file.
//!
//! # Formats
//!
//! | Extension | Decoder |
//! |-----------|---------|
//! | `csv`, `tsv`, `dsv`, `txt` | delimited text; the delimiter is sniffed from `, ; \t \| :` (fallback `;`) |
//! | `json` | an array of objects (one row each) or an object of equal-length column arrays |
//! | `jsonl` | one JSON object per line |
//!
//! Delimited cells go through [`Value::infer`]. JSON scalars keep their
//! JSON type; nested arrays and objects are stored as their JSON text.
//!
//! Text is decoded as UTF-8 (BOM stripped), falling back to Latin-1.

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use tablegraph_core::fingerprint::Fingerprint;
use tablegraph_core::{ErrorKind, Table, TableError, TableSet, Value};

use crate::config::IngestConfig;

const SNIFF_CANDIDATES: [u8; 5] = [b',', b';', b'\t', b'|', b':'];
const SNIFF_FALLBACK: u8 = b';';
const SNIFF_SAMPLE_BYTES: usize = 20_000;
const SNIFF_SAMPLE_LINES: usize = 20;
const MAX_FILENAME_LEN: usize = 255;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no files provided")]
    NoFiles,

    #[error("invalid file format for {filename}; expected one of: {}", .expected.join(", "))]
    UnsupportedFormat {
        filename: String,
        expected: Vec<String>,
    },

    #[error("file {filename} is too large ({size} bytes); maximum size: {max} bytes")]
    FileTooLarge { filename: String, size: u64, max: u64 },

    #[error("failed to parse {filename}: {reason}")]
    Parse { filename: String, reason: String },

    #[error("file {0} contains no columns")]
    NoColumns(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::NoFiles | IngestError::NoColumns(_) => ErrorKind::EmptyInput,
            IngestError::UnsupportedFormat { .. }
            | IngestError::FileTooLarge { .. }
            | IngestError::Parse { .. }
            | IngestError::Table(_) => ErrorKind::InvalidFormat,
            IngestError::Io { .. } => ErrorKind::NotFound,
        }
    }

    fn parse(filename: &str, reason: impl std::fmt::Display) -> Self {
        IngestError::Parse {
            filename: filename.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Raw file as received from a client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, content })
    }
}

/// Result of [`ingest_files`].
#[derive(Debug, Clone)]
pub struct IngestedFiles {
    pub session_id: String,
    pub tables: TableSet,
}

/// Supported upload formats and limits.
#[derive(Debug, Clone, Serialize)]
pub struct FormatsInfo {
    pub supported_formats: Vec<String>,
    pub max_file_size_bytes: u64,
    pub max_file_size_mb: f64,
    pub examples: IndexMap<String, String>,
}

pub fn supported_formats(cfg: &IngestConfig) -> FormatsInfo {
    let describe = |ext: &str| match ext {
        "csv" => "Comma-separated values",
        "tsv" => "Tab-separated values",
        "dsv" | "txt" => "Delimiter-separated values, delimiter detected automatically",
        "json" => "JSON array of objects, or object of column arrays",
        "jsonl" => "JSON Lines, one object per line",
        _ => "Unsupported by the built-in decoders",
    };
    FormatsInfo {
        supported_formats: cfg.allowed_extensions.clone(),
        max_file_size_bytes: cfg.max_upload_bytes,
        max_file_size_mb: cfg.max_upload_bytes as f64 / (1024.0 * 1024.0),
        examples: cfg
            .allowed_extensions
            .iter()
            .map(|e| (e.clone(), describe(e).to_string()))
            .collect(),
    }
}

/// Validate, decode, and fingerprint a batch of uploaded files.
///
/// The session id covers every file's (sanitised) name and bytes in upload
/// order, so identical uploads always map to the same session.
pub fn ingest_files(files: &[UploadedFile], cfg: &IngestConfig) -> Result<IngestedFiles, IngestError> {
    if files.is_empty() {
        return Err(IngestError::NoFiles);
    }

    let mut sanitized = Vec::with_capacity(files.len());
    for file in files {
        let name = sanitize_filename(&file.name);
        if name != file.name {
            tracing::warn!(original = %file.name, sanitized = %name, "filename sanitized");
        }
        check_file(&name, file.content.len() as u64, cfg)?;
        sanitized.push(UploadedFile {
            name,
            content: file.content.clone(),
        });
    }

    let mut tables = TableSet::new();
    for file in &sanitized {
        let table_name = unique_name(&tables, &file_stem(&file.name));
        let table = decode_file(&table_name, file)?;
        tracing::info!(
            file = %file.name,
            table = %table_name,
            rows = table.row_count(),
            columns = table.columns().len(),
            "file decoded"
        );
        tables.insert(table_name, table);
    }

    Ok(IngestedFiles {
        session_id: session_id_for_files(&sanitized),
        tables,
    })
}

pub fn session_id_for_files(files: &[UploadedFile]) -> String {
    files
        .iter()
        .fold(Fingerprint::new().text("files"), |fp, f| {
            fp.text(&f.name).bytes(&f.content)
        })
        .finish()
}

/// Extension and size checks against the configured limits.
pub fn check_file(name: &str, size: u64, cfg: &IngestConfig) -> Result<(), IngestError> {
    let allowed = extension(name)
        .map(|ext| cfg.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false);
    if !allowed {
        return Err(IngestError::UnsupportedFormat {
            filename: name.to_string(),
            expected: cfg.allowed_extensions.clone(),
        });
    }
    if size > cfg.max_upload_bytes {
        return Err(IngestError::FileTooLarge {
            filename: name.to_string(),
            size,
            max: cfg.max_upload_bytes,
        });
    }
    Ok(())
}

/// Lowercased extension, if any.
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn file_stem(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn unique_name(tables: &TableSet, base: &str) -> String {
    if !tables.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !tables.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Strip directory components, control characters and characters that are
/// unsafe in file names; cap the length while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let mut cleaned: String = base
        .chars()
        .filter(|c| (*c as u32) >= 32 && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();

    if cleaned.chars().count() > MAX_FILENAME_LEN {
        cleaned = match cleaned.rsplit_once('.') {
            Some((stem, ext)) => {
                let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count() + 1);
                format!("{}.{}", stem.chars().take(keep).collect::<String>(), ext)
            }
            None => cleaned.chars().take(MAX_FILENAME_LEN).collect(),
        };
    }

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return "unnamed".to_string();
    }
    cleaned
}

/// Decode one file into a table named `table_name`.
pub fn decode_file(table_name: &str, file: &UploadedFile) -> Result<Table, IngestError> {
    let text = decode_text(&file.content);
    match extension(&file.name).as_deref() {
        Some("json") => parse_json(table_name, &file.name, &text),
        Some("jsonl") => parse_json_lines(table_name, &file.name, &text),
        Some("csv") | Some("tsv") | Some("dsv") | Some("txt") => {
            let sample_end = text
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| i >= SNIFF_SAMPLE_BYTES)
                .unwrap_or(text.len());
            let delimiter = detect_delimiter(&text[..sample_end]);
            parse_delimited(table_name, &file.name, &text, delimiter)
        }
        _ => Err(IngestError::UnsupportedFormat {
            filename: file.name.clone(),
            expected: vec![
                "csv".into(),
                "tsv".into(),
                "dsv".into(),
                "txt".into(),
                "json".into(),
                "jsonl".into(),
            ],
        }),
    }
}

/// UTF-8 with BOM stripped, or Latin-1 when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').unwrap_or(s).to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Pick the candidate delimiter that appears the same non-zero number of
/// times (outside quotes) on every sampled line, preferring the highest
/// count, then candidate order. Falls back to `;`.
pub fn detect_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_SAMPLE_LINES)
        .collect();
    if lines.is_empty() {
        return SNIFF_FALLBACK;
    }

    let mut best: Option<(u8, usize)> = None;
    for &candidate in &SNIFF_CANDIDATES {
        let counts: Vec<usize> = lines.iter().map(|l| count_unquoted(l, candidate)).collect();
        let first = counts[0];
        if first == 0 || counts.iter().any(|&c| c != first) {
            continue;
        }
        if best.map(|(_, n)| first > n).unwrap_or(true) {
            best = Some((candidate, first));
        }
    }
    best.map(|(d, _)| d).unwrap_or(SNIFF_FALLBACK)
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

pub fn parse_delimited(
    table_name: &str,
    filename: &str,
    text: &str,
    delimiter: u8,
) -> Result<Table, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| IngestError::parse(filename, e))?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::NoColumns(filename.to_string()));
    }
    let columns = dedupe_headers(headers);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::parse(filename, e))?;
        rows.push(record.iter().map(Value::infer).collect());
    }

    Ok(Table::new(table_name, columns, rows)?)
}

/// Name blank headers `column_<n>` and suffix repeats with `.1`, `.2`, ...
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(headers.len());
    for (i, h) in headers.into_iter().enumerate() {
        let base = if h.is_empty() {
            format!("column_{}", i + 1)
        } else {
            h
        };
        let mut name = base.clone();
        let mut n = 1;
        while out.contains(&name) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        out.push(name);
    }
    out
}

pub fn parse_json(table_name: &str, filename: &str, text: &str) -> Result<Table, IngestError> {
    let doc: serde_json::Value =
        serde_json::from_str(text).map_err(|e| IngestError::parse(filename, e))?;
    match doc {
        serde_json::Value::Array(items) => records_to_table(table_name, filename, items),
        serde_json::Value::Object(map) => columns_to_table(table_name, filename, map),
        _ => Err(IngestError::parse(
            filename,
            "expected an array of objects or an object of column arrays",
        )),
    }
}

pub fn parse_json_lines(table_name: &str, filename: &str, text: &str) -> Result<Table, IngestError> {
    let mut items = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(line)
            .map_err(|e| IngestError::parse(filename, format!("line {}: {}", i + 1, e)))?;
        items.push(item);
    }
    records_to_table(table_name, filename, items)
}

fn records_to_table(
    table_name: &str,
    filename: &str,
    items: Vec<serde_json::Value>,
) -> Result<Table, IngestError> {
    let mut objects = Vec::with_capacity(items.len());
    let mut columns: Vec<String> = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(obj) = item else {
            return Err(IngestError::parse(filename, format!("record {} is not an object", i)));
        };
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(obj);
    }
    if columns.is_empty() {
        return Err(IngestError::NoColumns(filename.to_string()));
    }

    let rows = objects
        .iter()
        .map(|obj| {
            columns
                .iter()
                .map(|c| obj.get(c).map(json_scalar).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(Table::new(table_name, columns, rows)?)
}

fn columns_to_table(
    table_name: &str,
    filename: &str,
    map: serde_json::Map<String, serde_json::Value>,
) -> Result<Table, IngestError> {
    if map.is_empty() {
        return Err(IngestError::NoColumns(filename.to_string()));
    }
    let mut columns = Vec::with_capacity(map.len());
    let mut data: Vec<Vec<serde_json::Value>> = Vec::with_capacity(map.len());
    for (name, values) in map {
        let serde_json::Value::Array(values) = values else {
            return Err(IngestError::parse(
                filename,
                format!("column '{}' is not an array", name),
            ));
        };
        columns.push(name);
        data.push(values);
    }
    let height = data[0].len();
    if let Some(pos) = data.iter().position(|col| col.len() != height) {
        return Err(IngestError::parse(
            filename,
            format!("column '{}' has a different length", columns[pos]),
        ));
    }
    let rows = (0..height)
        .map(|r| data.iter().map(|col| json_scalar(&col[r])).collect())
        .collect();
    Ok(Table::new(table_name, columns, rows)?)
}

fn json_scalar(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        nested => Value::Text(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> IngestConfig {
        IngestConfig::default()
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(detect_delimiter("a;b\n1;2\n"), b';');
        assert_eq!(detect_delimiter("a\tb\n1\t2\n"), b'\t');
        assert_eq!(detect_delimiter("a|b\n\"x|y\"|2\n"), b'|');
        // No consistent candidate.
        assert_eq!(detect_delimiter("single\nvalue\n"), b';');
        // Commas inside quotes do not count.
        assert_eq!(detect_delimiter("name;note\nJohn;\"a, b\"\n"), b';');
    }

    #[test]
    fn test_decode_semicolon_csv_with_inference() {
        let file = UploadedFile::new("people.csv", "id;name;age;active\n1;John;30.5;true\n2;Jane;;false\n");
        let out = ingest_files(&[file], &cfg()).unwrap();
        let t = &out.tables["people"];
        assert_eq!(t.columns(), &["id", "name", "age", "active"].map(String::from));
        assert_eq!(
            t.rows()[0],
            vec![Value::Int(1), "John".into(), Value::Float(30.5), Value::Bool(true)]
        );
        assert_eq!(t.rows()[1][2], Value::Null);
    }

    #[test]
    fn test_decode_json_shapes() {
        let records = UploadedFile::new("r.json", r#"[{"a": 1, "b": "x"}, {"a": 2, "c": [1]}]"#);
        let t = decode_file("r", &records).unwrap();
        assert_eq!(t.columns(), &["a", "b", "c"].map(String::from));
        assert_eq!(t.rows()[1], vec![Value::Int(2), Value::Null, Value::from("[1]")]);

        let columns = UploadedFile::new("c.json", r#"{"a": [1, 2], "b": [true, null]}"#);
        let t = decode_file("c", &columns).unwrap();
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.rows()[0], vec![Value::Int(1), Value::Bool(true)]);

        let lines = UploadedFile::new("l.jsonl", "{\"a\": 1.5}\n\n{\"a\": 2}\n");
        let t = decode_file("l", &lines).unwrap();
        assert_eq!(t.rows(), &[vec![Value::Float(1.5)], vec![Value::Int(2)]]);
    }

    #[test]
    fn test_session_id_is_content_derived() {
        let a = UploadedFile::new("a.csv", "x\n1\n");
        let b = UploadedFile::new("b.csv", "y\n2\n");
        let first = ingest_files(&[a.clone(), b.clone()], &cfg()).unwrap();
        let again = ingest_files(&[a.clone(), b.clone()], &cfg()).unwrap();
        assert_eq!(first.session_id, again.session_id);
        assert_eq!(first.tables.keys().collect::<Vec<_>>(), vec!["a", "b"]);

        let changed = ingest_files(&[a, UploadedFile::new("b.csv", "y\n3\n")], &cfg()).unwrap();
        assert_ne!(first.session_id, changed.session_id);
    }

    #[test]
    fn test_limits() {
        let mut small = cfg();
        small.max_upload_bytes = 4;
        let err = ingest_files(&[UploadedFile::new("a.csv", "x\n123\n")], &small).unwrap_err();
        assert!(matches!(err, IngestError::FileTooLarge { size: 6, max: 4, .. }));

        let err = ingest_files(&[UploadedFile::new("a.exe", "x")], &cfg()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);

        assert!(matches!(ingest_files(&[], &cfg()), Err(IngestError::NoFiles)));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("file\u{0}name.txt"), "filename.txt");
        assert_eq!(sanitize_filename("C:\\data\\a<b>.csv"), "ab.csv");
        assert_eq!(sanitize_filename(".."), "unnamed");
        let long = format!("{}.csv", "x".repeat(300));
        let s = sanitize_filename(&long);
        assert_eq!(s.len(), 255);
        assert!(s.ends_with(".csv"));
    }

    #[test]
    fn test_duplicate_stems_and_headers() {
        let out = ingest_files(
            &[
                UploadedFile::new("data.csv", "a,a,\n1,2,3\n"),
                UploadedFile::new("data.tsv", "b\n1\n"),
            ],
            &cfg(),
        )
        .unwrap();
        assert_eq!(out.tables.keys().collect::<Vec<_>>(), vec!["data", "data_2"]);
        assert_eq!(
            out.tables["data"].columns(),
            &["a", "a.1", "column_3"].map(String::from)
        );
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = vec![b'n', b'\n', 0xE9, b'\n'];
        assert_eq!(decode_text(&bytes), "n\n\u{e9}\n");
    }
}
