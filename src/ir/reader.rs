// src/ir/reader.rs
//! Read captured IR records back from disk
//!
//! Accepts NDJSON (plain or gzip), batch JSON files and bare JSON arrays.
//! Decoding is strict: a record whose method falls outside the IR enumeration
//! fails the whole read.

use crate::ir::types::{Batch, IrRecord, IR_VERSION};
use crate::recording::compressor;
use crate::utils::errors::{CaptureError, Result};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Streaming NDJSON reader; blank lines are skipped
pub struct NdjsonReader<R> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl<R: BufRead> NdjsonReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Line number of the last line consumed (1-based)
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for NdjsonReader<R> {
    type Item = Result<IrRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Some(serde_json::from_str(trimmed).map_err(|source| CaptureError::Decode {
                line: self.line,
                source,
            }));
        }
    }
}

/// Open an NDJSON file for streaming, transparently gunzipping it
pub fn open_ndjson(path: impl AsRef<Path>) -> Result<NdjsonReader<Box<dyn BufRead + Send>>> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let gzipped = compressor::is_gzip(reader.fill_buf()?);

    let inner: Box<dyn BufRead + Send> = if gzipped {
        Box::new(BufReader::new(compressor::decoder(reader)))
    } else {
        Box::new(reader)
    };

    Ok(NdjsonReader::new(inner))
}

/// Read every NDJSON record from `reader`
pub fn read_ndjson<R: Read>(reader: R) -> Result<Vec<IrRecord>> {
    NdjsonReader::new(BufReader::new(reader)).collect()
}

/// Read a batch file and check its schema version
pub fn read_batch<R: Read>(reader: R) -> Result<Vec<IrRecord>> {
    let batch: Batch = serde_json::from_reader(reader)?;
    if batch.version != IR_VERSION {
        return Err(CaptureError::UnsupportedVersion {
            found: batch.version,
            expected: IR_VERSION.to_string(),
        });
    }
    Ok(batch.records)
}

/// Detect the encoding of an in-memory capture and decode it
pub fn read_bytes(data: &[u8]) -> Result<Vec<IrRecord>> {
    if compressor::is_gzip(data) {
        return read_bytes(&compressor::decompress(data)?);
    }

    let text = std::str::from_utf8(data).map_err(|_| CaptureError::UnrecognizedFormat)?;
    let trimmed = text.trim_start();

    match trimmed.as_bytes().first() {
        None => Ok(Vec::new()),
        Some(b'[') => Ok(serde_json::from_str(trimmed)?),
        Some(b'{') if is_batch_document(trimmed) => read_batch(trimmed.as_bytes()),
        Some(b'{') => read_ndjson(trimmed.as_bytes()),
        Some(_) => Err(CaptureError::UnrecognizedFormat),
    }
}

/// Top-level keys of a batch envelope; every other key is ignored
#[derive(Deserialize)]
struct BatchKeys {
    version: Option<IgnoredAny>,
    records: Option<IgnoredAny>,
}

/// True when the first JSON value carries both `version` and `records`
fn is_batch_document(text: &str) -> bool {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<BatchKeys>();
    matches!(
        values.next(),
        Some(Ok(BatchKeys {
            version: Some(_),
            records: Some(_),
        }))
    )
}

/// Encoding implied by a file name, ignoring a trailing `.gz`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Ndjson,
    Json,
    Unknown,
}

impl FileKind {
    fn of(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);

        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some("ndjson") | Some("jsonl") => FileKind::Ndjson,
            Some("json") => FileKind::Json,
            _ => FileKind::Unknown,
        }
    }
}

/// Read a capture file; the extension picks the format, content decides otherwise
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<IrRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read(path)?;
    let data = if compressor::is_gzip(&raw) {
        compressor::decompress(&raw)?
    } else {
        raw
    };

    let records = match FileKind::of(path) {
        FileKind::Ndjson => read_ndjson(data.as_slice())?,
        FileKind::Json if data.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[') => {
            serde_json::from_slice(&data)?
        }
        FileKind::Json => read_batch(data.as_slice())?,
        FileKind::Unknown => read_bytes(&data)?,
    };
    debug!("Read {} records from {}", records.len(), path.display());

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{QueryValue, Request, RequestMethod, Response};
    use crate::recording::{CompressionLevel, NdjsonWriter, RecordWriter, SinkFormat};
    use tempfile::tempdir;

    const LINE_A: &str = r#"{"request":{"method":"GET","path":"/a"},"response":{"status":200}}"#;
    const LINE_B: &str = r#"{"request":{"method":"POST","path":"/b","body":{"x":1}},"response":{"status":201}}"#;

    #[test]
    fn test_ndjson_skips_blank_lines() {
        let input = format!("{}\n\n   \n{}\n", LINE_A, LINE_B);
        let records = read_ndjson(input.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].request.method, RequestMethod::Post);
        assert_eq!(records[1].request.body, Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn test_decode_error_reports_line() {
        let input = format!(
            "{}\n{}\n",
            LINE_A, r#"{"request":{"method":"BREW","path":"/"},"response":{"status":418}}"#
        );
        match read_ndjson(input.as_bytes()) {
            Err(CaptureError::Decode { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_detect_formats() {
        let ndjson = format!("{}\n{}\n", LINE_A, LINE_B);
        assert_eq!(read_bytes(ndjson.as_bytes()).unwrap().len(), 2);

        let array = format!("[{},{}]", LINE_A, LINE_B);
        assert_eq!(read_bytes(array.as_bytes()).unwrap().len(), 2);

        let batch = format!(r#"{{"version":"ir.v1","records":[{}]}}"#, LINE_A);
        assert_eq!(read_bytes(batch.as_bytes()).unwrap().len(), 1);

        assert!(read_bytes(b"").unwrap().is_empty());
        assert!(matches!(read_bytes(b"hello"), Err(CaptureError::UnrecognizedFormat)));
    }

    #[test]
    fn test_batch_version_checked() {
        let batch = format!(r#"{{"version":"ir.v0","records":[{}]}}"#, LINE_A);
        assert!(matches!(
            read_batch(batch.as_bytes()),
            Err(CaptureError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_ndjson_with_version_query_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.ndjson");

        let mut query = std::collections::BTreeMap::new();
        query.insert("version".to_string(), QueryValue::Single("2".to_string()));
        let mut request = Request::new(RequestMethod::Get, "/items");
        request.query = Some(query);

        let writer = NdjsonWriter::create(&path).unwrap();
        writer.write(&IrRecord::new(request, Response::new(200))).unwrap();
        writer.close().unwrap();

        let records = read_file(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].request.query.as_ref().unwrap()["version"],
            QueryValue::Single("2".to_string())
        );

        // the same bytes without a telling extension still detect as NDJSON
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_bytes(&bytes).unwrap().len(), 1);
    }

    #[test]
    fn test_extension_selects_format() {
        let dir = tempdir().unwrap();

        let batch_path = dir.path().join("batch.json");
        std::fs::write(&batch_path, format!(r#"{{"version":"ir.v1","records":[{}]}}"#, LINE_A)).unwrap();
        assert_eq!(read_file(&batch_path).unwrap().len(), 1);

        let array_path = dir.path().join("array.json");
        std::fs::write(&array_path, format!("[{},{}]", LINE_A, LINE_B)).unwrap();
        assert_eq!(read_file(&array_path).unwrap().len(), 2);

        assert_eq!(FileKind::of(Path::new("a/b.NDJSON.gz")), FileKind::Ndjson);
        assert_eq!(FileKind::of(Path::new("b.json.gz")), FileKind::Json);
        assert_eq!(FileKind::of(Path::new("capture.gz")), FileKind::Unknown);
        assert_eq!(FileKind::of(Path::new("capture")), FileKind::Unknown);
    }

    #[test]
    fn test_batch_detection_needs_both_keys() {
        assert!(is_batch_document(r#"{"version":"ir.v1","records":[]}"#));
        assert!(is_batch_document("{\n  \"records\": [],\n  \"version\": \"ir.v1\"\n}"));
        assert!(!is_batch_document(LINE_A));
        assert!(!is_batch_document(r#"{"request":{"method":"GET","path":"/","query":{"version":"2"}},"response":{"status":200}}"#));
    }

    #[test]
    fn test_gzip_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.ndjson.gz");

        let writer = NdjsonWriter::create_with(&path, SinkFormat::Gzip(CompressionLevel::FAST)).unwrap();
        for status in [200, 404, 500] {
            let record = IrRecord::new(Request::new(RequestMethod::Get, "/items"), Response::new(status));
            writer.write(&record).unwrap();
        }
        writer.close().unwrap();

        let statuses: Vec<u16> = open_ndjson(&path)
            .unwrap()
            .map(|r| r.unwrap().response.status)
            .collect();
        assert_eq!(statuses, vec![200, 404, 500]);

        assert_eq!(read_file(&path).unwrap().len(), 3);
    }
}
