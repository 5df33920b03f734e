//! Ingestion progress reporting.
//!
//! Reports observable progress during an ingestion run so callers see which
//! phase a document is in and how far embedding has gotten, without the
//! pipeline being coupled to console output. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for one document's ingestion run.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Extracting text from the raw bytes.
    Extracting { document: String },
    /// Sanitizing and chunking the extracted text.
    Chunking { document: String },
    /// Embedding chunks: n outcomes settled out of total.
    Embedding {
        document: String,
        n: u64,
        total: u64,
    },
    /// Writing the chunk batch to the store.
    Storing { document: String, chunks: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or
/// JSON); the pipeline only ever talks to this trait.
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingestion pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest report.pdf  embedding  3 / 12 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Extracting { document } => {
                format!("ingest {}  extracting...\n", document)
            }
            IngestProgressEvent::Chunking { document } => {
                format!("ingest {}  chunking...\n", document)
            }
            IngestProgressEvent::Embedding { document, n, total } => {
                format!(
                    "ingest {}  embedding  {} / {} chunks\n",
                    document,
                    format_number(*n),
                    format_number(*total)
                )
            }
            IngestProgressEvent::Storing { document, chunks } => {
                format!(
                    "ingest {}  storing  {} chunks\n",
                    document,
                    format_number(*chunks)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Extracting { document } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "extracting"
            }),
            IngestProgressEvent::Chunking { document } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "chunking"
            }),
            IngestProgressEvent::Embedding { document, n, total } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Storing { document, chunks } => serde_json::json!({
                "event": "progress",
                "document": document,
                "phase": "storing",
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
