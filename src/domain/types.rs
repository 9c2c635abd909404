use serde::Serialize;
use std::fmt;
use std::path::Path;

pub const HEAP_DUMP_EXTENSION: &str = "hprof";

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecordStat {
    pub tag: u8,
    pub name: &'static str,
    pub count: u64,
    pub bytes: u64,
}

/// Plain-data view of a loaded heap graph, safe to hand to the renderer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GraphSummary {
    pub file_size_bytes: u64,
    pub version: String,
    pub identifier_size: u32,
    pub timestamp_ms: u64,
    pub record_count: u64,
    pub string_count: usize,
    pub class_count: usize,
    pub heap_dump_bytes: u64,
    pub records: Vec<RecordStat>,
}

pub fn is_heap_dump_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(HEAP_DUMP_EXTENSION))
}

pub fn heap_dump_window_title(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    format!("{name} - {}", env!("CARGO_PKG_NAME"))
}
