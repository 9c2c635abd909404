use crate::domain::{GraphSummary, RecordStat};
use crate::infra::session::{GraphHandle, HeapDumpParser};
use memmap2::Mmap;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const MAGIC_PREFIX: &[u8] = b"JAVA PROFILE ";
const SUPPORTED_VERSIONS: [&str; 3] = ["1.0.1", "1.0.2", "1.0.3"];
const MAX_MAGIC_LEN: usize = 32;
const RECORD_HEADER_LEN: usize = 9;

const TAG_STRING: u8 = 0x01;
const TAG_LOAD_CLASS: u8 = 0x02;
const TAG_HEAP_DUMP: u8 = 0x0C;
const TAG_HEAP_DUMP_SEGMENT: u8 = 0x1C;

pub fn record_tag_name(tag: u8) -> &'static str {
    match tag {
        0x01 => "STRING",
        0x02 => "LOAD CLASS",
        0x03 => "UNLOAD CLASS",
        0x04 => "STACK FRAME",
        0x05 => "STACK TRACE",
        0x06 => "ALLOC SITES",
        0x07 => "HEAP SUMMARY",
        0x0A => "START THREAD",
        0x0B => "END THREAD",
        0x0C => "HEAP DUMP",
        0x0D => "CPU SAMPLES",
        0x0E => "CONTROL SETTINGS",
        0x1C => "HEAP DUMP SEGMENT",
        0x2C => "HEAP DUMP END",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Error)]
pub enum ParseHeapDumpError {
    #[error("failed to open heap dump: {0}")]
    Open(io::Error),

    #[error("failed to map heap dump: {0}")]
    Map(io::Error),

    #[error("heap dump is empty")]
    Empty,

    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported hprof version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported identifier size: {0}")]
    UnsupportedIdentifierSize(u32),

    #[error("truncated record at offset {offset}")]
    Truncated { offset: usize },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct HprofHeader {
    version: String,
    identifier_size: u32,
    timestamp_ms: u64,
    len: usize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct TagStats {
    count: u64,
    bytes: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct LoadedClass {
    serial: u32,
    object_id: u64,
    name_id: u64,
}

#[derive(Debug, Default)]
struct RecordIndex {
    record_count: u64,
    tags: BTreeMap<u8, TagStats>,
    strings: HashMap<u64, Range<usize>>,
    classes: Vec<LoadedClass>,
}

/// A memory-mapped heap dump with its top-level records indexed.
#[derive(Debug)]
pub struct HeapGraph {
    path: PathBuf,
    map: Mmap,
    header: HprofHeader,
    index: RecordIndex,
    class_names: Arc<[String]>,
}

impl HeapGraph {
    pub fn open(path: &Path) -> Result<Self, ParseHeapDumpError> {
        let file = File::open(path).map_err(ParseHeapDumpError::Open)?;
        let len = file.metadata().map_err(ParseHeapDumpError::Open)?.len();
        if len == 0 {
            return Err(ParseHeapDumpError::Empty);
        }

        // SAFETY: the map is read-only and owned by this graph; a heap dump is not expected to
        // change while it is open.
        let map = unsafe { Mmap::map(&file) }.map_err(ParseHeapDumpError::Map)?;
        let header = parse_header(&map)?;
        let index = index_records(&map, &header)?;
        debug!(
            path = %path.display(),
            records = index.record_count,
            classes = index.classes.len(),
            "indexed heap dump"
        );

        let mut graph = Self {
            path: path.to_path_buf(),
            map,
            header,
            index,
            class_names: Arc::from(Vec::new()),
        };
        graph.class_names = graph.resolve_class_names();
        Ok(graph)
    }

    pub fn summary(&self) -> GraphSummary {
        let heap_dump_bytes: u64 = [TAG_HEAP_DUMP, TAG_HEAP_DUMP_SEGMENT]
            .iter()
            .filter_map(|tag| self.index.tags.get(tag))
            .map(|stats| stats.bytes)
            .sum();
        let records = self
            .index
            .tags
            .iter()
            .map(|(tag, stats)| RecordStat {
                tag: *tag,
                name: record_tag_name(*tag),
                count: stats.count,
                bytes: stats.bytes,
            })
            .collect();

        GraphSummary {
            file_size_bytes: self.map.len() as u64,
            version: self.header.version.clone(),
            identifier_size: self.header.identifier_size,
            timestamp_ms: self.header.timestamp_ms,
            record_count: self.index.record_count,
            string_count: self.index.strings.len(),
            class_count: self.index.classes.len(),
            heap_dump_bytes,
            records,
        }
    }

    pub fn string(&self, id: u64) -> Option<String> {
        let range = self.index.strings.get(&id)?;
        let bytes = self.map.get(range.clone())?;
        Some(String::from_utf8_lossy(bytes).to_string())
    }

    /// Loaded class names in Java notation, sorted. Resolved once while loading.
    pub fn class_names(&self) -> Arc<[String]> {
        Arc::clone(&self.class_names)
    }

    fn resolve_class_names(&self) -> Arc<[String]> {
        let mut names = self
            .index
            .classes
            .iter()
            .map(|class| {
                self.string(class.name_id).map_or_else(
                    || format!("<unnamed class #{} @{:#x}>", class.serial, class.object_id),
                    |name| name.replace('/', "."),
                )
            })
            .collect::<Vec<_>>();
        names.sort();
        names.into()
    }
}

impl GraphHandle for HeapGraph {
    fn close(self) {
        let Self { path, map, .. } = self;
        drop(map);
        info!(path = %path.display(), "heap graph closed");
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HprofParser;

impl HeapDumpParser for HprofParser {
    type Graph = HeapGraph;
    type Error = ParseHeapDumpError;

    fn parse(&self, path: &Path) -> Result<HeapGraph, ParseHeapDumpError> {
        HeapGraph::open(path)
    }
}

fn parse_header(bytes: &[u8]) -> Result<HprofHeader, ParseHeapDumpError> {
    let prefix = &bytes[..bytes.len().min(MAX_MAGIC_LEN)];
    let Some(nul) = prefix.iter().position(|byte| *byte == 0) else {
        return Err(ParseHeapDumpError::BadMagic);
    };
    let magic = &bytes[..nul];
    let Some(version) = magic.strip_prefix(MAGIC_PREFIX) else {
        return Err(ParseHeapDumpError::BadMagic);
    };
    let version = std::str::from_utf8(version).map_err(|_| ParseHeapDumpError::BadMagic)?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ParseHeapDumpError::UnsupportedVersion(version.to_string()));
    }

    let id_at = nul + 1;
    let identifier_size =
        read_u32(bytes, id_at).ok_or(ParseHeapDumpError::Truncated { offset: id_at })?;
    if identifier_size != 4 && identifier_size != 8 {
        return Err(ParseHeapDumpError::UnsupportedIdentifierSize(identifier_size));
    }
    let timestamp_ms =
        read_u64(bytes, id_at + 4).ok_or(ParseHeapDumpError::Truncated { offset: id_at })?;

    Ok(HprofHeader {
        version: version.to_string(),
        identifier_size,
        timestamp_ms,
        len: id_at + 12,
    })
}

fn index_records(bytes: &[u8], header: &HprofHeader) -> Result<RecordIndex, ParseHeapDumpError> {
    let id_size = header.identifier_size as usize;
    let mut index = RecordIndex::default();
    let mut offset = header.len;

    while offset < bytes.len() {
        let tag = bytes[offset];
        let length = read_u32(bytes, offset + 5).ok_or(ParseHeapDumpError::Truncated { offset })?;
        let body_start = offset + RECORD_HEADER_LEN;
        let body_end = body_start
            .checked_add(length as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or(ParseHeapDumpError::Truncated { offset })?;

        index.record_count += 1;
        let stats = index.tags.entry(tag).or_default();
        stats.count += 1;
        stats.bytes += u64::from(length);

        match tag {
            TAG_STRING if body_end - body_start >= id_size => {
                if let Some(id) = read_id(bytes, body_start, id_size) {
                    let text_start = (body_start + id_size).min(body_end);
                    index.strings.insert(id, text_start..body_end);
                }
            }
            TAG_LOAD_CLASS if body_end - body_start >= 8 + 2 * id_size => {
                let serial = read_u32(bytes, body_start);
                let object_id = read_id(bytes, body_start + 4, id_size);
                let name_id = read_id(bytes, body_start + 8 + id_size, id_size);
                if let (Some(serial), Some(object_id), Some(name_id)) = (serial, object_id, name_id)
                {
                    index.classes.push(LoadedClass {
                        serial,
                        object_id,
                        name_id,
                    });
                }
            }
            _ => {}
        }

        offset = body_end;
    }

    Ok(index)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let chunk = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let high = read_u32(bytes, at)?;
    let low = read_u32(bytes, at.checked_add(4)?)?;
    Some((u64::from(high) << 32) | u64::from(low))
}

fn read_id(bytes: &[u8], at: usize, id_size: usize) -> Option<u64> {
    match id_size {
        4 => read_u32(bytes, at).map(u64::from),
        _ => read_u64(bytes, at),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Builds a small HPROF 1.0.2 dump with 4-byte identifiers.
    pub struct HprofBuilder {
        bytes: Vec<u8>,
    }

    impl HprofBuilder {
        pub fn new() -> Self {
            let mut bytes = b"JAVA PROFILE 1.0.2\0".to_vec();
            bytes.extend_from_slice(&4u32.to_be_bytes());
            bytes.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
            Self { bytes }
        }

        pub fn record(mut self, tag: u8, body: &[u8]) -> Self {
            self.bytes.push(tag);
            self.bytes.extend_from_slice(&0u32.to_be_bytes());
            self.bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
            self.bytes.extend_from_slice(body);
            self
        }

        pub fn string(self, id: u32, text: &str) -> Self {
            let mut body = id.to_be_bytes().to_vec();
            body.extend_from_slice(text.as_bytes());
            self.record(0x01, &body)
        }

        pub fn load_class(self, serial: u32, object_id: u32, name_id: u32) -> Self {
            let mut body = serial.to_be_bytes().to_vec();
            body.extend_from_slice(&object_id.to_be_bytes());
            body.extend_from_slice(&0u32.to_be_bytes());
            body.extend_from_slice(&name_id.to_be_bytes());
            self.record(0x02, &body)
        }

        pub fn build(self) -> Vec<u8> {
            self.bytes
        }
    }

    pub fn sample_dump() -> Vec<u8> {
        HprofBuilder::new()
            .string(1, "java/lang/String")
            .string(2, "com/example/Leak")
            .load_class(1, 0x100, 2)
            .load_class(2, 0x200, 1)
            .record(0x1C, &[0u8; 16])
            .record(0x2C, &[])
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{HprofBuilder, sample_dump};
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_dump(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).expect("write dump");
        path
    }

    #[test]
    fn indexes_records_strings_and_classes() {
        let temp = tempdir().expect("tempdir");
        let path = write_dump(temp.path(), "sample.hprof", &sample_dump());

        let graph = HprofParser.parse(&path).expect("parse");
        let summary = graph.summary();

        assert_eq!(summary.version, "1.0.2");
        assert_eq!(summary.identifier_size, 4);
        assert_eq!(summary.timestamp_ms, 1_700_000_000_000);
        assert_eq!(summary.record_count, 6);
        assert_eq!(summary.string_count, 2);
        assert_eq!(summary.class_count, 2);
        assert_eq!(summary.heap_dump_bytes, 16);
        assert_eq!(summary.file_size_bytes, sample_dump().len() as u64);
        assert_eq!(
            summary
                .records
                .iter()
                .map(|stat| (stat.name, stat.count))
                .collect::<Vec<_>>(),
            vec![
                ("STRING", 2),
                ("LOAD CLASS", 2),
                ("HEAP DUMP SEGMENT", 1),
                ("HEAP DUMP END", 1),
            ]
        );
        assert_eq!(
            graph.class_names().to_vec(),
            vec!["com.example.Leak".to_string(), "java.lang.String".to_string()]
        );
        graph.close();
    }

    #[test]
    fn rejects_bad_magic_number() {
        let temp = tempdir().expect("tempdir");
        let path = write_dump(temp.path(), "broken.hprof", b"NOT A HEAP DUMP\0\0\0\0\x04");

        let error = HprofParser.parse(&path).expect_err("bad magic");
        assert!(matches!(error, ParseHeapDumpError::BadMagic));
        assert_eq!(error.to_string(), "bad magic number");
    }

    #[test]
    fn rejects_unsupported_version_and_identifier_size() {
        let temp = tempdir().expect("tempdir");
        let path = write_dump(temp.path(), "future.hprof", b"JAVA PROFILE 9.9\0");
        assert!(matches!(
            HprofParser.parse(&path),
            Err(ParseHeapDumpError::UnsupportedVersion(version)) if version == "9.9"
        ));

        let mut bytes = b"JAVA PROFILE 1.0.2\0".to_vec();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&0u64.to_be_bytes());
        let path = write_dump(temp.path(), "odd.hprof", &bytes);
        assert!(matches!(
            HprofParser.parse(&path),
            Err(ParseHeapDumpError::UnsupportedIdentifierSize(2))
        ));
    }

    #[test]
    fn rejects_truncated_record() {
        let temp = tempdir().expect("tempdir");
        let mut bytes = HprofBuilder::new().string(1, "x").build();
        let cut_at = bytes.len();
        bytes.extend_from_slice(&[0x01, 0, 0, 0, 0, 0, 0, 0, 50, 1, 2]);
        let path = write_dump(temp.path(), "cut.hprof", &bytes);

        let error = HprofParser.parse(&path).expect_err("truncated");
        assert!(matches!(
            error,
            ParseHeapDumpError::Truncated { offset } if offset == cut_at
        ));
    }

    #[test]
    fn string_record_shorter_than_an_id_is_not_indexed() {
        let temp = tempdir().expect("tempdir");
        let bytes = HprofBuilder::new()
            .record(0x01, &[0xAA, 0xBB])
            .string(7, "real")
            .build();
        let path = write_dump(temp.path(), "short.hprof", &bytes);

        let graph = HprofParser.parse(&path).expect("parse");
        let summary = graph.summary();
        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.string_count, 1);
        assert_eq!(summary.records[0].count, 2);
        assert_eq!(graph.string(7).as_deref(), Some("real"));
        assert_eq!(graph.string(0xAABB_0100), None);
    }

    #[test]
    fn reports_missing_and_empty_files() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("missing.hprof");
        assert!(matches!(
            HprofParser.parse(&missing),
            Err(ParseHeapDumpError::Open(_))
        ));

        let empty = write_dump(temp.path(), "empty.hprof", &[]);
        assert!(matches!(
            HprofParser.parse(&empty),
            Err(ParseHeapDumpError::Empty)
        ));
    }

    #[test]
    fn header_only_dump_has_no_records() {
        let temp = tempdir().expect("tempdir");
        let path = write_dump(temp.path(), "bare.hprof", &HprofBuilder::new().build());

        let graph = HprofParser.parse(&path).expect("parse");
        assert_eq!(graph.summary().record_count, 0);
        assert!(graph.class_names().is_empty());
        assert_eq!(graph.summary().file_size_bytes, 31);
    }
}
