use crate::domain::GraphSummary;
use crate::infra::{HeapGraph, HprofParser, LoadState, SessionController, StartSessionError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Tui { file: Option<PathBuf> },
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Summary { path: PathBuf, json: bool },
    Classes { path: PathBuf, limit: Option<usize> },
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("missing heap dump path for `{0}`")]
    MissingPath(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    StartSession(#[from] StartSessionError),

    #[error("failed to load {path}: {message}")]
    LoadFailed { path: String, message: String },

    #[error("heap dump load for {0} ended without a result")]
    LoadInterrupted(String),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1);
    let Some(first) = iter.next() else {
        return Ok(CliInvocation::Tui { file: None });
    };

    match first.as_str() {
        "summary" => {
            let mut path: Option<PathBuf> = None;
            let mut json = false;
            for arg in iter {
                match arg.as_str() {
                    "--json" => json = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => set_path_once(&mut path, arg)?,
                }
            }
            let path = path.ok_or_else(|| CliParseError::MissingPath("summary".to_string()))?;
            Ok(CliInvocation::Command(CliCommand::Summary { path, json }))
        }
        "classes" => {
            let mut path: Option<PathBuf> = None;
            let mut limit: Option<usize> = None;
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--limit" | "-l" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--limit".to_string())
                        })?;
                        limit = Some(parse_usize_flag("--limit", value)?);
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => set_path_once(&mut path, arg)?,
                }
            }
            let path = path.ok_or_else(|| CliParseError::MissingPath("classes".to_string()))?;
            Ok(CliInvocation::Command(CliCommand::Classes { path, limit }))
        }
        "--" => {
            let file = iter.next().map(PathBuf::from);
            if let Some(extra) = iter.next() {
                return Err(CliParseError::UnexpectedArgument(extra.to_string()));
            }
            Ok(CliInvocation::Tui { file })
        }
        _ if first.starts_with('-') => Err(CliParseError::UnknownFlag(first.to_string())),
        _ => {
            if let Some(extra) = iter.next() {
                return Err(CliParseError::UnexpectedArgument(extra.to_string()));
            }
            Ok(CliInvocation::Tui {
                file: Some(PathBuf::from(first)),
            })
        }
    }
}

pub fn run(command: CliCommand) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    execute(command, &mut out)?;
    match out.flush() {
        Err(error) if error.kind() != io::ErrorKind::BrokenPipe => Err(error.into()),
        _ => Ok(()),
    }
}

fn execute(command: CliCommand, out: &mut impl Write) -> Result<(), CliRunError> {
    match command {
        CliCommand::Summary { path, json } => {
            let summary = with_loaded_graph(&path, HeapGraph::summary)?;
            if json {
                let payload = serde_json::to_string_pretty(&summary)?;
                write_line(out, &payload)?;
                return Ok(());
            }
            for line in summary_lines(&path, &summary) {
                if !write_line(out, &line)? {
                    break;
                }
            }
        }
        CliCommand::Classes { path, limit } => {
            let class_names = with_loaded_graph(&path, HeapGraph::class_names)?;
            let limit = limit.unwrap_or(usize::MAX);
            for name in class_names.iter().take(limit) {
                if !write_line(out, name)? {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Loads `path` through a session, waits for the result, and reads it before teardown.
fn with_loaded_graph<R>(
    path: &Path,
    read: impl FnOnce(&HeapGraph) -> R,
) -> Result<R, CliRunError> {
    let mut session = SessionController::start(path.to_path_buf(), HprofParser)?;

    let (tx, rx) = channel();
    session.state().subscribe(move |_| {
        let _ = tx.send(());
    });
    let finished = rx.recv().is_ok();
    debug!(
        session = %session.id(),
        finished,
        status = ?session.state().status(),
        "headless load returned"
    );

    let outcome = session.state().read(|state| match state {
        LoadState::Loaded(graph) => Ok(read(graph)),
        LoadState::Failed(error) => Err(CliRunError::LoadFailed {
            path: path.display().to_string(),
            message: error.message().to_string(),
        }),
        LoadState::Loading | LoadState::Closed => {
            Err(CliRunError::LoadInterrupted(path.display().to_string()))
        }
    });
    session.teardown();
    outcome
}

fn summary_lines(path: &Path, summary: &GraphSummary) -> Vec<String> {
    let mut lines = vec![
        format!("file\t{}", path.display()),
        format!("file_size_bytes\t{}", summary.file_size_bytes),
        format!("version\t{}", summary.version),
        format!("identifier_size\t{}", summary.identifier_size),
        format!("dumped_at\t{}", format_timestamp(summary.timestamp_ms)),
        format!("records\t{}", summary.record_count),
        format!("strings\t{}", summary.string_count),
        format!("classes\t{}", summary.class_count),
        format!("heap_dump_bytes\t{}", summary.heap_dump_bytes),
    ];
    lines.extend(summary.records.iter().map(|record| {
        format!(
            "record\t0x{:02X}\t{}\t{}\t{}",
            record.tag, record.name, record.count, record.bytes
        )
    }));
    lines
}

fn format_timestamp(timestamp_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .ok()
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn set_path_once(path: &mut Option<PathBuf>, arg: &str) -> Result<(), CliParseError> {
    if path.is_some() {
        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
    }
    *path = Some(PathBuf::from(arg));
    Ok(())
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}

fn parse_usize_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    value
        .parse::<usize>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}
