mod app;
mod cli;
mod domain;
mod infra;
mod ui;

use crate::app::{AppCommand, AppError, AppEvent, AppModel, LoadView};
use crate::cli::CliInvocation;
use crate::domain::{SessionId, is_heap_dump_path};
use crate::infra::{
    HeapGraph, HprofParser, InitLoggingError, LogTarget, SessionController, init_logging,
    resolve_log_path,
};
use crossterm::cursor::Show;
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::terminal::size as terminal_size;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{ExecutableCommand, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{self, Stdout, Write};
use std::panic;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const QUIT_GRACE: Duration = Duration::from_millis(500);

static TUI_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),

    #[error(transparent)]
    Logging(#[from] InitLoggingError),
}

#[derive(Clone, Copy, Debug)]
enum SessionSignal {
    Finished { session_id: SessionId },
}

fn main() {
    install_panic_hook();
    if let Err(error) = run_main() {
        error!(%error, "exiting with error");
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Tui { file } => {
            // Without a home directory there is nowhere to log; the TUI owns stderr.
            if let Ok(path) = resolve_log_path() {
                init_logging(LogTarget::File(path))?;
            }
            info!(version = env!("CARGO_PKG_VERSION"), "starting TUI");
            Ok(run_tui(file)?)
        }
        CliInvocation::Command(command) => {
            init_logging(LogTarget::Stderr)?;
            crate::cli::run(command)?;
            Ok(())
        }
    }
}

fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if TUI_ACTIVE.swap(false, Ordering::SeqCst) {
            let _ = disable_raw_mode();
            let _ = execute!(
                io::stdout(),
                DisableBracketedPaste,
                PopKeyboardEnhancementFlags,
                LeaveAlternateScreen,
                Show
            );
        }
        error!(panic = %info, "unrecoverable defect");
        default_hook(info);
        process::exit(1);
    }));
}

fn print_help() {
    let text = format!(
        "{name} - browse Java heap dumps (.hprof)\n\nUSAGE:\n  {name} [FILE]                      Start the TUI (opens FILE when given)\n  {name} summary FILE [--json]      Print the dump header and record statistics\n  {name} classes FILE [--limit N]   Print loaded class names, sorted\n  {name} --help | --version\n\nKEYS:\n  Ctrl+O        Open a heap dump\n  Ctrl+W        Close the heap dump\n  Ctrl+Q/Ctrl+C Quit\n  Up/Down/PgUp/PgDn/Home/End  Scroll the class list\n\nOUTPUT:\n  summary: key<TAB>value lines, then record<TAB>tag<TAB>name<TAB>count<TAB>bytes\n\nENV:\n  HPROF_VIEW_LOG  Override the TUI log file (default: ~/.{name}/{name}.log)\n  RUST_LOG        Log filter (default: info for the TUI, warn for subcommands)\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}

fn run_tui(file: Option<PathBuf>) -> Result<(), AppError> {
    let notice = file
        .as_ref()
        .filter(|path| !is_heap_dump_path(path))
        .map(|path| format!("Not an .hprof file: {}", path.display()));
    let file = file.filter(|path| is_heap_dump_path(path));
    let mut model = AppModel::new().with_notice(notice);
    let mut terminal = setup_terminal()?;
    if let Ok((width, height)) = terminal_size() {
        model = model.with_terminal_size(width, height);
    }
    let result = run(&mut terminal, &mut model, file);
    restore_terminal(&mut terminal)?;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, AppError> {
    enable_raw_mode()?;
    TUI_ACTIVE.store(true, Ordering::SeqCst);
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let _ = stdout.execute(EnableBracketedPaste);
    // Bare modifier presses and key releases are only reported with these flags.
    let keyboard_flags = KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES;
    let _ = stdout.execute(PushKeyboardEnhancementFlags(keyboard_flags));
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), AppError> {
    TUI_ACTIVE.store(false, Ordering::SeqCst);
    disable_raw_mode()?;
    let _ = execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        PopKeyboardEnhancementFlags
    );
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    model: &mut AppModel,
    initial_file: Option<PathBuf>,
) -> Result<(), AppError> {
    let (session_tx, session_rx) = channel::<SessionSignal>();
    let mut session: Option<SessionController<HeapGraph>> = None;

    if let Some(path) = initial_file {
        open_heap_dump(model, &mut session, &session_tx, path)?;
    }

    loop {
        while let Ok(signal) = session_rx.try_recv() {
            match signal {
                SessionSignal::Finished { session_id } => {
                    let Some(current) = session.as_ref().filter(|s| s.id() == session_id) else {
                        debug!(session = %session_id, "ignoring signal from a replaced session");
                        continue;
                    };
                    let load = current.state().read(LoadView::from_state);
                    if !model.apply_load(session_id, load) {
                        warn!(session = %session_id, "load finished but its view is gone");
                    }
                }
            }
        }

        terminal.draw(|frame| ui::render(frame, model))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let app_event = match event::read()? {
            Event::Key(key) => AppEvent::Key(key),
            Event::Paste(text) => AppEvent::Paste(text),
            Event::Resize(width, height) => {
                model.terminal_size = (width, height);
                continue;
            }
            _ => continue,
        };

        let (next, command) = app::update(model.clone(), app_event);
        *model = next;
        match command {
            AppCommand::None => {}
            AppCommand::Quit => {
                if let Some(mut current) = session.take() {
                    current.teardown();
                    if !current.await_released(QUIT_GRACE) {
                        warn!(session = %current.id(), "heap dump loader still running at exit");
                    }
                }
                info!("quitting");
                return Ok(());
            }
            AppCommand::OpenHeapDump { path } => {
                open_heap_dump(model, &mut session, &session_tx, path)?;
            }
            AppCommand::CloseHeapDump => close_heap_dump(model, &mut session),
        }
    }
}

fn open_heap_dump(
    model: &mut AppModel,
    session: &mut Option<SessionController<HeapGraph>>,
    session_tx: &Sender<SessionSignal>,
    path: PathBuf,
) -> Result<(), AppError> {
    if let Some(mut previous) = session.take() {
        previous.teardown();
    }

    let next = SessionController::start(path.clone(), HprofParser)?;
    let session_id = next.id();
    let tx = session_tx.clone();
    next.state().subscribe(move |_| {
        let _ = tx.send(SessionSignal::Finished { session_id });
    });

    debug!(session = %session_id, worker = next.worker_name(), "heap dump session opened");
    model.show_heap_graph(session_id, path);
    *session = Some(next);
    Ok(())
}

fn close_heap_dump(model: &mut AppModel, session: &mut Option<SessionController<HeapGraph>>) {
    if let Some(mut current) = session.take() {
        debug!(
            session = %current.id(),
            path = %current.file_path().display(),
            phase = ?current.phase(),
            "closing heap dump session"
        );
        current.teardown();
    }
    model.show_start();
}
