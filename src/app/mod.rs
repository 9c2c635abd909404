mod line_editor;

use crate::domain::{
    GraphSummary, ModifierKey, PressedKeys, SessionId, heap_dump_window_title, is_heap_dump_path,
};
use crate::infra::{HeapGraph, LoadState};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use line_editor::LineEditor;

const PAGE_CHROME_ROWS: u16 = 14;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    StartSession(#[from] crate::infra::StartSessionError),
}

#[derive(Clone, Debug)]
pub struct AppModel {
    pub view: View,
    pub open_prompt: Option<LineEditor>,
    pub terminal_size: (u16, u16),
    pub notice: Option<String>,
    pub pressed_keys: PressedKeys,
}

impl Default for AppModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AppModel {
    pub fn new() -> Self {
        Self {
            view: View::Start,
            open_prompt: None,
            terminal_size: (0, 0),
            notice: None,
            pressed_keys: PressedKeys::default(),
        }
    }

    pub fn with_terminal_size(mut self, width: u16, height: u16) -> Self {
        self.terminal_size = (width, height);
        self
    }

    pub fn with_notice(mut self, notice: Option<String>) -> Self {
        self.notice = notice;
        self
    }

    pub fn show_heap_graph(&mut self, session_id: SessionId, file_path: PathBuf) {
        self.open_prompt = None;
        self.view = View::HeapGraph(HeapGraphView {
            session_id,
            file_path,
            load: LoadView::Loading,
            selected: 0,
        });
    }

    pub fn show_start(&mut self) {
        self.view = View::Start;
    }

    /// Applies a load result to the open heap graph view. Results for other sessions are
    /// ignored and `false` is returned.
    pub fn apply_load(&mut self, session_id: SessionId, load: LoadView) -> bool {
        let View::HeapGraph(view) = &mut self.view else {
            return false;
        };
        if view.session_id != session_id {
            return false;
        }
        view.load = load;
        view.selected = 0;
        true
    }

    fn page_rows(&self) -> usize {
        usize::from(self.terminal_size.1.saturating_sub(PAGE_CHROME_ROWS).max(1))
    }
}

#[derive(Clone, Debug)]
pub enum View {
    Start,
    HeapGraph(HeapGraphView),
}

#[derive(Clone, Debug)]
pub struct HeapGraphView {
    pub session_id: SessionId,
    pub file_path: PathBuf,
    pub load: LoadView,
    pub selected: usize,
}

impl HeapGraphView {
    pub fn title(&self) -> String {
        heap_dump_window_title(&self.file_path)
    }

    fn class_count(&self) -> usize {
        match &self.load {
            LoadView::Loaded { class_names, .. } => class_names.len(),
            _ => 0,
        }
    }
}

/// What the heap graph view shows. Built from the session state; never holds the graph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadView {
    Loading,
    Loaded {
        summary: GraphSummary,
        class_names: Arc<[String]>,
    },
    Failed(String),
}

impl LoadView {
    pub fn from_state(state: LoadState<'_, HeapGraph>) -> Self {
        match state {
            LoadState::Loading => Self::Loading,
            LoadState::Loaded(graph) => Self::Loaded {
                summary: graph.summary(),
                class_names: graph.class_names(),
            },
            LoadState::Failed(error) => Self::Failed(error.message().to_string()),
            LoadState::Closed => Self::Failed("heap dump was closed".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Paste(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppCommand {
    None,
    Quit,
    OpenHeapDump { path: PathBuf },
    CloseHeapDump,
}

pub fn update(model: AppModel, event: AppEvent) -> (AppModel, AppCommand) {
    match event {
        AppEvent::Key(key) => update_on_key(model, key),
        AppEvent::Paste(text) => update_on_paste(model, text),
    }
}

fn update_on_key(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    if let KeyCode::Modifier(code) = key.code {
        if let Some(modifier) = modifier_key(code) {
            model
                .pressed_keys
                .set(modifier, key.kind != KeyEventKind::Release);
        }
        return (model, AppCommand::None);
    }
    if key.kind == KeyEventKind::Release {
        return (model, AppCommand::None);
    }

    track_modifiers(&mut model.pressed_keys, key.modifiers);
    model.notice = None;

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
        return (model, AppCommand::Quit);
    }

    if model.open_prompt.is_some() {
        return update_open_prompt(model, key);
    }

    if ctrl && key.code == KeyCode::Char('o') {
        model.open_prompt = Some(LineEditor::new());
        return (model, AppCommand::None);
    }
    if ctrl && key.code == KeyCode::Char('w') {
        let command = match model.view {
            View::HeapGraph(_) => AppCommand::CloseHeapDump,
            View::Start => AppCommand::None,
        };
        return (model, command);
    }

    match model.view.clone() {
        View::Start => update_start(model, key),
        View::HeapGraph(view) => update_heap_graph(model, view, key),
    }
}

fn update_on_paste(mut model: AppModel, text: String) -> (AppModel, AppCommand) {
    if let Some(editor) = model.open_prompt.as_mut() {
        editor.insert_str(&text);
        return (model, AppCommand::None);
    }
    if matches!(model.view, View::Start) {
        model.open_prompt = Some(LineEditor::from_text(text));
    }
    (model, AppCommand::None)
}

fn update_open_prompt(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    let Some(mut editor) = model.open_prompt.take() else {
        return (model, AppCommand::None);
    };

    match key.code {
        KeyCode::Esc => return (model, AppCommand::None),
        KeyCode::Enter => {
            let Some(path) = editor.path() else {
                return (model, AppCommand::None);
            };
            if is_heap_dump_path(&path) {
                return (model, AppCommand::OpenHeapDump { path });
            }
            model.notice = Some(format!("Not an .hprof file: {}", path.display()));
        }
        KeyCode::Backspace => editor.backspace(),
        KeyCode::Delete => editor.delete_forward(),
        KeyCode::Left => editor.move_left(),
        KeyCode::Right => editor.move_right(),
        KeyCode::Home => editor.move_home(),
        KeyCode::End => editor.move_end(),
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            editor.insert_char(ch)
        }
        _ => {}
    }

    model.open_prompt = Some(editor);
    (model, AppCommand::None)
}

fn update_start(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    match key.code {
        KeyCode::Enter | KeyCode::Char('o') => {
            model.open_prompt = Some(LineEditor::new());
            (model, AppCommand::None)
        }
        KeyCode::Esc | KeyCode::Char('q') => (model, AppCommand::Quit),
        _ => (model, AppCommand::None),
    }
}

fn update_heap_graph(
    mut model: AppModel,
    mut view: HeapGraphView,
    key: KeyEvent,
) -> (AppModel, AppCommand) {
    let last = view.class_count().saturating_sub(1);
    let page = model.page_rows();

    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => return (model, AppCommand::CloseHeapDump),
        KeyCode::Up | KeyCode::Char('k') => view.selected = view.selected.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => view.selected = (view.selected + 1).min(last),
        KeyCode::PageUp => view.selected = view.selected.saturating_sub(page),
        KeyCode::PageDown => view.selected = (view.selected + page).min(last),
        KeyCode::Home | KeyCode::Char('g') => view.selected = 0,
        KeyCode::End | KeyCode::Char('G') => view.selected = last,
        _ => {}
    }

    model.view = View::HeapGraph(view);
    (model, AppCommand::None)
}

fn modifier_key(code: ModifierKeyCode) -> Option<ModifierKey> {
    match code {
        ModifierKeyCode::LeftAlt | ModifierKeyCode::RightAlt => Some(ModifierKey::Alt),
        ModifierKeyCode::LeftControl | ModifierKeyCode::RightControl => Some(ModifierKey::Ctrl),
        ModifierKeyCode::LeftMeta
        | ModifierKeyCode::RightMeta
        | ModifierKeyCode::LeftSuper
        | ModifierKeyCode::RightSuper => Some(ModifierKey::Meta),
        ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift => Some(ModifierKey::Shift),
        _ => None,
    }
}

// Terminals without keyboard enhancement never report bare modifier events; the modifiers on
// ordinary key presses are the only signal there.
fn track_modifiers(keys: &mut PressedKeys, modifiers: KeyModifiers) {
    keys.set(ModifierKey::Alt, modifiers.contains(KeyModifiers::ALT));
    keys.set(ModifierKey::Ctrl, modifiers.contains(KeyModifiers::CONTROL));
    keys.set(
        ModifierKey::Meta,
        modifiers.intersects(KeyModifiers::META | KeyModifiers::SUPER),
    );
    keys.set(ModifierKey::Shift, modifiers.contains(KeyModifiers::SHIFT));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(ch: char) -> AppEvent {
        AppEvent::Key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL))
    }

    fn modifier(code: ModifierKeyCode, kind: KeyEventKind) -> AppEvent {
        AppEvent::Key(KeyEvent {
            code: KeyCode::Modifier(code),
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        })
    }

    fn summary() -> GraphSummary {
        GraphSummary {
            file_size_bytes: 1024,
            version: "1.0.2".to_string(),
            identifier_size: 8,
            timestamp_ms: 0,
            record_count: 3,
            string_count: 3,
            class_count: 3,
            heap_dump_bytes: 0,
            records: Vec::new(),
        }
    }

    fn heap_graph_model(session: u64) -> AppModel {
        let mut model = AppModel::new().with_terminal_size(80, 20);
        model.show_heap_graph(SessionId::new(session), PathBuf::from("/tmp/sample.hprof"));
        model
    }

    fn type_text(mut model: AppModel, text: &str) -> AppModel {
        for ch in text.chars() {
            let (next, _) = update(model, key(KeyCode::Char(ch)));
            model = next;
        }
        model
    }

    #[test]
    fn ctrl_o_then_hprof_path_opens_heap_dump() {
        let (model, cmd) = update(AppModel::new(), ctrl('o'));
        assert_eq!(cmd, AppCommand::None);
        assert!(model.open_prompt.is_some());

        let model = type_text(model, "/tmp/app.hprof");
        let (model, cmd) = update(model, key(KeyCode::Enter));
        assert_eq!(
            cmd,
            AppCommand::OpenHeapDump {
                path: PathBuf::from("/tmp/app.hprof")
            }
        );
        assert!(model.open_prompt.is_none());
    }

    #[test]
    fn non_hprof_path_keeps_prompt_and_shows_notice() {
        let (model, _) = update(AppModel::new(), key(KeyCode::Char('o')));
        let model = type_text(model, "/tmp/app.txt");
        let (model, cmd) = update(model, key(KeyCode::Enter));

        assert_eq!(cmd, AppCommand::None);
        assert!(model.open_prompt.is_some());
        assert_eq!(model.notice.as_deref(), Some("Not an .hprof file: /tmp/app.txt"));
    }

    #[test]
    fn esc_closes_prompt_without_command() {
        let (model, _) = update(AppModel::new(), ctrl('o'));
        let (model, cmd) = update(model, key(KeyCode::Esc));
        assert_eq!(cmd, AppCommand::None);
        assert!(model.open_prompt.is_none());
        assert!(matches!(model.view, View::Start));
    }

    #[test]
    fn paste_on_start_view_prefills_prompt() {
        let (model, _) = update(
            AppModel::new(),
            AppEvent::Paste("/tmp/dropped.hprof\n".to_string()),
        );
        let editor = model.open_prompt.clone().expect("prompt");
        assert_eq!(editor.text, "/tmp/dropped.hprof");

        let (_, cmd) = update(model, key(KeyCode::Enter));
        assert_eq!(
            cmd,
            AppCommand::OpenHeapDump {
                path: PathBuf::from("/tmp/dropped.hprof")
            }
        );
    }

    #[test]
    fn quit_keys() {
        let (_, cmd) = update(AppModel::new(), key(KeyCode::Char('q')));
        assert_eq!(cmd, AppCommand::Quit);

        let (_, cmd) = update(heap_graph_model(1), ctrl('q'));
        assert_eq!(cmd, AppCommand::Quit);

        let (_, cmd) = update(heap_graph_model(1), ctrl('c'));
        assert_eq!(cmd, AppCommand::Quit);
    }

    #[test]
    fn ctrl_w_closes_only_an_open_heap_dump() {
        let (_, cmd) = update(heap_graph_model(1), ctrl('w'));
        assert_eq!(cmd, AppCommand::CloseHeapDump);

        let (_, cmd) = update(AppModel::new(), ctrl('w'));
        assert_eq!(cmd, AppCommand::None);
    }

    #[test]
    fn load_for_stale_session_is_ignored() {
        let mut model = heap_graph_model(2);
        assert!(!model.apply_load(SessionId::new(1), LoadView::Failed("old".to_string())));

        let View::HeapGraph(view) = &model.view else {
            panic!("expected HeapGraph view");
        };
        assert_eq!(view.load, LoadView::Loading);

        assert!(model.apply_load(SessionId::new(2), LoadView::Failed("bad".to_string())));
        let View::HeapGraph(view) = &model.view else {
            panic!("expected HeapGraph view");
        };
        assert_eq!(view.load, LoadView::Failed("bad".to_string()));
    }

    #[test]
    fn class_selection_is_clamped() {
        let mut model = heap_graph_model(1);
        model.apply_load(
            SessionId::new(1),
            LoadView::Loaded {
                summary: summary(),
                class_names: vec!["a.A".to_string(), "b.B".to_string(), "c.C".to_string()].into(),
            },
        );

        let (model, _) = update(model, key(KeyCode::Up));
        let (model, _) = update(model, key(KeyCode::Down));
        let (model, _) = update(model, key(KeyCode::PageDown));
        let (model, _) = update(model, key(KeyCode::Down));
        let View::HeapGraph(view) = &model.view else {
            panic!("expected HeapGraph view");
        };
        assert_eq!(view.selected, 2);

        let (model, _) = update(model, key(KeyCode::Home));
        let View::HeapGraph(view) = &model.view else {
            panic!("expected HeapGraph view");
        };
        assert_eq!(view.selected, 0);
    }

    #[test]
    fn modifier_press_and_release_update_pressed_keys() {
        let (model, _) = update(
            AppModel::new(),
            modifier(ModifierKeyCode::LeftShift, KeyEventKind::Press),
        );
        let (model, _) = update(
            model,
            modifier(ModifierKeyCode::RightAlt, KeyEventKind::Press),
        );
        assert!(model.pressed_keys.is_held(ModifierKey::Shift));
        assert!(model.pressed_keys.is_held(ModifierKey::Alt));

        let (model, cmd) = update(
            model,
            modifier(ModifierKeyCode::LeftShift, KeyEventKind::Release),
        );
        assert_eq!(cmd, AppCommand::None);
        assert!(!model.pressed_keys.is_held(ModifierKey::Shift));
        assert!(model.pressed_keys.is_held(ModifierKey::Alt));
    }

    #[test]
    fn key_press_modifiers_refresh_pressed_keys() {
        let mut model = AppModel::new();
        model.pressed_keys.set(ModifierKey::Alt, true);

        let event = AppEvent::Key(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::SUPER));
        let (model, _) = update(model, event);
        assert!(model.pressed_keys.is_held(ModifierKey::Meta));
        assert!(!model.pressed_keys.is_held(ModifierKey::Alt));
    }
}
