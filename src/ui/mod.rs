mod theme;

use crate::app::{AppModel, HeapGraphView, LineEditor, LoadView, View};
use crate::domain::{GraphSummary, ModifierKey, RecordStat};
use humansize::{DECIMAL, format_size};
use ratatui::prelude::*;
use ratatui::widgets::*;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const KEY_HINTS: &str = "Ctrl+O open  Ctrl+W close  Ctrl+Q quit";

pub fn render(frame: &mut Frame, model: &AppModel) {
    let full_area = frame.area();
    if full_area.width == 0 || full_area.height == 0 {
        return;
    }
    frame.render_widget(Block::default().style(Style::default().bg(theme::BG)), full_area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(full_area);

    render_menu_bar(frame, chunks[0], model);
    match &model.view {
        View::Start => render_start(frame, chunks[1]),
        View::HeapGraph(view) => render_heap_graph(frame, chunks[1], view),
    }
    render_status_bar(frame, chunks[2], model);

    if let Some(editor) = &model.open_prompt {
        render_open_prompt(frame, chunks[1], editor);
    }
}

fn render_menu_bar(frame: &mut Frame, area: Rect, model: &AppModel) {
    let base_style = Style::default().fg(theme::FG).bg(theme::BAR_BG);
    let title = match &model.view {
        View::Start => env!("CARGO_PKG_NAME").to_string(),
        View::HeapGraph(view) => view.title(),
    };
    let title = format!(" {title} ");

    let width = area.width as usize;
    let title_width = UnicodeWidthStr::width(title.as_str());
    let hints_width = UnicodeWidthStr::width(KEY_HINTS) + 1;
    let mut spans = vec![Span::styled(
        truncate_end(&title, width),
        base_style.fg(theme::ACCENT).add_modifier(Modifier::BOLD),
    )];
    if width > title_width + hints_width {
        spans.push(Span::styled(
            " ".repeat(width - title_width - hints_width),
            base_style,
        ));
        spans.push(Span::styled(
            format!("{KEY_HINTS} "),
            base_style.fg(theme::MUTED),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)).style(base_style), area);
}

fn render_status_bar(frame: &mut Frame, area: Rect, model: &AppModel) {
    let base_style = Style::default().fg(theme::MUTED).bg(theme::BAR_BG);
    let line = match model.notice.as_deref() {
        Some(notice) => Line::from(Span::styled(
            format!(" {notice}"),
            base_style.fg(theme::ACCENT),
        )),
        None => Line::from(vec![
            Span::styled(" Modifiers: ", base_style),
            Span::styled(
                held_modifiers_label(model),
                base_style.fg(theme::FG).add_modifier(Modifier::BOLD),
            ),
        ]),
    };
    frame.render_widget(Paragraph::new(line).style(base_style), area);
}

fn held_modifiers_label(model: &AppModel) -> String {
    let held: Vec<&str> = model.pressed_keys.held().map(ModifierKey::label).collect();
    if held.is_empty() {
        return "none".to_string();
    }
    held.join("+")
}

fn render_start(frame: &mut Frame, area: Rect) {
    let area = centered_rect(60, 40, area);
    let lines = vec![
        Line::from(Span::styled(
            "No heap dump open",
            Style::default().fg(theme::FG).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Press Ctrl+O (or o) to open an .hprof file.",
            Style::default().fg(theme::MUTED),
        )),
        Line::from(Span::styled(
            "Pasting a path also opens the prompt.",
            Style::default().fg(theme::DIM),
        )),
    ];
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme::BORDER))
                .padding(Padding::uniform(1)),
        );
    frame.render_widget(paragraph, area);
}

fn render_heap_graph(frame: &mut Frame, area: Rect, view: &HeapGraphView) {
    let area = inner_area(area);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let header = Paragraph::new(truncate_middle(
        &view.file_path.display().to_string(),
        chunks[0].width.saturating_sub(4) as usize,
    ))
    .style(Style::default().fg(theme::MUTED))
    .block(
        Block::default()
            .title(view.title())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme::BORDER))
            .padding(Padding::horizontal(1)),
    );
    frame.render_widget(header, chunks[0]);

    match &view.load {
        LoadView::Loading => {
            let paragraph = Paragraph::new("Loading heap dump…")
                .style(Style::default().fg(theme::MUTED))
                .block(panel_block("Heap Graph"));
            frame.render_widget(paragraph, chunks[1]);
        }
        LoadView::Failed(message) => {
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Failed to load heap dump.",
                    Style::default().fg(theme::ERROR).add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(theme::ERROR),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Ctrl+W closes this view. Ctrl+O opens another file.",
                    Style::default().fg(theme::DIM),
                )),
            ])
            .wrap(Wrap { trim: false })
            .block(panel_block("Heap Graph"));
            frame.render_widget(paragraph, chunks[1]);
        }
        LoadView::Loaded {
            summary,
            class_names,
        } => {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);
            render_summary(frame, columns[0], summary);
            render_classes(frame, columns[1], class_names, view.selected);
        }
    }
}

fn render_summary(frame: &mut Frame, area: Rect, summary: &GraphSummary) {
    let label_style = Style::default().fg(theme::MUTED);
    let value_style = Style::default().fg(theme::FG);
    let field = |label: &str, value: String| {
        Line::from(vec![
            Span::styled(pad_right(label, 14), label_style),
            Span::styled(value, value_style),
        ])
    };

    let mut lines = vec![
        field("File size", format_size(summary.file_size_bytes, DECIMAL)),
        field("Format", format!("JAVA PROFILE {}", summary.version)),
        field("ID size", format!("{} bytes", summary.identifier_size)),
        field("Dumped at", format_timestamp(summary.timestamp_ms)),
        field("Records", summary.record_count.to_string()),
        field("Strings", summary.string_count.to_string()),
        field("Classes", summary.class_count.to_string()),
        field("Heap data", format_size(summary.heap_dump_bytes, DECIMAL)),
        Line::from(""),
    ];

    let name_width = summary
        .records
        .iter()
        .map(|record| UnicodeWidthStr::width(record.name))
        .max()
        .unwrap_or(0);
    lines.extend(
        summary
            .records
            .iter()
            .map(|record| record_line(record, name_width)),
    );

    let paragraph = Paragraph::new(lines).block(panel_block("Summary"));
    frame.render_widget(paragraph, area);
}

fn record_line(record: &RecordStat, name_width: usize) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("0x{:02X} ", record.tag),
            Style::default().fg(theme::DIM),
        ),
        Span::styled(
            pad_right(record.name, name_width),
            Style::default().fg(theme::FG),
        ),
        Span::styled(
            pad_left(&record.count.to_string(), 8),
            Style::default().fg(theme::ACCENT),
        ),
        Span::styled(
            pad_left(&format_size(record.bytes, DECIMAL), 11),
            Style::default().fg(theme::MUTED),
        ),
    ])
}

fn render_classes(frame: &mut Frame, area: Rect, class_names: &[String], selected: usize) {
    let title = format!("Classes ({})", class_names.len());
    if class_names.is_empty() {
        let paragraph = Paragraph::new("No classes recorded in this dump.")
            .style(Style::default().fg(theme::MUTED))
            .block(panel_block(&title));
        frame.render_widget(paragraph, area);
        return;
    }

    let width = area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = class_names
        .iter()
        .map(|name| ListItem::new(Line::from(truncate_middle(name, width))))
        .collect();
    let list = List::new(items)
        .block(panel_block(&title))
        .style(Style::default().fg(theme::FG))
        .highlight_style(
            Style::default()
                .fg(theme::ACCENT)
                .bg(theme::ACCENT_BG)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("");

    let mut state = ListState::default();
    state.select(Some(selected.min(class_names.len() - 1)));
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_open_prompt(frame: &mut Frame, area: Rect, editor: &LineEditor) {
    let popup = centered_rect(70, 30, area);
    let popup = Rect {
        height: popup.height.clamp(3, 5).min(area.height),
        ..popup
    };
    frame.render_widget(Clear, popup);

    let block = Block::default()
        .title("Open Heap Dump")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::ACCENT))
        .style(Style::default().bg(theme::SURFACE))
        .padding(Padding::horizontal(1));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let before_cursor: String = editor.text.chars().take(editor.cursor_col).collect();
    let cursor_width = UnicodeWidthStr::width(before_cursor.as_str()) as u16;
    let scroll = cursor_width.saturating_sub(inner.width.saturating_sub(1));

    let paragraph = Paragraph::new(editor.text.as_str())
        .style(Style::default().fg(theme::FG))
        .scroll((0, scroll));
    frame.render_widget(paragraph, Rect { height: 1, ..inner });

    if inner.height > 1 {
        let hint = Paragraph::new("Enter=open  Esc=cancel")
            .style(Style::default().fg(theme::DIM));
        frame.render_widget(
            hint,
            Rect {
                y: inner.y + inner.height - 1,
                height: 1,
                ..inner
            },
        );
    }

    let x = inner.x.saturating_add(cursor_width - scroll);
    frame.set_cursor_position(Position { x, y: inner.y });
}

fn panel_block(title: &str) -> Block<'static> {
    Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .padding(Padding::horizontal(1))
}

fn format_timestamp(timestamp_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .ok()
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{timestamp_ms} ms"))
}

fn pad_left(text: &str, width: usize) -> String {
    let text_width = UnicodeWidthStr::width(text);
    if text_width >= width {
        return text.to_string();
    }
    format!("{}{text}", " ".repeat(width - text_width))
}

fn pad_right(text: &str, width: usize) -> String {
    let text_width = UnicodeWidthStr::width(text);
    if text_width >= width {
        return text.to_string();
    }
    format!("{text}{}", " ".repeat(width - text_width))
}

fn truncate_end(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let ellipsis = "…";
    let mut out = take_prefix_width(text, max_width.saturating_sub(1));
    out.push_str(ellipsis);
    out
}

// Keeps both the package prefix and the simple class name visible.
fn truncate_middle(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }

    let available = max_width.saturating_sub(1);
    if available <= 4 {
        return truncate_end(text, max_width);
    }

    let left = take_prefix_width(text, available / 2);
    let right = take_suffix_width(text, available - available / 2);
    format!("{left}…{right}")
}

fn take_prefix_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > width {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out
}

fn take_suffix_width(text: &str, width: usize) -> String {
    let mut chars = Vec::new();
    let mut used = 0;
    for ch in text.chars().rev() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > width {
            break;
        }
        used += ch_width;
        chars.push(ch);
    }
    chars.into_iter().rev().collect()
}

fn inner_area(area: Rect) -> Rect {
    if area.width < 40 || area.height < 12 {
        return area;
    }
    area.inner(Margin {
        vertical: 0,
        horizontal: 1,
    })
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
