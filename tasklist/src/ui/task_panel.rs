//! Task list rendering.

use std::fmt::Write as _;

use chrono::{Local, LocalResult, TimeZone};
use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use tasklist_proto::task::Timestamp;

use super::theme;
use crate::app::{App, Focus};
use crate::tasks::state::{Entry, TaskList};

/// Shown while the first load is outstanding.
pub const LOADING_TEXT: &str = "Loading tasks...";

/// Shown when there is nothing to list.
pub const EMPTY_TEXT: &str = "No tasks yet. Add your first task above!";

/// Render the task list, or its loading / empty placeholder.
pub fn render(frame: &mut Frame, area: Rect, app: &App, list: &TaskList) {
    let focused = app.focus == Focus::List;
    let block = Block::default()
        .title(Span::styled(
            format!("Tasks ({})", list.entries().len()),
            theme::panel_title(theme::TASKS_TITLE),
        ))
        .borders(Borders::ALL)
        .border_style(theme::border(focused));

    if list.entries().is_empty() {
        let text = if list.is_loading() {
            LOADING_TEXT
        } else {
            EMPTY_TEXT
        };
        let placeholder = Paragraph::new(Span::styled(text, theme::dimmed())).block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let items: Vec<ListItem> = list
        .entries()
        .iter()
        .map(|entry| task_item(entry, &app.timestamp_format))
        .collect();

    let mut state = ListState::default();
    if focused {
        state.select(Some(app.selected.min(items.len().saturating_sub(1))));
    }

    let list_widget = List::new(items)
        .block(block)
        .highlight_style(theme::selected())
        .highlight_symbol("> ");

    frame.render_stateful_widget(list_widget, area, &mut state);
}

fn task_item<'a>(entry: &'a Entry, timestamp_format: &str) -> ListItem<'a> {
    let checkbox = if entry.completed() { "[x]" } else { "[ ]" };
    let (style, stamp) = match entry {
        Entry::Provisional { .. } => (theme::provisional(), "saving...".to_string()),
        Entry::Durable(task) => (
            theme::task_row(task.priority, task.completed),
            format_created_at(task.created_at, timestamp_format),
        ),
    };

    let line = Line::from(vec![
        Span::raw(checkbox),
        Span::raw(" "),
        Span::raw(entry.title()),
        Span::raw(format!("  [{}] [{}] ", entry.category(), entry.priority())),
        Span::raw(stamp),
    ]);

    ListItem::new(line).style(style)
}

/// Formats a creation time in local time with a chrono format string.
///
/// An invalid format string yields `"?"` rather than a panic.
#[must_use]
pub fn format_created_at(ts: Timestamp, format: &str) -> String {
    let Ok(millis) = i64::try_from(ts.as_millis()) else {
        return "?".to_string();
    };
    match Local.timestamp_millis_opt(millis) {
        LocalResult::Single(dt) => {
            let mut out = String::new();
            if write!(out, "{}", dt.format(format)).is_err() {
                return "?".to_string();
            }
            out
        }
        _ => "?".to_string(),
    }
}
