//! New-task form: title input, category and priority selectors, add button.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Position, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use tasklist_proto::task::{Category, Priority};

use super::theme;
use crate::app::{App, Focus};
use crate::tasks::state::TaskList;

/// Add button label while a load is outstanding.
pub const ADDING_LABEL: &str = "Adding...";

/// Add button label otherwise.
pub const ADD_LABEL: &str = "Add Task";

/// Render the form row.
pub fn render(frame: &mut Frame, area: Rect, app: &App, list: &TaskList) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(20),
            Constraint::Length(16),
            Constraint::Length(14),
            Constraint::Length(14),
        ])
        .split(area);

    let drafts = list.drafts();
    let title_focused = app.focus == Focus::Title;

    let title = Paragraph::new(drafts.title.as_str()).style(theme::normal()).block(
        Block::default()
            .title(Span::styled(
                "New task",
                theme::panel_title(theme::FORM_TITLE),
            ))
            .borders(Borders::ALL)
            .border_style(theme::border(title_focused)),
    );
    frame.render_widget(title, chunks[0]);

    if title_focused && !list.is_loading() {
        let cursor_x = u16::try_from(app.cursor_position).unwrap_or(u16::MAX);
        frame.set_cursor_position(Position::new(
            chunks[0].x.saturating_add(1).saturating_add(cursor_x),
            chunks[0].y.saturating_add(1),
        ));
    }

    render_selector(
        frame,
        chunks[1],
        &selector_title("Category", &Category::ALL, drafts.category),
        &drafts.category.to_string(),
        app.focus == Focus::Category,
    );
    render_selector(
        frame,
        chunks[2],
        &selector_title("Priority", &Priority::ALL, drafts.priority),
        &drafts.priority.to_string(),
        app.focus == Focus::Priority,
    );

    let (label, style) = if list.is_loading() {
        (ADDING_LABEL, theme::dimmed())
    } else {
        (ADD_LABEL, theme::bold())
    };
    let button = Paragraph::new(Line::from(Span::styled(label, style)))
        .centered()
        .block(Block::default().borders(Borders::ALL).border_style(theme::dimmed()));
    frame.render_widget(button, chunks[3]);
}

/// Selector box title with the value's place among the options, e.g. "Priority 2/3".
fn selector_title<T: PartialEq>(name: &str, options: &[T], value: T) -> String {
    let place = options.iter().position(|o| *o == value).map_or(0, |i| i + 1);
    format!("{name} {place}/{}", options.len())
}

fn render_selector(frame: &mut Frame, area: Rect, title: &str, value: &str, focused: bool) {
    let line = Line::from(vec![
        Span::styled("< ", theme::dimmed()),
        Span::styled(value.to_string(), theme::normal()),
        Span::styled(" >", theme::dimmed()),
    ]);
    let widget = Paragraph::new(line).block(
        Block::default()
            .title(title.to_string())
            .borders(Borders::ALL)
            .border_style(theme::border(focused)),
    );
    frame.render_widget(widget, area);
}
