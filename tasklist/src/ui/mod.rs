//! Terminal UI rendering.

pub mod form;
pub mod status_bar;
pub mod task_panel;
pub mod theme;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Flex, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::app::App;
use crate::remote::StoreMode;
use crate::tasks::DELETE_PROMPT;
use crate::tasks::state::TaskList;

/// Main draw function for the entire UI.
pub fn draw(frame: &mut Frame, app: &App, list: &TaskList, mode: StoreMode) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Form
            Constraint::Length(1), // Notice
            Constraint::Min(3),    // Tasks
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    form::render(frame, chunks[0], app, list);
    render_notice(frame, chunks[1], list);
    task_panel::render(frame, chunks[2], app, list);
    status_bar::render(frame, chunks[3], app, list, mode);

    if app.confirm_delete.is_some() {
        render_confirm(frame, frame.area());
    }
}

fn render_notice(frame: &mut Frame, area: Rect, list: &TaskList) {
    let Some(notice) = list.notice() else {
        return;
    };
    let line = Line::from(vec![
        Span::styled(notice.to_string(), theme::notice()),
        Span::styled("  (Esc to dismiss)", theme::dimmed()),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_confirm(frame: &mut Frame, area: Rect) {
    let popup = centered(area, 48, 5);
    let text = vec![
        Line::from(Span::styled(DELETE_PROMPT, theme::bold())),
        Line::from(Span::styled("y: delete   n: cancel", theme::dimmed())),
    ];
    let dialog = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .centered()
        .block(
            Block::default()
                .title("Delete task")
                .borders(Borders::ALL)
                .border_style(theme::highlighted()),
        );
    frame.render_widget(Clear, popup);
    frame.render_widget(dialog, popup);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [cell] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(row);
    cell
}
