//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::{App, Focus};
use crate::remote::StoreMode;
use crate::tasks::state::TaskList;

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App, list: &TaskList, mode: StoreMode) {
    let help_text = if app.confirm_delete.is_some() {
        "y: delete | n/Esc: cancel"
    } else {
        match app.focus {
            Focus::Title => "Enter: add | Tab: next field | ^R: reload | Esc: quit",
            Focus::Category | Focus::Priority => {
                "←→/Space: change | Enter: add | Tab: next field | Esc: quit"
            }
            Focus::List => "↑↓/jk: select | Space: done | d: delete | Tab: form | Esc: quit",
        }
    };

    let mode_color = match mode {
        StoreMode::Remote => theme::SUCCESS,
        StoreMode::Local => theme::LOCAL,
    };

    let (busy_color, busy_text) = if list.is_loading() {
        (theme::WARNING, "Loading...".to_string())
    } else if list.in_flight() > 0 {
        (theme::WARNING, format!("Saving {}", list.in_flight()))
    } else {
        (theme::FG_SECONDARY, "Ready".to_string())
    };

    let status_line = Line::from(vec![
        Span::styled(
            concat!("Tasklist v", env!("CARGO_PKG_VERSION")),
            theme::bold(),
        ),
        Span::raw(" | "),
        Span::styled("●", theme::normal().fg(mode_color)),
        Span::raw(format!(" {mode}")),
        Span::raw(" | "),
        Span::styled(busy_text, theme::normal().fg(busy_color)),
        Span::raw(" | "),
        Span::styled(help_text, theme::dimmed()),
    ]);

    let paragraph = Paragraph::new(status_line).style(theme::status_bar_bg());
    frame.render_widget(paragraph, area);
}
