//! Theme and styling constants for the TUI.

use ratatui::style::{Color, Modifier, Style};
use tasklist_proto::task::Priority;

/// Primary foreground color.
pub const FG_PRIMARY: Color = Color::White;

/// Secondary foreground color (dimmed text).
pub const FG_SECONDARY: Color = Color::Gray;

/// Highlight color for focused elements.
pub const HIGHLIGHT: Color = Color::Cyan;

/// Remote mode indicator color.
pub const SUCCESS: Color = Color::Green;

/// Busy indicator color.
pub const WARNING: Color = Color::Yellow;

/// Notice text color.
pub const ERROR: Color = Color::Red;

/// Local mode indicator color.
pub const LOCAL: Color = Color::LightBlue;

/// Row background for high priority tasks.
pub const PRIORITY_HIGH: Color = Color::Rgb(255, 204, 204);

/// Row background for medium priority tasks.
pub const PRIORITY_MEDIUM: Color = Color::Rgb(255, 255, 204);

/// Row background for low priority tasks.
pub const PRIORITY_LOW: Color = Color::Rgb(204, 255, 204);

/// Row background for completed tasks.
pub const COMPLETED_BG: Color = Color::Rgb(80, 80, 80);

/// Panel title color for the form.
pub const FORM_TITLE: Color = Color::Blue;

/// Panel title color for the tasks panel.
pub const TASKS_TITLE: Color = Color::Green;

/// Normal text style.
#[must_use]
pub fn normal() -> Style {
    Style::default().fg(FG_PRIMARY)
}

/// Dimmed text style (timestamps, metadata).
#[must_use]
pub fn dimmed() -> Style {
    Style::default().fg(FG_SECONDARY)
}

/// Bold text style.
#[must_use]
pub fn bold() -> Style {
    Style::default().fg(FG_PRIMARY).add_modifier(Modifier::BOLD)
}

/// Highlighted text style (focused panel borders).
#[must_use]
pub fn highlighted() -> Style {
    Style::default().fg(HIGHLIGHT).add_modifier(Modifier::BOLD)
}

/// Selected row marker style.
#[must_use]
pub fn selected() -> Style {
    Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED)
}

/// Row background for a priority.
#[must_use]
pub const fn priority_color(priority: Priority) -> Color {
    match priority {
        Priority::High => PRIORITY_HIGH,
        Priority::Medium => PRIORITY_MEDIUM,
        Priority::Low => PRIORITY_LOW,
    }
}

/// Style for a task row. Completed rows are gray and struck through.
#[must_use]
pub fn task_row(priority: Priority, completed: bool) -> Style {
    if completed {
        Style::default()
            .fg(FG_SECONDARY)
            .bg(COMPLETED_BG)
            .add_modifier(Modifier::CROSSED_OUT)
    } else {
        Style::default().fg(Color::Black).bg(priority_color(priority))
    }
}

/// Style for rows whose insert has not been confirmed yet.
#[must_use]
pub fn provisional() -> Style {
    dimmed().add_modifier(Modifier::ITALIC)
}

/// Style for the notice line.
#[must_use]
pub fn notice() -> Style {
    Style::default().fg(ERROR).add_modifier(Modifier::BOLD)
}

/// Style for the status bar background (dark background with white foreground).
#[must_use]
pub fn status_bar_bg() -> Style {
    Style::default().fg(Color::White).bg(Color::Rgb(30, 30, 50))
}

/// Style for panel titles with a given color (bold).
#[must_use]
pub fn panel_title(color: Color) -> Style {
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Border style for a panel, highlighted when focused.
#[must_use]
pub fn border(focused: bool) -> Style {
    if focused { highlighted() } else { normal() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_backgrounds() {
        assert_eq!(priority_color(Priority::High), Color::Rgb(255, 204, 204));
        assert_eq!(priority_color(Priority::Medium), Color::Rgb(255, 255, 204));
        assert_eq!(priority_color(Priority::Low), Color::Rgb(204, 255, 204));
    }

    #[test]
    fn completed_rows_struck_through() {
        let style = task_row(Priority::High, true);
        assert!(style.add_modifier.contains(Modifier::CROSSED_OUT));
        assert_eq!(style.bg, Some(COMPLETED_BG));

        let open = task_row(Priority::High, false);
        assert!(!open.add_modifier.contains(Modifier::CROSSED_OUT));
        assert_eq!(open.bg, Some(PRIORITY_HIGH));
    }
}
