//! Application state and key handling.
//!
//! [`App`] holds what only the terminal cares about: focus, cursor,
//! selection, the delete dialog. Task data lives in the controller's
//! [`TaskList`]; key handling edits its drafts directly and returns a
//! [`Command`] when a store operation is needed.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tasklist_proto::task::TaskId;

use crate::tasks::state::TaskList;

/// Which part of the screen receives keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// Title input (default).
    Title,
    /// Category selector.
    Category,
    /// Priority selector.
    Priority,
    /// Task list.
    List,
}

impl Focus {
    const fn next(self) -> Self {
        match self {
            Self::Title => Self::Category,
            Self::Category => Self::Priority,
            Self::Priority => Self::List,
            Self::List => Self::Title,
        }
    }

    const fn prev(self) -> Self {
        match self {
            Self::Title => Self::List,
            Self::Category => Self::Title,
            Self::Priority => Self::Category,
            Self::List => Self::Priority,
        }
    }
}

/// A store operation requested by a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Create a task from the drafts.
    Submit,
    /// Flip a task's completion flag.
    Toggle {
        /// Task to update.
        id: TaskId,
        /// Flag as currently shown.
        current: bool,
    },
    /// Delete a task. The user has already confirmed.
    Remove {
        /// Task to delete.
        id: TaskId,
    },
    /// Fetch the list again.
    Reload,
}

/// Main application state.
#[derive(Debug)]
pub struct App {
    /// Which part of the screen is focused.
    pub focus: Focus,
    /// Cursor position in the title (character index).
    pub cursor_position: usize,
    /// Selected row in the task list.
    pub selected: usize,
    /// Task awaiting delete confirmation.
    pub confirm_delete: Option<TaskId>,
    /// `created_at` display format.
    pub timestamp_format: String,
    /// Whether the app should quit.
    pub should_quit: bool,
}

impl App {
    /// Creates the app with the title input focused.
    #[must_use]
    pub fn new() -> Self {
        Self {
            focus: Focus::Title,
            cursor_position: 0,
            selected: 0,
            confirm_delete: None,
            timestamp_format: "%b %d %H:%M".to_string(),
            should_quit: false,
        }
    }

    /// Sets the `created_at` display format.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Handles a key press against the current list.
    ///
    /// Keys that would change anything are ignored while a load is
    /// outstanding; navigation and quitting always work.
    pub fn handle_key_event(&mut self, key: KeyEvent, list: &mut TaskList) -> Option<Command> {
        self.clamp_selection(list.entries().len());

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return None;
        }
        if key.code == KeyCode::Char('r') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Some(Command::Reload);
        }

        let busy = list.is_loading();

        if let Some(id) = self.confirm_delete {
            return self.handle_confirm_key(key, id, busy);
        }

        match key.code {
            KeyCode::Esc => {
                if list.notice().is_some() {
                    list.clear_notice();
                } else {
                    self.should_quit = true;
                }
                return None;
            }
            KeyCode::Tab => {
                self.focus = self.focus.next();
                return None;
            }
            KeyCode::BackTab => {
                self.focus = self.focus.prev();
                return None;
            }
            _ => {}
        }

        match self.focus {
            Focus::Title => self.handle_title_key(key, list, busy),
            Focus::Category | Focus::Priority => self.handle_selector_key(key, list, busy),
            Focus::List => self.handle_list_key(key, list, busy),
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent, id: TaskId, busy: bool) -> Option<Command> {
        match key.code {
            KeyCode::Char('y' | 'Y') if !busy => {
                self.confirm_delete = None;
                Some(Command::Remove { id })
            }
            KeyCode::Char('n' | 'N') | KeyCode::Esc => {
                self.confirm_delete = None;
                None
            }
            _ => None,
        }
    }

    fn handle_title_key(&mut self, key: KeyEvent, list: &mut TaskList, busy: bool) -> Option<Command> {
        if busy {
            return None;
        }
        let title = &mut list.drafts_mut().title;
        // Drafts change underneath us on submit and rollback.
        self.cursor_position = self.cursor_position.min(title.chars().count());
        match key.code {
            KeyCode::Enter => {
                self.cursor_position = 0;
                return Some(Command::Submit);
            }
            KeyCode::Char(c) => {
                title.insert(byte_index(title, self.cursor_position), c);
                self.cursor_position += 1;
            }
            KeyCode::Backspace => {
                if self.cursor_position > 0 {
                    self.cursor_position -= 1;
                    title.remove(byte_index(title, self.cursor_position));
                }
            }
            KeyCode::Left => self.cursor_position = self.cursor_position.saturating_sub(1),
            KeyCode::Right => {
                self.cursor_position = (self.cursor_position + 1).min(title.chars().count());
            }
            KeyCode::Home => self.cursor_position = 0,
            KeyCode::End => self.cursor_position = title.chars().count(),
            _ => {}
        }
        None
    }

    fn handle_selector_key(
        &self,
        key: KeyEvent,
        list: &mut TaskList,
        busy: bool,
    ) -> Option<Command> {
        if busy {
            return None;
        }
        match key.code {
            KeyCode::Enter => Some(Command::Submit),
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ' | 'h' | 'l') => {
                let drafts = list.drafts_mut();
                if self.focus == Focus::Category {
                    drafts.category = drafts.category.next();
                } else {
                    drafts.priority = drafts.priority.next();
                }
                None
            }
            _ => None,
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent, list: &TaskList, busy: bool) -> Option<Command> {
        let len = list.entries().len();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < len {
                    self.selected += 1;
                }
                None
            }
            _ if busy => None,
            KeyCode::Char(' ' | 'c') | KeyCode::Enter => {
                let entry = list.entries().get(self.selected)?;
                entry.id().map(|id| Command::Toggle {
                    id,
                    current: entry.completed(),
                })
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                // Rows still being inserted have no id to delete by.
                self.confirm_delete = list.entries().get(self.selected)?.id();
                None
            }
            _ => None,
        }
    }

    /// Keeps the selection inside a list of `len` rows.
    pub const fn clamp_selection(&mut self, len: usize) {
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_index(s: &str, char_index: usize) -> usize {
    s.char_indices().nth(char_index).map_or(s.len(), |(i, _)| i)
}
