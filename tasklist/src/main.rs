//! `tasklist`: terminal task list backed by a hosted task store.
//!
//! Connects to a `tasklist-server` when a store URL is given; otherwise tasks
//! live in memory for this session. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/tasklist/config.toml`).
//!
//! ```bash
//! # Local mode
//! cargo run --bin tasklist
//!
//! # Against a store
//! cargo run --bin tasklist -- --store-url ws://127.0.0.1:9100/ws
//!
//! # Or via environment variables
//! TASKLIST_STORE_URL=ws://127.0.0.1:9100/ws cargo run --bin tasklist
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing_appender::non_blocking::WorkerGuard;

use tasklist::app::{App, Command};
use tasklist::config::{CliArgs, ClientConfig};
use tasklist::controller::Controller;
use tasklist::remote::RemoteStore;
use tasklist::remote::memory::MemoryStore;
use tasklist::remote::ws::WsStore;
use tasklist::ui;

type Term = Terminal<CrosstermBackend<io::Stdout>>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; ratatui owns stdout.
    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!("tasklist starting");

    // Connect before taking over the terminal so failures are readable.
    let remote = match config.store_url.as_deref() {
        Some(url) => match WsStore::connect(url, config.connect_options()).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(url, error = %e, "store unreachable, using local mode");
                eprintln!("Could not reach task store at {url}: {e}. Running in local mode.");
                None
            }
        },
        None => None,
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = match remote {
        Some(store) => run_app(&mut terminal, store, &config).await,
        None => {
            let store = MemoryStore::with_feed_buffer(config.feed_buffer);
            run_app(&mut terminal, store, &config).await
        }
    };

    // Restore terminal.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tracing::info!("tasklist exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasklist.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Main application loop.
async fn run_app<S: RemoteStore>(
    terminal: &mut Term,
    store: S,
    config: &ClientConfig,
) -> io::Result<()> {
    let controller = Arc::new(Controller::new(store, config.channel.clone()));
    let mut app = App::new().with_timestamp_format(config.timestamp_format.clone());

    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            // Failures surface as notices.
            let _ = controller.start().await;
        });
    }

    loop {
        let mode = controller.mode();
        terminal.draw(|frame| controller.with_state(|list| ui::draw(frame, &app, list, mode)))?;

        // A store reply may land while blocked in poll; the next draw picks it up.
        if event::poll(config.poll_timeout)?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let command = controller.update_state(|list| app.handle_key_event(key, list));
            if let Some(command) = command {
                dispatch(&controller, command);
            }
        }

        if app.should_quit {
            controller.shutdown();
            // Give the unsubscribe a moment to reach the store.
            tokio::task::yield_now().await;
            return Ok(());
        }
    }
}

/// Run a command in the background. Outcomes are reflected in the list.
fn dispatch<S: RemoteStore>(controller: &Arc<Controller<S>>, command: Command) {
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        let result = match command {
            Command::Submit => controller.submit().await.map(|_| ()),
            Command::Toggle { id, current } => controller.toggle_completion(id, current).await,
            // The dialog already asked.
            Command::Remove { id } => controller.remove(id, |_| true).await.map(|_| ()),
            Command::Reload => controller.load().await,
        };
        if let Err(e) = result {
            tracing::debug!(?command, error = %e, "command failed");
        }
    });
}
