mod app;
mod client;
mod config;
mod layout;
mod view;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use docqa_core::{Command, DocumentSource, RenderEngine, RenderError};
use docqa_render::PdfiumRenderFactory;
use docqa_tty::{EventMapper, InputMode, KittyRenderer, UiEvent};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::app::{App, AppEvent, Effect, Redraw};
use crate::client::RelayClient;
use crate::config::{Overrides, ViewerConfig, CONFIG_FILE};
use crate::layout::{hit_test, CellSize, Layout, Rect};

const MAX_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(
    name = "docqa",
    version,
    about = "Ask questions about a PDF while reading it in the terminal"
)]
struct Args {
    /// PDF to open: a local path or an http(s) URL
    document: String,

    /// Base URL of the chat relay
    #[arg(long, env = "DOCQA_API_BASE")]
    api_base: Option<String>,

    /// Ask before following pages the assistant mentions
    #[arg(long)]
    confirm_jumps: bool,

    /// Start with the thumbnail strip hidden
    #[arg(long)]
    no_thumbnails: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture);
        let _ = terminal::disable_raw_mode();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

/// Terminal geometry for one frame.
struct Screen {
    layout: Layout,
    cell: CellSize,
}

impl Screen {
    fn measure(show_thumbnails: bool) -> Result<Self> {
        let (cols, rows, width, height) = match terminal::window_size() {
            Ok(window) => (window.columns, window.rows, window.width, window.height),
            Err(_) => {
                let (cols, rows) = terminal::size()?;
                (cols, rows, 0, 0)
            }
        };
        Ok(Self {
            layout: Layout::compute(cols, rows, show_thumbnails),
            cell: CellSize::from_window(cols, rows, width, height),
        })
    }

    fn page_width(&self) -> f32 {
        self.cell.pixels(self.layout.page).0 as f32
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Runs [`Effect`]s on background tasks and reports back over `tx`.
struct Runtime {
    engine: RenderEngine,
    client: RelayClient,
    tx: UnboundedSender<AppEvent>,
}

impl Runtime {
    fn apply(&self, app: &mut App, effects: Vec<Effect>) -> Result<Flow> {
        for effect in effects {
            match effect {
                Effect::Render { page } => {
                    let width = Screen::measure(app.show_thumbnails())?.page_width();
                    let engine = self.engine.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = engine.render(page, Some(width)).await;
                        let _ = tx.send(AppEvent::Rendered { page, result });
                    });
                }
                Effect::Thumbnails { page } => {
                    let engine = self.engine.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        match engine.thumbnails(page).await {
                            Ok(added) => {
                                let _ = tx.send(AppEvent::ThumbnailsAdded(added));
                            }
                            Err(RenderError::NotReady) => {}
                            Err(err) => warn!(page, error = %err, "thumbnail generation failed"),
                        }
                    });
                }
                Effect::Zoom(Command::ZoomIn) => self.engine.zoom_in(),
                Effect::Zoom(Command::ZoomOut) => self.engine.zoom_out(),
                Effect::Zoom(Command::FitWidth) => self.engine.fit_width(),
                Effect::Zoom(other) => warn!(?other, "not a zoom command"),
                Effect::SendChat {
                    thread_id,
                    messages,
                } => {
                    let client = self.client.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let deltas = tx.clone();
                        let result = client
                            .stream_chat(&thread_id, &messages, move |text| {
                                deltas.send(AppEvent::ChatDelta(text)).is_ok()
                            })
                            .await;
                        let event = match result {
                            Ok(()) => AppEvent::ChatFinished,
                            Err(err) => {
                                warn!(error = %format!("{err:#}"), "chat request failed");
                                AppEvent::ChatFailed(format!("{err:#}"))
                            }
                        };
                        let _ = tx.send(event);
                    });
                }
                Effect::Copy(text) => match copy_to_clipboard(&text) {
                    Ok(()) => app.set_status(format!("copied {text}")),
                    Err(err) => {
                        warn!(error = %err, "clipboard unavailable");
                        app.set_status(format!("copy failed: {err}"));
                    }
                },
                Effect::Quit => return Ok(Flow::Quit),
            }
        }
        Ok(Flow::Continue)
    }
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(text.to_string())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "docqa", "docqa")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join(CONFIG_FILE));
    let config = ViewerConfig::load(&config_path)?.apply(&Overrides {
        api_base: args.api_base.clone(),
        confirm_jumps: args.confirm_jumps,
        hide_thumbnails: args.no_thumbnails,
    });
    let document = DocumentSource::parse(&args.document);
    info!(%document, api_base = %config.api_base, "starting viewer");

    let engine = RenderEngine::new(Arc::new(PdfiumRenderFactory::new()?));
    let client = RelayClient::new(config.api_base_url()?)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    {
        let engine = engine.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = engine.load(document).await.map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::Loaded(result));
        });
    }
    {
        let client = client.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = client.init_thread().await.map_err(|err| format!("{err:#}"));
            let _ = tx.send(AppEvent::ThreadReady(result));
        });
    }

    let runtime = Runtime { engine, client, tx };
    let mut app = App::new(
        config.jump_mode,
        config.show_thumbnails,
        config.page_debounce(),
    );
    let mut start_page = args.page;

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut mapper = EventMapper::new();
    let mut targets: Vec<(Rect, usize)> = Vec::new();
    let mut last_pending: Option<String> = None;

    loop {
        if !app.links_open() && mapper.mode() == InputMode::Links {
            mapper.set_mode(InputMode::Normal);
        }

        let redraw = app.take_redraw();
        let pending = mapper.pending_input();
        if redraw == Redraw::Full {
            let screen = Screen::measure(app.show_thumbnails())?;
            targets = view::draw_frame(
                &mut renderer,
                &app,
                &runtime.engine,
                &screen.layout,
                screen.cell,
                pending.as_deref(),
            )?;
        } else if redraw == Redraw::Chrome || pending != last_pending {
            let screen = Screen::measure(app.show_thumbnails())?;
            view::draw_chrome(
                &mut renderer,
                &app,
                &runtime.engine,
                &screen.layout,
                pending.as_deref(),
            )?;
        }
        last_pending = pending;

        if event::poll(poll_timeout(app.next_deadline(), Instant::now()))? {
            let effects = match event::read()? {
                Event::Resize(..) => app.invalidate(),
                ev => match mapper.map_event(ev) {
                    UiEvent::Click { column, row } => match hit_test(&targets, column, row) {
                        Some(page) => app.handle_ui(UiEvent::Command(Command::GotoPage { page })),
                        None => Vec::new(),
                    },
                    ui_event => app.handle_ui(ui_event),
                },
            };
            if runtime.apply(&mut app, effects)? == Flow::Quit {
                break;
            }
        }

        while let Ok(app_event) = rx.try_recv() {
            let loaded = matches!(app_event, AppEvent::Loaded(Ok(_)));
            let mut effects = app.handle_app(app_event, Instant::now());
            if loaded {
                if let Some(page) = start_page.take() {
                    effects.extend(app.handle_ui(UiEvent::Command(Command::GotoPage { page })));
                }
            }
            runtime.apply(&mut app, effects)?;
        }

        let effects = app.tick(Instant::now());
        runtime.apply(&mut app, effects)?;
    }

    renderer.delete_all()?;
    crossterm::execute!(
        renderer.writer(),
        Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    Ok(())
}

/// Waits for input no longer than the next debounce deadline.
fn poll_timeout(deadline: Option<Instant>, now: Instant) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(now).min(MAX_POLL),
        None => MAX_POLL,
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docqa-cli.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the viewer, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_waits_for_due_page_request() {
        let now = Instant::now();
        assert_eq!(poll_timeout(None, now), MAX_POLL);
        assert_eq!(
            poll_timeout(Some(now + Duration::from_millis(30)), now),
            Duration::from_millis(30)
        );
        assert_eq!(poll_timeout(Some(now + Duration::from_secs(5)), now), MAX_POLL);
        assert_eq!(poll_timeout(Some(now), now + Duration::from_millis(5)), Duration::ZERO);
    }

    #[test]
    fn args_accept_url_and_flags() {
        let args = Args::try_parse_from([
            "docqa",
            "https://example.com/deck.pdf",
            "--confirm-jumps",
            "--no-thumbnails",
            "--page",
            "3",
        ])
        .unwrap();
        assert_eq!(
            DocumentSource::parse(&args.document),
            DocumentSource::Url("https://example.com/deck.pdf".into())
        );
        assert!(args.confirm_jumps);
        assert!(args.no_thumbnails);
        assert_eq!(args.page, Some(3));
    }
}
