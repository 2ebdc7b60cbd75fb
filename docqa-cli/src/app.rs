//! Viewer state. Terminal input and background results come in as events; work that
//! needs the engine, the network or the clipboard goes out as [`Effect`]s.

use std::time::{Duration, Instant};

use docqa_core::{
    Command, Conversation, Debouncer, DocumentInfo, JumpMode, Message, PageLink, PageOrigin,
    PageSync, RenderError, RenderedPage, SyncEvent,
};
use docqa_tty::UiEvent;
use tracing::{debug, info};

/// Results of background tasks, delivered to the UI loop over a channel.
#[derive(Debug)]
pub enum AppEvent {
    Loaded(Result<DocumentInfo, String>),
    ThreadReady(Result<String, String>),
    Rendered {
        page: usize,
        result: Result<RenderedPage, RenderError>,
    },
    ThumbnailsAdded(usize),
    ChatDelta(String),
    ChatFinished,
    ChatFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Render { page: usize },
    Thumbnails { page: usize },
    Zoom(Command),
    SendChat {
        thread_id: String,
        messages: Vec<Message>,
    },
    Copy(String),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Redraw {
    #[default]
    None,
    /// Text only: transcript, overlays and the status line.
    Chrome,
    /// Everything, including page and thumbnail images.
    Full,
}

pub struct App {
    conversation: Conversation,
    sync: PageSync,
    debouncer: Debouncer<usize>,
    document: Option<DocumentInfo>,
    load_failed: bool,
    page: Option<RenderedPage>,
    show_thumbnails: bool,
    links_open: bool,
    link_selection: usize,
    status: Option<String>,
    redraw: Redraw,
}

impl App {
    pub fn new(jump_mode: JumpMode, show_thumbnails: bool, debounce: Duration) -> Self {
        Self {
            conversation: Conversation::new(),
            sync: PageSync::new(jump_mode),
            debouncer: Debouncer::new(debounce),
            document: None,
            load_failed: false,
            page: None,
            show_thumbnails,
            links_open: false,
            link_selection: 0,
            status: Some("loading document".to_string()),
            redraw: Redraw::Full,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn sync(&self) -> &PageSync {
        &self.sync
    }

    pub fn document(&self) -> Option<&DocumentInfo> {
        self.document.as_ref()
    }

    pub fn page(&self) -> Option<&RenderedPage> {
        self.page.as_ref()
    }

    pub fn links(&self) -> &[PageLink] {
        self.page.as_ref().map(|page| page.links.as_slice()).unwrap_or(&[])
    }

    pub fn links_open(&self) -> bool {
        self.links_open
    }

    pub fn link_selection(&self) -> usize {
        self.link_selection
    }

    pub fn show_thumbnails(&self) -> bool {
        self.show_thumbnails
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
        self.mark(Redraw::Chrome);
    }

    pub fn load_failed(&self) -> bool {
        self.load_failed
    }

    /// When the next debounced page request is due, for the input poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn take_redraw(&mut self) -> Redraw {
        std::mem::take(&mut self.redraw)
    }

    /// Forces a full redraw, e.g. after the terminal was resized.
    pub fn invalidate(&mut self) -> Vec<Effect> {
        self.mark(Redraw::Full);
        self.render_current()
    }

    fn mark(&mut self, redraw: Redraw) {
        self.redraw = self.redraw.max(redraw);
    }

    pub fn handle_ui(&mut self, event: UiEvent) -> Vec<Effect> {
        match event {
            UiEvent::Command(command) => self.handle_command(command),
            // The typed prompt lives in the event mapper; only the echo needs repainting.
            UiEvent::BeginChat | UiEvent::ChatInputChanged { .. } | UiEvent::CancelChat => {
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            UiEvent::SubmitPrompt { text } => {
                self.mark(Redraw::Chrome);
                self.submit(&text)
            }
            UiEvent::OpenLinks => {
                self.links_open = true;
                self.link_selection = 0;
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            UiEvent::LinkMoveSelection { delta } => {
                let len = self.links().len();
                if len > 0 {
                    let next = (self.link_selection as isize + delta).clamp(0, len as isize - 1);
                    self.link_selection = next as usize;
                    self.mark(Redraw::Chrome);
                }
                Vec::new()
            }
            UiEvent::CopyLink => match self.links().get(self.link_selection) {
                Some(link) => vec![Effect::Copy(link.url.clone())],
                None => Vec::new(),
            },
            UiEvent::CloseOverlay => {
                self.links_open = false;
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            // Clicks are resolved to pages by the caller, which knows the layout.
            UiEvent::Click { .. } | UiEvent::None => Vec::new(),
            UiEvent::Quit => vec![Effect::Quit],
        }
    }

    fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::ZoomIn | Command::ZoomOut | Command::FitWidth => {
                let mut effects = vec![Effect::Zoom(command)];
                effects.extend(self.render_current());
                effects
            }
            Command::ToggleThumbnails => {
                self.show_thumbnails = !self.show_thumbnails;
                self.mark(Redraw::Full);
                if self.show_thumbnails && self.document.is_some() {
                    vec![Effect::Thumbnails {
                        page: self.sync.current(),
                    }]
                } else {
                    Vec::new()
                }
            }
            Command::ToggleJumpMode => {
                let mode = match self.sync.mode() {
                    JumpMode::Immediate => JumpMode::Confirm,
                    JumpMode::Confirm => JumpMode::Immediate,
                };
                info!(?mode, "jump mode changed");
                self.sync.set_mode(mode);
                self.mark(Redraw::Chrome);
                self.drain_sync()
            }
            command => {
                self.sync.apply(&command);
                self.drain_sync()
            }
        }
    }

    fn submit(&mut self, text: &str) -> Vec<Effect> {
        match self.conversation.begin_turn(text) {
            Ok(messages) => {
                let Some(thread_id) = self.conversation.thread_id().map(str::to_string) else {
                    return Vec::new();
                };
                vec![Effect::SendChat {
                    thread_id,
                    messages,
                }]
            }
            Err(err) => {
                self.set_status(err.to_string());
                Vec::new()
            }
        }
    }

    pub fn handle_app(&mut self, event: AppEvent, now: Instant) -> Vec<Effect> {
        match event {
            AppEvent::Loaded(Ok(info)) => {
                info!(document = %info.source, pages = info.page_count, "document ready");
                self.status = None;
                self.load_failed = false;
                self.sync.set_page_count(info.page_count);
                self.document = Some(info);
                self.mark(Redraw::Full);
                let mut effects = self.drain_sync();
                if !effects.iter().any(|e| matches!(e, Effect::Render { .. })) {
                    effects.extend(self.render_current());
                }
                effects
            }
            AppEvent::Loaded(Err(reason)) => {
                self.load_failed = true;
                self.set_status(format!("failed to load document: {reason}"));
                Vec::new()
            }
            AppEvent::ThreadReady(Ok(thread_id)) => {
                self.conversation.set_thread_id(thread_id);
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            AppEvent::ThreadReady(Err(reason)) => {
                self.set_status(format!("chat unavailable: {reason}"));
                Vec::new()
            }
            AppEvent::Rendered { page, result } => self.rendered(page, result),
            AppEvent::ThumbnailsAdded(added) => {
                if added > 0 && self.show_thumbnails {
                    self.mark(Redraw::Full);
                }
                Vec::new()
            }
            AppEvent::ChatDelta(text) => {
                if let Some(page) = self.conversation.apply_delta(&text) {
                    debug!(page, "assistant mentioned a page");
                    self.debouncer.push(page, now);
                }
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            AppEvent::ChatFinished => {
                self.conversation.finish();
                self.mark(Redraw::Chrome);
                Vec::new()
            }
            AppEvent::ChatFailed(reason) => {
                self.conversation.fail(&reason);
                self.mark(Redraw::Chrome);
                Vec::new()
            }
        }
    }

    /// Releases a debounced page request once it is due.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.debouncer.poll(now) {
            Some(page) => {
                self.sync.request(page);
                self.drain_sync()
            }
            None => Vec::new(),
        }
    }

    fn rendered(&mut self, page: usize, result: Result<RenderedPage, RenderError>) -> Vec<Effect> {
        match result {
            Ok(rendered) if rendered.page == self.sync.current() => {
                if self.links_open {
                    self.link_selection = 0;
                }
                self.page = Some(rendered);
                self.mark(Redraw::Full);
                if self.show_thumbnails {
                    vec![Effect::Thumbnails { page }]
                } else {
                    Vec::new()
                }
            }
            Ok(stale) => {
                debug!(page = stale.page, "dropping render of a page no longer shown");
                Vec::new()
            }
            Err(err) if err.is_cancelled() => Vec::new(),
            Err(err) => {
                self.set_status(format!("failed to render page {page}: {err}"));
                Vec::new()
            }
        }
    }

    fn render_current(&mut self) -> Vec<Effect> {
        if self.document.is_none() {
            return Vec::new();
        }
        vec![Effect::Render {
            page: self.sync.current(),
        }]
    }

    fn drain_sync(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for event in self.sync.drain_events() {
            match event {
                SyncEvent::PageChanged { page, origin } => {
                    debug!(page, ?origin, "page changed");
                    if origin == PageOrigin::Assistant {
                        self.status = Some(format!("jumped to page {page}"));
                    }
                    if self.document.is_some() {
                        effects.retain(|e| !matches!(e, Effect::Render { .. }));
                        effects.push(Effect::Render { page });
                    }
                }
                SyncEvent::JumpOffered { page } => {
                    debug!(page, "page jump offered");
                }
                SyncEvent::OfferCleared => {}
            }
            self.mark(Redraw::Chrome);
        }
        effects
    }

    pub fn jump_mode(&self) -> JumpMode {
        self.sync.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{DocumentMetadata, DocumentSource, RenderImage};
    use std::path::PathBuf;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn info(page_count: usize) -> DocumentInfo {
        let source = DocumentSource::Path(PathBuf::from("/docs/rfp.pdf"));
        DocumentInfo {
            id: docqa_core::document_id_for_source(&source),
            source,
            page_count,
            metadata: DocumentMetadata::default(),
        }
    }

    fn rendered(page: usize) -> RenderedPage {
        RenderedPage {
            page,
            scale: 1.0,
            image: RenderImage::blank(10, 10),
            links: Vec::new(),
        }
    }

    fn ready_app(mode: JumpMode) -> (App, Instant) {
        let mut app = App::new(mode, false, DEBOUNCE);
        let now = Instant::now();
        let effects = app.handle_app(AppEvent::Loaded(Ok(info(12))), now);
        assert_eq!(effects, vec![Effect::Render { page: 1 }]);
        app.handle_app(AppEvent::ThreadReady(Ok("thread_1".into())), now);
        (app, now)
    }

    #[test]
    fn navigation_renders_target_page() {
        let (mut app, _) = ready_app(JumpMode::Immediate);
        let effects = app.handle_ui(UiEvent::Command(Command::NextPage { count: 3 }));
        assert_eq!(effects, vec![Effect::Render { page: 4 }]);
        let effects = app.handle_ui(UiEvent::Command(Command::GotoPage { page: usize::MAX }));
        assert_eq!(effects, vec![Effect::Render { page: 12 }]);
    }

    #[test]
    fn submit_sends_conversation_to_relay() {
        let (mut app, _) = ready_app(JumpMode::Immediate);
        let effects = app.handle_ui(UiEvent::SubmitPrompt {
            text: "Where is the budget?".into(),
        });
        assert_eq!(
            effects,
            vec![Effect::SendChat {
                thread_id: "thread_1".into(),
                messages: vec![Message::user("Where is the budget?")],
            }]
        );
        assert!(app.conversation().is_streaming());
    }

    #[test]
    fn submit_without_thread_reports_status() {
        let mut app = App::new(JumpMode::Immediate, false, DEBOUNCE);
        let effects = app.handle_ui(UiEvent::SubmitPrompt { text: "hi".into() });
        assert!(effects.is_empty());
        assert_eq!(app.status(), Some("conversation thread is not initialized yet"));
    }

    #[test]
    fn page_mentions_are_debounced_into_one_jump() {
        let (mut app, start) = ready_app(JumpMode::Immediate);
        app.handle_ui(UiEvent::SubmitPrompt { text: "where?".into() });

        app.handle_app(AppEvent::ChatDelta("See page 3".into()), start);
        assert!(app.tick(start + Duration::from_millis(100)).is_empty());
        // Only the first mention of the reply counts; later text does not move it.
        app.handle_app(
            AppEvent::ChatDelta(", then page 9".into()),
            start + Duration::from_millis(200),
        );
        assert!(app.tick(start + Duration::from_millis(299)).is_empty());

        let effects = app.tick(start + Duration::from_millis(300));
        assert_eq!(effects, vec![Effect::Render { page: 3 }]);
        assert_eq!(app.sync().current(), 3);
        assert!(app.tick(start + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn confirm_mode_waits_for_acceptance() {
        let (mut app, start) = ready_app(JumpMode::Confirm);
        app.handle_ui(UiEvent::SubmitPrompt { text: "where?".into() });
        app.handle_app(AppEvent::ChatDelta("Check slide 5.".into()), start);

        assert!(app.tick(start + DEBOUNCE).is_empty());
        assert_eq!(app.sync().pending_offer(), Some(5));
        assert_eq!(app.sync().current(), 1);

        let effects = app.handle_ui(UiEvent::Command(Command::AcceptJump));
        assert_eq!(effects, vec![Effect::Render { page: 5 }]);
        assert_eq!(app.sync().pending_offer(), None);
    }

    #[test]
    fn toggling_jump_mode_applies_a_waiting_offer() {
        let (mut app, start) = ready_app(JumpMode::Confirm);
        app.handle_ui(UiEvent::SubmitPrompt { text: "where?".into() });
        app.handle_app(AppEvent::ChatDelta("Look at page 6".into()), start);
        app.tick(start + DEBOUNCE);
        assert_eq!(app.sync().pending_offer(), Some(6));

        let effects = app.handle_ui(UiEvent::Command(Command::ToggleJumpMode));
        assert_eq!(app.jump_mode(), JumpMode::Immediate);
        assert_eq!(effects, vec![Effect::Render { page: 6 }]);

        assert!(app
            .handle_ui(UiEvent::Command(Command::ToggleJumpMode))
            .is_empty());
        assert_eq!(app.jump_mode(), JumpMode::Confirm);
    }

    #[test]
    fn requests_before_load_apply_once_ready() {
        let mut app = App::new(JumpMode::Immediate, false, DEBOUNCE);
        let now = Instant::now();
        app.handle_app(AppEvent::ThreadReady(Ok("thread_1".into())), now);
        app.handle_ui(UiEvent::SubmitPrompt { text: "q".into() });
        app.handle_app(AppEvent::ChatDelta("page 40".into()), now);
        assert!(app.tick(now + DEBOUNCE).is_empty());

        let effects = app.handle_app(AppEvent::Loaded(Ok(info(12))), now);
        assert_eq!(effects, vec![Effect::Render { page: 12 }]);
    }

    #[test]
    fn stale_and_cancelled_renders_are_ignored() {
        let (mut app, now) = ready_app(JumpMode::Immediate);
        app.handle_ui(UiEvent::Command(Command::GotoPage { page: 2 }));
        app.take_redraw();

        app.handle_app(
            AppEvent::Rendered {
                page: 1,
                result: Ok(rendered(1)),
            },
            now,
        );
        app.handle_app(
            AppEvent::Rendered {
                page: 1,
                result: Err(RenderError::Cancelled { page: 1 }),
            },
            now,
        );
        assert!(app.page().is_none());
        assert_eq!(app.take_redraw(), Redraw::None);

        app.handle_app(
            AppEvent::Rendered {
                page: 2,
                result: Ok(rendered(2)),
            },
            now,
        );
        assert_eq!(app.page().map(|p| p.page), Some(2));
        assert_eq!(app.take_redraw(), Redraw::Full);
    }

    #[test]
    fn zoom_rerenders_current_page() {
        let (mut app, _) = ready_app(JumpMode::Immediate);
        let effects = app.handle_ui(UiEvent::Command(Command::ZoomIn));
        assert_eq!(
            effects,
            vec![Effect::Zoom(Command::ZoomIn), Effect::Render { page: 1 }]
        );
    }

    #[test]
    fn thumbnails_follow_renders_when_visible() {
        let (mut app, now) = ready_app(JumpMode::Immediate);
        let effects = app.handle_ui(UiEvent::Command(Command::ToggleThumbnails));
        assert_eq!(effects, vec![Effect::Thumbnails { page: 1 }]);
        let effects = app.handle_app(
            AppEvent::Rendered {
                page: 1,
                result: Ok(rendered(1)),
            },
            now,
        );
        assert_eq!(effects, vec![Effect::Thumbnails { page: 1 }]);
    }

    #[test]
    fn failed_reply_shows_generic_message() {
        let (mut app, now) = ready_app(JumpMode::Immediate);
        app.handle_ui(UiEvent::SubmitPrompt { text: "hi".into() });
        app.handle_app(AppEvent::ChatFailed("connection refused".into()), now);
        let last = app.conversation().messages().last().unwrap();
        assert_eq!(last.content, docqa_core::chat::GENERIC_FAILURE);
        assert!(!app.conversation().is_streaming());
    }

    #[test]
    fn failed_load_is_reported() {
        let mut app = App::new(JumpMode::Immediate, true, DEBOUNCE);
        let effects = app.handle_app(AppEvent::Loaded(Err("not a PDF".into())), Instant::now());
        assert!(effects.is_empty());
        assert!(app.load_failed());
        assert_eq!(app.status(), Some("failed to load document: not a PDF"));
        assert!(app
            .handle_ui(UiEvent::Command(Command::NextPage { count: 1 }))
            .is_empty());
    }
}
