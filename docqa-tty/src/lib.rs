use std::io::Write;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{
        Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
        MouseEventKind,
    },
    terminal::{Clear, ClearType},
};
use docqa_core::{Command, RenderImage};
use png::{BitDepth, ColorType, Encoder};

const CHUNK_SIZE: usize = 4096;

/// Kitty image and placement ids. Drawing into a slot replaces what it showed before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlot {
    pub image_id: u32,
    pub placement_id: u32,
}

impl ImageSlot {
    pub const PAGE: ImageSlot = ImageSlot {
        image_id: 1,
        placement_id: 1,
    };

    /// Slot of the `index`-th visible thumbnail.
    pub fn thumbnail(index: usize) -> Self {
        let id = 100 + index as u32;
        Self {
            image_id: id,
            placement_id: 1,
        }
    }
}

pub struct KittyRenderer<W: Write> {
    writer: W,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, scaled into the cell box.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams, slot: ImageSlot) -> Result<()> {
        if image.is_empty() {
            return Ok(());
        }
        let encoded = BASE64.encode(encode_png(image)?);
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    slot.image_id,
                    slot.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            self.writer.write_all(b";")?;
            self.writer.write_all(chunk)?;
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the image in `slot` and frees its data.
    pub fn delete(&mut self, slot: ImageSlot) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,q=2,i={}\u{1b}\\", slot.image_id)?;
        Ok(())
    }

    pub fn delete_all(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal shows the buffered frame at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn encode_png(image: &RenderImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(buffer)
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    BeginChat,
    ChatInputChanged { input: String },
    SubmitPrompt { text: String },
    CancelChat,
    OpenLinks,
    LinkMoveSelection { delta: isize },
    CopyLink,
    CloseOverlay,
    Click { column: u16, row: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Chat,
    Links,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    chat_buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.chat_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        if let Event::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            ..
        }) = event
        {
            return UiEvent::Click { column, row };
        }
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event
        else {
            return UiEvent::None;
        };
        // Terminals with enhanced keyboard reporting also send releases.
        if kind == KeyEventKind::Release {
            return UiEvent::None;
        }
        if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            return UiEvent::Quit;
        }

        match self.mode {
            InputMode::Normal => self.map_key_normal(code, modifiers),
            InputMode::Chat => self.map_key_chat(code, modifiers),
            InputMode::Links => self.map_key_links(code, modifiers),
        }
    }

    fn map_key_normal(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        let plain = modifiers.is_empty() || modifiers == KeyModifiers::SHIFT;
        if !plain {
            self.reset_count();
            return UiEvent::None;
        }

        match code {
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            KeyCode::Char('j') | KeyCode::Down | KeyCode::Right | KeyCode::PageDown => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            KeyCode::Char('k') | KeyCode::Up | KeyCode::Left | KeyCode::PageUp => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            KeyCode::Char('g') | KeyCode::Home => {
                let page = self.take_count();
                UiEvent::Command(Command::GotoPage { page })
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.reset_count();
                UiEvent::Command(Command::GotoPage { page: usize::MAX })
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.command(Command::ZoomIn),
            KeyCode::Char('-') => self.command(Command::ZoomOut),
            KeyCode::Char('w') => self.command(Command::FitWidth),
            KeyCode::Char('t') => self.command(Command::ToggleThumbnails),
            KeyCode::Enter | KeyCode::Char('y') => self.command(Command::AcceptJump),
            KeyCode::Char('x') => self.command(Command::DismissJump),
            KeyCode::Char('m') => self.command(Command::ToggleJumpMode),
            KeyCode::Char('i') => {
                self.set_mode(InputMode::Chat);
                UiEvent::BeginChat
            }
            KeyCode::Char('l') => {
                self.set_mode(InputMode::Links);
                UiEvent::OpenLinks
            }
            KeyCode::Char('q') => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_chat(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::CancelChat
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.chat_buffer);
                self.set_mode(InputMode::Normal);
                UiEvent::SubmitPrompt { text }
            }
            KeyCode::Backspace => {
                self.chat_buffer.pop();
                UiEvent::ChatInputChanged {
                    input: self.chat_buffer.clone(),
                }
            }
            KeyCode::Char(c) if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT => {
                self.chat_buffer.push(c);
                UiEvent::ChatInputChanged {
                    input: self.chat_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn map_key_links(&mut self, code: KeyCode, _modifiers: KeyModifiers) -> UiEvent {
        match code {
            KeyCode::Esc | KeyCode::Char('l') => {
                self.set_mode(InputMode::Normal);
                UiEvent::CloseOverlay
            }
            KeyCode::Char('j') | KeyCode::Down => UiEvent::LinkMoveSelection { delta: 1 },
            KeyCode::Char('k') | KeyCode::Up => UiEvent::LinkMoveSelection { delta: -1 },
            KeyCode::Enter | KeyCode::Char('y') => UiEvent::CopyLink,
            KeyCode::Char('q') => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn command(&mut self, command: Command) -> UiEvent {
        self.reset_count();
        UiEvent::Command(command)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Text to echo on the status line: the typed prompt, or a pending count.
    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Chat => Some(format!("> {}", self.chat_buffer)),
            _ if !self.pending_digits.is_empty() => Some(self.pending_digits.clone()),
            _ => None,
        }
    }
}
