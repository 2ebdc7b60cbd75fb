//! Screen geometry and text layout. Nothing here touches the terminal.

use docqa_core::chat::PLACEHOLDER;
use docqa_core::text::HIGHLIGHT_MARK;
use docqa_core::{JumpMode, Message, Role};

pub const THUMB_COLS: u16 = 12;
pub const THUMB_ROWS: u16 = 5;
const CHAT_MIN_COLS: u16 = 24;
const CHAT_SHARE: f32 = 0.38;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub col: u16,
    pub row: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn contains(&self, col: u16, row: u16) -> bool {
        col >= self.col
            && col < self.col.saturating_add(self.width)
            && row >= self.row
            && row < self.row.saturating_add(self.height)
    }
}

/// Chat column on the left, page on the right, optional thumbnail strip under the
/// page and a status line at the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub chat: Rect,
    pub page: Rect,
    pub thumbnails: Option<Rect>,
    pub status_row: u16,
}

impl Layout {
    pub fn compute(cols: u16, rows: u16, show_thumbnails: bool) -> Self {
        let cols = cols.max(2);
        let rows = rows.max(2);
        let body_rows = rows - 1;

        let chat_cols = ((cols as f32 * CHAT_SHARE) as u16)
            .max(CHAT_MIN_COLS)
            .min(cols / 2);
        let page_col = chat_cols + 1;
        let page_cols = cols.saturating_sub(page_col).max(1);

        let strip_rows = if show_thumbnails && body_rows > THUMB_ROWS * 2 {
            THUMB_ROWS
        } else {
            0
        };
        let page_rows = body_rows - strip_rows;

        Self {
            chat: Rect {
                col: 0,
                row: 0,
                width: chat_cols,
                height: body_rows,
            },
            page: Rect {
                col: page_col,
                row: 0,
                width: page_cols,
                height: page_rows,
            },
            thumbnails: (strip_rows > 0).then_some(Rect {
                col: page_col,
                row: page_rows,
                width: page_cols,
                height: strip_rows,
            }),
            status_row: body_rows,
        }
    }
}

/// Terminal cell size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f32,
    pub height: f32,
}

impl CellSize {
    const FALLBACK: CellSize = CellSize {
        width: 8.0,
        height: 16.0,
    };

    /// Derives the cell size from the window size; terminals that do not report
    /// pixels get a common default.
    pub fn from_window(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        if cols == 0 || rows == 0 || pixel_width == 0 || pixel_height == 0 {
            return Self::FALLBACK;
        }
        Self {
            width: pixel_width as f32 / cols as f32,
            height: pixel_height as f32 / rows as f32,
        }
    }

    pub fn pixels(&self, area: Rect) -> (u32, u32) {
        (
            (area.width as f32 * self.width).floor() as u32,
            (area.height as f32 * self.height).floor() as u32,
        )
    }
}

/// Cells covered by an image drawn at its native pixel size, limited to `area`.
pub fn fit_cells(image_width: u32, image_height: u32, area: Rect, cell: CellSize) -> (u16, u16) {
    if image_width == 0 || image_height == 0 {
        return (area.width.max(1), area.height.max(1));
    }
    let cols = (image_width as f32 / cell.width).ceil().max(1.0);
    let rows = (image_height as f32 / cell.height).ceil().max(1.0);
    (
        (cols as u16).clamp(1, area.width.max(1)),
        (rows as u16).clamp(1, area.height.max(1)),
    )
}

/// Portion of an oversized page to show: horizontally centred, anchored at the top.
pub fn crop_window(image_width: u32, image_height: u32, max_width: u32, max_height: u32) -> (u32, u32, u32, u32) {
    let width = image_width.min(max_width.max(1));
    let height = image_height.min(max_height.max(1));
    let origin_x = (image_width - width) / 2;
    (origin_x, 0, width, height)
}

/// Thumbnail cells inside the strip, left to right, with one column between them.
pub fn thumbnail_slots(strip: Rect) -> Vec<Rect> {
    let stride = THUMB_COLS + 1;
    let count = ((strip.width + 1) / stride) as usize;
    (0..count)
        .map(|index| Rect {
            col: strip.col + index as u16 * stride,
            row: strip.row,
            width: THUMB_COLS,
            height: strip.height,
        })
        .collect()
}

/// Picks up to `capacity` rendered pages to show, keeping `current` (or its nearest
/// rendered neighbour) near the middle.
pub fn visible_thumbnails(pages: &[usize], current: usize, capacity: usize) -> Vec<usize> {
    if capacity == 0 || pages.is_empty() {
        return Vec::new();
    }
    if pages.len() <= capacity {
        return pages.to_vec();
    }
    let anchor = pages.partition_point(|&page| page < current);
    let start = anchor
        .saturating_sub(capacity / 2)
        .min(pages.len() - capacity);
    pages[start..start + capacity].to_vec()
}

pub fn hit_test(targets: &[(Rect, usize)], col: u16, row: u16) -> Option<usize> {
    targets
        .iter()
        .find(|(rect, _)| rect.contains(col, row))
        .map(|(_, page)| *page)
}

/// Transcript lines for a column `width` cells wide, keeping the most recent `height`.
pub fn transcript_lines(messages: &[Message], width: usize, height: usize) -> Vec<String> {
    let width = width.max(8);
    let mut lines = Vec::new();
    for message in messages {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        let label = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        lines.push(format!("{label}:"));
        let content = if message.content.is_empty() {
            PLACEHOLDER
        } else {
            message.content.as_str()
        };
        for paragraph in content.split('\n') {
            lines.extend(wrap(paragraph, width));
        }
    }
    let skip = lines.len().saturating_sub(height);
    lines.split_off(skip)
}

/// Greedy word wrap on character counts; words longer than `width` are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    if text.trim().is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_len = 0;
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if line_len > 0 {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if line_len == 0 { word.len() } else { line_len + 1 + word.len() };
        if needed > width && line_len > 0 {
            lines.push(std::mem::take(&mut line));
            line_len = 0;
        }
        if line_len > 0 {
            line.push(' ');
            line_len += 1;
        }
        line.extend(word.iter());
        line_len += word.len();
    }
    if line_len > 0 {
        lines.push(line);
    }
    lines
}

/// Splits a line on highlight marks into `(text, highlighted)` runs. `highlighted`
/// carries the state across lines so a mention wrapped onto two lines stays marked.
pub fn highlight_runs(line: &str, highlighted: &mut bool) -> Vec<(String, bool)> {
    let mut runs = Vec::new();
    for (index, part) in line.split(HIGHLIGHT_MARK).enumerate() {
        if index > 0 {
            *highlighted = !*highlighted;
        }
        if !part.is_empty() {
            runs.push((part.to_string(), *highlighted));
        }
    }
    runs
}

/// Inputs for the bottom status line.
#[derive(Debug, Default)]
pub struct StatusParts<'a> {
    pub document: Option<&'a str>,
    pub page: Option<(usize, usize)>,
    pub zoom: Option<&'a str>,
    pub jump_mode: JumpMode,
    pub offer: Option<usize>,
    pub streaming: bool,
    pub message: Option<&'a str>,
    pub pending_input: Option<&'a str>,
}

pub fn status_line(parts: &StatusParts<'_>) -> String {
    let mut segments: Vec<String> = Vec::new();
    if let Some(document) = parts.document {
        segments.push(document.to_string());
    }
    if let Some((current, count)) = parts.page {
        segments.push(format!("page {current}/{count}"));
    }
    if let Some(zoom) = parts.zoom {
        segments.push(zoom.to_string());
    }
    if parts.jump_mode == JumpMode::Confirm {
        segments.push("confirm jumps".to_string());
    }
    if let Some(page) = parts.offer {
        segments.push(format!("assistant suggests page {page} [Enter: go, x: dismiss]"));
    }
    if parts.streaming {
        segments.push("assistant is typing".to_string());
    }
    if let Some(message) = parts.message.filter(|m| !m.is_empty()) {
        segments.push(message.to_string());
    }
    if let Some(pending) = parts.pending_input.filter(|p| !p.is_empty()) {
        segments.push(pending.to_string());
    }
    segments.join(" | ")
}

/// Pads or truncates to exactly `width` characters, ending cut text with "...".
pub fn fit_to_width(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count > width {
        if width <= 3 {
            return text.chars().take(width).collect();
        }
        let mut truncated: String = text.chars().take(width - 3).collect();
        truncated.push_str("...");
        return truncated;
    }
    let mut padded = text.to_string();
    padded.extend(std::iter::repeat(' ').take(width - count));
    padded
}
