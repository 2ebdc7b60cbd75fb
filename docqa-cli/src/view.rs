use std::io::Write;

use anyhow::Result;
use crossterm::cursor;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{Clear, ClearType};
use docqa_core::{LinkKind, RenderEngine};
use docqa_tty::{DrawParams, ImageSlot, KittyRenderer};

use crate::app::App;
use crate::layout::{
    crop_window, fit_cells, fit_to_width, highlight_runs, status_line, thumbnail_slots,
    transcript_lines, visible_thumbnails, CellSize, Layout, Rect, StatusParts,
};

/// Full frame: page image, thumbnail strip and text. Returns the clickable
/// thumbnail areas with the page each one shows.
pub fn draw_frame<W: Write>(
    renderer: &mut KittyRenderer<W>,
    app: &App,
    engine: &RenderEngine,
    layout: &Layout,
    cell: CellSize,
    pending_input: Option<&str>,
) -> Result<Vec<(Rect, usize)>> {
    renderer.begin_sync_update()?;
    renderer.delete_all()?;
    renderer.clear_all()?;

    if let Some(page) = app.page() {
        let (max_width, max_height) = cell.pixels(layout.page);
        let (x, y, width, height) =
            crop_window(page.image.width, page.image.height, max_width, max_height);
        let image = if width < page.image.width || height < page.image.height {
            page.image.crop(x, y, width, height)
        } else {
            page.image.clone()
        };
        let (cols, rows) = fit_cells(image.width, image.height, layout.page, cell);
        let start_col = layout.page.col + (layout.page.width.saturating_sub(cols)) / 2;
        move_to(renderer.writer(), start_col, layout.page.row)?;
        renderer.draw(&image, DrawParams::clamped(cols.into(), rows.into()), ImageSlot::PAGE)?;
    } else if app.load_failed() {
        print_at(renderer.writer(), layout.page.col + 1, layout.page.row + 1, "failed to load")?;
    }

    let mut targets = Vec::new();
    if let (Some(strip), true) = (layout.thumbnails, app.show_thumbnails()) {
        let slots = thumbnail_slots(strip);
        let current = app.sync().current();
        let pages = visible_thumbnails(&engine.thumbnail_pages(), current, slots.len());
        for (index, (slot, page)) in slots.into_iter().zip(pages).enumerate() {
            let Some(image) = engine.thumbnail(page) else {
                continue;
            };
            let image_rows = slot.height.saturating_sub(1).max(1);
            let (cols, rows) = fit_cells(
                image.width,
                image.height,
                Rect {
                    height: image_rows,
                    ..slot
                },
                cell,
            );
            move_to(renderer.writer(), slot.col, slot.row)?;
            renderer.draw(
                &image,
                DrawParams::clamped(cols.into(), rows.into()),
                ImageSlot::thumbnail(index),
            )?;
            let label = fit_to_width(&format!("p{page}"), slot.width as usize);
            let label_row = slot.row + slot.height - 1;
            if page == current {
                print_reversed(renderer.writer(), slot.col, label_row, &label)?;
            } else {
                print_at(renderer.writer(), slot.col, label_row, &label)?;
            }
            targets.push((slot, page));
        }
    }

    draw_chrome(renderer, app, engine, layout, pending_input)?;
    renderer.end_sync_update()?;
    Ok(targets)
}

/// Redraws the text regions only; images stay where they are.
pub fn draw_chrome<W: Write>(
    renderer: &mut KittyRenderer<W>,
    app: &App,
    engine: &RenderEngine,
    layout: &Layout,
    pending_input: Option<&str>,
) -> Result<()> {
    let writer = renderer.writer();
    let chat = layout.chat;
    let width = chat.width.saturating_sub(1) as usize;
    let height = chat.height as usize;

    if app.links_open() {
        draw_links(writer, app, chat, width)?;
    } else {
        let lines = transcript_lines(app.conversation().messages(), width, height);
        let mut highlighted = false;
        for row in 0..height {
            let line = lines.get(row).map(String::as_str).unwrap_or("");
            move_to(writer, chat.col, chat.row + row as u16)?;
            let mut used = 0;
            for (text, marked) in highlight_runs(line, &mut highlighted) {
                used += text.chars().count();
                if marked {
                    crossterm::queue!(
                        writer,
                        SetAttribute(Attribute::Reverse),
                        Print(text),
                        SetAttribute(Attribute::Reset)
                    )?;
                } else {
                    crossterm::queue!(writer, Print(text))?;
                }
            }
            crossterm::queue!(writer, Print(" ".repeat(width.saturating_sub(used))))?;
        }
    }

    let document = app.document().map(|info| info.display_title());
    let page_count = app.sync().page_count();
    let zoom = engine.zoom_label();
    let status = status_line(&StatusParts {
        document: document.as_deref(),
        page: page_count.map(|count| (app.sync().current(), count)),
        zoom: page_count.map(|_| zoom.as_str()),
        jump_mode: app.jump_mode(),
        offer: app.sync().pending_offer(),
        streaming: app.conversation().is_streaming(),
        message: app.status(),
        pending_input,
    });
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, layout.status_row),
        Clear(ClearType::CurrentLine),
        Print(status)
    )?;
    writer.flush()?;
    Ok(())
}

fn draw_links<W: Write>(writer: &mut W, app: &App, area: Rect, width: usize) -> Result<()> {
    let links = app.links();
    let mut lines = vec![
        format!("Links on page {} (Enter copies, Esc closes)", app.sync().current()),
        String::new(),
    ];
    if links.is_empty() {
        lines.push("No links on this page".to_string());
    }
    for (index, link) in links.iter().enumerate() {
        let marker = if index == app.link_selection() { '>' } else { ' ' };
        let kind = match link.kind {
            LinkKind::Video(host) => format!("[video: {}] ", host.label()),
            LinkKind::Regular => String::new(),
        };
        lines.push(format!("{marker} {kind}{}", link.display_url));
    }

    for row in 0..area.height as usize {
        let line = lines.get(row).map(String::as_str).unwrap_or("");
        let text = fit_to_width(line, width);
        let selected = row >= 2 && row - 2 == app.link_selection() && !links.is_empty();
        if selected {
            print_reversed(writer, area.col, area.row + row as u16, &text)?;
        } else {
            print_at(writer, area.col, area.row + row as u16, &text)?;
        }
    }
    Ok(())
}

fn move_to<W: Write>(writer: &mut W, col: u16, row: u16) -> Result<()> {
    crossterm::queue!(writer, cursor::MoveTo(col, row))?;
    Ok(())
}

fn print_at<W: Write>(writer: &mut W, col: u16, row: u16, text: &str) -> Result<()> {
    crossterm::queue!(writer, cursor::MoveTo(col, row), Print(text))?;
    Ok(())
}

fn print_reversed<W: Write>(writer: &mut W, col: u16, row: u16, text: &str) -> Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(text),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use docqa_core::{
        document_id_for_source, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
        DocumentSource, JumpMode,
    };

    use crate::app::AppEvent;

    struct NoDocuments;

    #[async_trait]
    impl DocumentProvider for NoDocuments {
        async fn open(&self, _source: &DocumentSource) -> anyhow::Result<Arc<dyn DocumentBackend>> {
            anyhow::bail!("no documents in this test")
        }
    }

    fn chrome_for(title: Option<&str>) -> String {
        let source = DocumentSource::parse("/docs/rfp_v2.pdf");
        let info = DocumentInfo {
            id: document_id_for_source(&source),
            source,
            page_count: 8,
            metadata: DocumentMetadata {
                title: title.map(str::to_owned),
            },
        };
        let mut app = App::new(JumpMode::Immediate, false, Duration::from_millis(300));
        app.handle_app(AppEvent::Loaded(Ok(info)), Instant::now());

        let engine = RenderEngine::new(Arc::new(NoDocuments));
        let mut renderer = KittyRenderer::new(Vec::new());
        draw_chrome(
            &mut renderer,
            &app,
            &engine,
            &Layout::compute(120, 30, false),
            None,
        )
        .unwrap();
        String::from_utf8_lossy(renderer.writer()).into_owned()
    }

    #[test]
    fn status_line_shows_document_title() {
        let output = chrome_for(Some("Request for Proposal"));
        assert!(output.contains("Request for Proposal"), "{output}");
        assert!(!output.contains("rfp_v2.pdf"), "{output}");
    }

    #[test]
    fn status_line_falls_back_to_file_name() {
        let output = chrome_for(None);
        assert!(output.contains("rfp_v2.pdf"), "{output}");
    }
}
