//! Thumbnail strip: candidate selection, cover-fit rasters and an add-only cache.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::{DocumentBackend, PageSize, RenderImage, RenderRequest};

pub const THUMBNAIL_WIDTH: u32 = 160;
pub const THUMBNAIL_HEIGHT: u32 = 90;
/// Pages always offered at each end of the document.
pub const EDGE_PAGES: usize = 3;
/// Pages offered on each side of the current page.
pub const WINDOW_RADIUS: usize = 5;
const COVER_OVERSCAN: f32 = 1.2;

/// Pages that should have a thumbnail when `current` is shown, ascending.
pub fn candidate_pages(current: usize, page_count: usize) -> BTreeSet<usize> {
    let mut pages = BTreeSet::new();
    if page_count == 0 {
        return pages;
    }
    let current = current.clamp(1, page_count);

    pages.extend(1..=EDGE_PAGES.min(page_count));
    pages.extend(page_count.saturating_sub(EDGE_PAGES - 1).max(1)..=page_count);
    let start = current.saturating_sub(WINDOW_RADIUS).max(1);
    let end = (current + WINDOW_RADIUS).min(page_count);
    pages.extend(start..=end);
    pages
}

pub fn thumbnail_scale(size: PageSize) -> f32 {
    if size.width <= 0.0 || size.height <= 0.0 {
        return 1.0;
    }
    let scale_x = THUMBNAIL_WIDTH as f32 / size.width;
    let scale_y = THUMBNAIL_HEIGHT as f32 / size.height;
    scale_x.max(scale_y) * COVER_OVERSCAN
}

/// Clips a cover-scaled raster into the thumbnail frame: centred horizontally, top aligned.
pub fn fit_thumbnail(image: &RenderImage) -> RenderImage {
    let mut frame = RenderImage::blank(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
    if image.is_empty() {
        return frame;
    }

    let offset_x = (THUMBNAIL_WIDTH as i64 - image.width as i64) / 2;
    let rows = image.height.min(THUMBNAIL_HEIGHT) as usize;
    let src_stride = image.width as usize * 4;
    let dst_stride = THUMBNAIL_WIDTH as usize * 4;

    for row in 0..rows {
        for col in 0..THUMBNAIL_WIDTH as i64 {
            let src_col = col - offset_x;
            if src_col < 0 || src_col >= image.width as i64 {
                continue;
            }
            let src = row * src_stride + src_col as usize * 4;
            let dst = row * dst_stride + col as usize * 4;
            frame.pixels[dst..dst + 4].copy_from_slice(&image.pixels[src..src + 4]);
        }
    }
    frame
}

/// Renders the thumbnail for a 1-based page.
pub fn render_thumbnail(backend: &dyn DocumentBackend, page: usize) -> Result<RenderImage> {
    let page_index = page.saturating_sub(1);
    let size = backend.page_size(page_index)?;
    let image = backend.render_page(RenderRequest {
        page_index,
        scale: thumbnail_scale(size),
    })?;
    Ok(fit_thumbnail(&image))
}

/// Thumbnails for one document. Entries are only ever added.
#[derive(Debug, Default, Clone)]
pub struct ThumbnailCache {
    entries: BTreeMap<usize, RenderImage>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains_key(&page)
    }

    pub fn get(&self, page: usize) -> Option<&RenderImage> {
        self.entries.get(&page)
    }

    pub fn pages(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// Returns `false` and keeps the existing raster when the page is already cached.
    pub fn insert(&mut self, page: usize, image: RenderImage) -> bool {
        if self.entries.contains_key(&page) {
            return false;
        }
        self.entries.insert(page, image);
        true
    }

    pub fn missing(&self, current: usize, page_count: usize) -> Vec<usize> {
        candidate_pages(current, page_count)
            .into_iter()
            .filter(|page| !self.entries.contains_key(page))
            .collect()
    }
}
