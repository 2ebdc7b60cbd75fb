//! Link annotations mapped onto the render surface.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{LinkAnnotation, PageSize, PdfRect};

const DISPLAY_URL_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoHost {
    YouTube,
    Vimeo,
    Dailymotion,
    Wistia,
    Loom,
    File,
    Generic,
}

impl VideoHost {
    pub fn label(self) -> &'static str {
        match self {
            VideoHost::YouTube => "youtube",
            VideoHost::Vimeo => "vimeo",
            VideoHost::Dailymotion => "dailymotion",
            VideoHost::Wistia => "wistia",
            VideoHost::Loom => "loom",
            VideoHost::File => "video-file",
            VideoHost::Generic => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Regular,
    Video(VideoHost),
}

#[cfg(test)]
impl LinkKind {
    pub fn is_video(self) -> bool {
        matches!(self, LinkKind::Video(_))
    }
}

static VIDEO_PATTERNS: Lazy<Vec<(VideoHost, Regex)>> = Lazy::new(|| {
    [
        (
            VideoHost::YouTube,
            r"(?:youtube\.com/watch\?v=|youtu\.be/)[a-zA-Z0-9_-]+",
        ),
        (VideoHost::Vimeo, r"vimeo\.com/\d+"),
        (VideoHost::Dailymotion, r"dailymotion\.com/video/[a-zA-Z0-9_-]+"),
        (VideoHost::Wistia, r"wistia\.com/medias/[a-zA-Z0-9_-]+"),
        (VideoHost::Loom, r"loom\.com/share/[a-zA-Z0-9_-]+"),
        (
            VideoHost::File,
            r"(?i)\.(?:mp4|avi|mov|wmv|flv|webm|mkv)(?:\?|$)",
        ),
        (VideoHost::Generic, r"(?i)video"),
    ]
    .into_iter()
    .map(|(host, pattern)| (host, Regex::new(pattern).expect("valid video pattern")))
    .collect()
});

pub fn classify(url: &str) -> LinkKind {
    VIDEO_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(url))
        .map(|(host, _)| LinkKind::Video(*host))
        .unwrap_or(LinkKind::Regular)
}

/// Rectangle on the render surface in pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub url: String,
    pub rect: SurfaceRect,
    pub kind: LinkKind,
    pub display_url: String,
}

/// Flips the bottom-up document Y axis and applies the render scale.
pub fn to_surface(rect: PdfRect, page: PageSize, scale: f32) -> SurfaceRect {
    let left = rect.left.min(rect.right);
    let right = rect.left.max(rect.right);
    let bottom = rect.bottom.min(rect.top);
    let top = rect.bottom.max(rect.top);

    SurfaceRect {
        x: left * scale,
        y: (page.height - top) * scale,
        width: (right - left) * scale,
        height: (top - bottom) * scale,
    }
}

pub fn display_url(url: &str) -> String {
    if url.chars().count() > DISPLAY_URL_LIMIT {
        let mut truncated: String = url.chars().take(DISPLAY_URL_LIMIT).collect();
        truncated.push_str("...");
        truncated
    } else {
        url.to_string()
    }
}

pub fn build_page_links(
    annotations: Vec<LinkAnnotation>,
    page: PageSize,
    scale: f32,
) -> Vec<PageLink> {
    annotations
        .into_iter()
        .filter(|annotation| !annotation.url.trim().is_empty())
        .map(|annotation| PageLink {
            rect: to_surface(annotation.rect, page, scale),
            kind: classify(&annotation.url),
            display_url: display_url(&annotation.url),
            url: annotation.url,
        })
        .collect()
}
