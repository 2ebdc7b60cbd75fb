use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod chat;
pub mod debounce;
pub mod engine;
pub mod links;
pub mod sync;
pub mod text;
pub mod thumbnails;
pub mod zoom;

pub use chat::{Conversation, Message, Role, TurnError};
pub use debounce::Debouncer;
pub use engine::{EngineState, LoadError, RenderEngine, RenderError, RenderedPage};
pub use links::{LinkKind, PageLink, SurfaceRect, VideoHost};
pub use sync::{JumpMode, PageOrigin, PageSync, SyncEvent};
pub use thumbnails::ThumbnailCache;
pub use zoom::{Zoom, ZoomMode};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f6f0f4e-1d8a-5c3b-9a52-7c1e4b0d2a91").expect("valid namespace UUID")
});

/// Where a document is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentSource {
    Path(PathBuf),
    Url(String),
}

impl DocumentSource {
    /// Treats `http://` and `https://` locators as URLs and anything else as a path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            DocumentSource::Url(trimmed.to_string())
        } else {
            DocumentSource::Path(PathBuf::from(trimmed))
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::Path(path) => path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("<unknown>")
                .to_string(),
            DocumentSource::Url(url) => url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(url.as_str())
                .to_string(),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Path(path) => write!(f, "{}", path.display()),
            DocumentSource::Url(url) => f.write_str(url),
        }
    }
}

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

pub fn document_id_for_source(source: &DocumentSource) -> DocumentId {
    match source {
        DocumentSource::Path(path) => document_id_for_path(path),
        DocumentSource::Url(url) => Uuid::new_v5(&*DOCUMENT_NAMESPACE, url.as_bytes()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source: DocumentSource,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    /// The embedded title when the document has a usable one, else the file or URL name.
    pub fn display_title(&self) -> String {
        self.metadata
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| self.source.display_name())
    }
}

/// Page dimensions in document points at scale 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Rectangle in document space. The origin is the bottom-left corner of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfRect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

/// A URI link annotation as stored in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAnnotation {
    pub url: String,
    pub rect: PdfRect,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
}

/// RGBA8 raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copies a sub-rectangle, clamping it to the image bounds.
    pub fn crop(&self, origin_x: u32, origin_y: u32, width: u32, height: u32) -> RenderImage {
        if self.is_empty() {
            return RenderImage {
                width: 0,
                height: 0,
                pixels: Vec::new(),
            };
        }

        let width = width.min(self.width).max(1);
        let height = height.min(self.height).max(1);
        let origin_x = origin_x.min(self.width.saturating_sub(width));
        let origin_y = origin_y.min(self.height.saturating_sub(height));

        let stride = self.width as usize * 4;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for row in 0..height {
            let start = (origin_y + row) as usize * stride + origin_x as usize * 4;
            let end = start + width as usize * 4;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }

        RenderImage {
            width,
            height,
            pixels,
        }
    }
}

/// User intents shared by the key mapper and the page-sync controller.
/// Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    ZoomIn,
    ZoomOut,
    FitWidth,
    ToggleThumbnails,
    AcceptJump,
    DismissJump,
    ToggleJumpMode,
}

/// Page indices at this boundary are 0-based.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn page_size(&self, page_index: usize) -> Result<PageSize>;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
    fn page_links(&self, page_index: usize) -> Result<Vec<LinkAnnotation>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentBackend>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use parking_lot::Mutex;

    pub struct FakeBackend {
        pub info: DocumentInfo,
        pub size: PageSize,
        pub links: Vec<LinkAnnotation>,
        pub render_delay: Duration,
        pub failing_pages: HashSet<usize>,
        pub renders: AtomicUsize,
        pub rendered_pages: Mutex<Vec<usize>>,
    }

    impl FakeBackend {
        pub fn new(page_count: usize) -> Self {
            let source = DocumentSource::Path(PathBuf::from("/tmp/fake.pdf"));
            Self {
                info: DocumentInfo {
                    id: document_id_for_source(&source),
                    source,
                    page_count,
                    metadata: DocumentMetadata::default(),
                },
                size: PageSize {
                    width: 600.0,
                    height: 800.0,
                },
                links: Vec::new(),
                render_delay: Duration::ZERO,
                failing_pages: HashSet::new(),
                renders: AtomicUsize::new(0),
                rendered_pages: Mutex::new(Vec::new()),
            }
        }
    }

    impl DocumentBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_size(&self, page_index: usize) -> Result<PageSize> {
            if page_index >= self.info.page_count {
                return Err(anyhow!("page {} out of range", page_index));
            }
            Ok(self.size)
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            if !self.render_delay.is_zero() {
                std::thread::sleep(self.render_delay);
            }
            if self.failing_pages.contains(&request.page_index) {
                return Err(anyhow!("corrupt page {}", request.page_index));
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            self.rendered_pages.lock().push(request.page_index);
            let width = (self.size.width * request.scale).round().max(1.0) as u32;
            let height = (self.size.height * request.scale).round().max(1.0) as u32;
            let mut image = RenderImage::blank(width, height);
            image.pixels[0] = request.page_index as u8;
            Ok(image)
        }

        fn page_links(&self, _page_index: usize) -> Result<Vec<LinkAnnotation>> {
            Ok(self.links.clone())
        }
    }

    pub struct FakeProvider {
        pub backend: Arc<FakeBackend>,
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, _source: &DocumentSource) -> Result<Arc<dyn DocumentBackend>> {
            if self.fail {
                return Err(anyhow!("not a PDF file"));
            }
            Ok(self.backend.clone())
        }
    }
}
