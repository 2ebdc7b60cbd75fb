use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use docqa_core::{
    document_id_for_source, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    DocumentSource, LinkAnnotation, PageSize, PdfRect as DocRect, RenderImage, RenderRequest,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
    http: reqwest::Client,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            pdfium: Arc::new(pdfium),
            http,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetching {url} failed with HTTP status {status}");
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentBackend>> {
        let (data, source) = match source {
            DocumentSource::Path(path) => {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve path for {:?}", path))?;
                (DocumentData::File(absolute.clone()), DocumentSource::Path(absolute))
            }
            DocumentSource::Url(url) => {
                let bytes = self.fetch(url).await?;
                ensure_pdf(&bytes).with_context(|| format!("{url} is not a PDF document"))?;
                debug!(%url, size = bytes.len(), "fetched remote document");
                (DocumentData::Bytes(Arc::new(bytes)), source.clone())
            }
        };

        let document = PdfiumDocument::new(Arc::clone(&self.pdfium), data, source);
        let info = document.with_document(|pdf| Ok(build_document_info(pdf, &document.source)))?;
        Ok(Arc::new(document.with_info(info)))
    }
}

enum DocumentData {
    File(PathBuf),
    Bytes(Arc<Vec<u8>>),
}

struct PdfiumDocument {
    // Declared before `pdfium` so the cached document is dropped first.
    document: Mutex<Option<PdfDocument<'static>>>,
    cache: Mutex<Option<RenderCacheEntry>>,
    info: DocumentInfo,
    source: DocumentSource,
    data: DocumentData,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page_index: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, data: DocumentData, source: DocumentSource) -> Self {
        Self {
            document: Mutex::new(None),
            cache: Mutex::new(None),
            info: DocumentInfo {
                id: document_id_for_source(&source),
                source: source.clone(),
                page_count: 0,
                metadata: DocumentMetadata::default(),
            },
            source,
            data,
            pdfium,
        }
    }

    fn with_info(mut self, info: DocumentInfo) -> Self {
        self.info = info;
        self
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = match &self.data {
            DocumentData::File(path) => self
                .pdfium
                .load_pdf_from_file(path, None)
                .with_context(|| format!("failed to open {:?}", path))?,
            DocumentData::Bytes(bytes) => self
                .pdfium
                .load_pdf_from_byte_vec(bytes.as_ref().clone(), None)
                .with_context(|| format!("failed to open {}", self.source))?,
        };
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It is only
        // stored in `self.document`, which is declared before `pdfium` and therefore
        // dropped before the bindings it refers to.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("document {} is not open", self.source)),
        }
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| {
            let index: PdfPageIndex = page_index
                .try_into()
                .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
            let page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {} out of range", page_index))?;
            f(&page)
        })
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize> {
        self.with_page(page_index, |page| {
            Ok(PageSize {
                width: page.width().value,
                height: page.height().value,
            })
        })
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page_index == request.page_index
                    && (entry.scale - request.scale).abs() < f32::EPSILON
                {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_page(request.page_index, |page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page_index))?;
            let pixels = bitmap.as_image().to_rgba8().into_raw();
            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels,
            })
        })?;

        *self.cache.lock() = Some(RenderCacheEntry {
            page_index: request.page_index,
            scale: request.scale,
            image: image.clone(),
        });
        Ok(image)
    }

    fn page_links(&self, page_index: usize) -> Result<Vec<LinkAnnotation>> {
        self.with_page(page_index, |page| {
            let mut annotations = Vec::new();
            for link in page.links().iter() {
                let Some(url) = link_uri(&link) else {
                    continue;
                };
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(
                            ?err,
                            page = page_index,
                            document = %self.source,
                            "failed to resolve link rectangle"
                        );
                        continue;
                    }
                };
                annotations.push(LinkAnnotation {
                    url,
                    rect: DocRect {
                        left: rect.left().value,
                        bottom: rect.bottom().value,
                        right: rect.right().value,
                        top: rect.top().value,
                    },
                });
            }
            Ok(annotations)
        })
    }
}

/// External URI of a link, skipping in-document destinations.
fn link_uri(link: &PdfLink<'_>) -> Option<String> {
    let action = link.action()?;
    if !matches!(action.action_type(), PdfActionType::Uri) {
        return None;
    }
    let uri = action.as_uri_action()?.uri().ok()?;
    let uri = uri.trim();
    (!uri.is_empty()).then(|| uri.to_string())
}

fn build_document_info(document: &PdfDocument<'_>, source: &DocumentSource) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .and_then(|tag| clean_title(tag.value()));

    DocumentInfo {
        id: document_id_for_source(source),
        source: source.clone(),
        page_count,
        metadata: DocumentMetadata { title },
    }
}

/// Authoring tools often leave placeholder titles behind; those are dropped.
fn clean_title(raw: &str) -> Option<String> {
    let title = raw.trim().trim_matches(char::from(0)).trim();
    let placeholder = title.is_empty()
        || title.eq_ignore_ascii_case("untitled")
        || title.to_ascii_lowercase().starts_with("microsoft word - ");
    (!placeholder).then(|| title.to_string())
}

fn ensure_pdf(bytes: &[u8]) -> Result<()> {
    // Some servers prepend whitespace or a BOM before the header.
    let head = &bytes[..bytes.len().min(1024)];
    if head
        .windows(PDF_SIGNATURE.len())
        .any(|window| window == PDF_SIGNATURE)
    {
        Ok(())
    } else {
        Err(anyhow!("missing %PDF- header"))
    }
}

fn bind_pdfium_from_hint() -> Option<Pdfium> {
    let runtime = std::env::var("DOCQA_PDFIUM_LIBRARY_PATH").ok();
    let build = option_env!("DOCQA_PDFIUM_LIBRARY_PATH").map(str::to_owned);

    for path in [runtime, build].into_iter().flatten() {
        if path.is_empty() {
            continue;
        }
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => return Some(Pdfium::new(bindings)),
            Err(err) => warn!(%path, %err, "failed to load Pdfium from configured path"),
        }
    }
    None
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set DOCQA_PDFIUM_LIBRARY_PATH or install it ({})",
                errors.join(", ")
            ))
        }
    }
}
