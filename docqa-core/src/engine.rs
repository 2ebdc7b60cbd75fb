//! Document loading, cancellable page rendering and thumbnail generation.
//!
//! The engine owns one document at a time. Rasterization happens on blocking
//! workers; every render holds a cancellation token that the next render (or a
//! reload) cancels, so only the newest request ever updates the link set.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::links::{build_page_links, PageLink};
use crate::thumbnails::{render_thumbnail, ThumbnailCache};
use crate::zoom::Zoom;
use crate::{
    DocumentBackend, DocumentInfo, DocumentProvider, DocumentSource, RenderImage, RenderRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Unloaded,
    Loading { document: DocumentSource },
    Ready { page_count: usize },
    Rendering { page: usize, page_count: usize },
    Failed { document: DocumentSource, reason: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render of page {page} was cancelled")]
    Cancelled { page: usize },
    #[error("no document is loaded")]
    NotReady,
    #[error("page {page} is outside 1..={page_count}")]
    PageOutOfRange { page: usize, page_count: usize },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled { .. })
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load {document}: {reason}")]
    Failed {
        document: DocumentSource,
        reason: String,
    },
    #[error("loading {0} was superseded by a newer document")]
    Superseded(DocumentSource),
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page: usize,
    pub scale: f32,
    pub image: RenderImage,
    pub links: Vec<PageLink>,
}

struct EngineInner {
    state: EngineState,
    generation: u64,
    render_seq: u64,
    document: Option<Arc<dyn DocumentBackend>>,
    zoom: Zoom,
    in_flight: Option<CancellationToken>,
    links: Vec<PageLink>,
    thumbnails: ThumbnailCache,
}

#[derive(Clone)]
pub struct RenderEngine {
    provider: Arc<dyn DocumentProvider>,
    inner: Arc<Mutex<EngineInner>>,
}

impl RenderEngine {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self {
            provider,
            inner: Arc::new(Mutex::new(EngineInner {
                state: EngineState::Unloaded,
                generation: 0,
                render_seq: 0,
                document: None,
                zoom: Zoom::default(),
                in_flight: None,
                links: Vec::new(),
                thumbnails: ThumbnailCache::new(),
            })),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().state.clone()
    }

    pub fn page_count(&self) -> Option<usize> {
        self.inner
            .lock()
            .document
            .as_ref()
            .map(|doc| doc.info().page_count)
    }

    pub fn document_info(&self) -> Option<DocumentInfo> {
        self.inner
            .lock()
            .document
            .as_ref()
            .map(|doc| doc.info().clone())
    }

    /// Opens `document`, replacing whatever was loaded before. Page count, links and
    /// thumbnails are reset as soon as the load starts.
    pub async fn load(&self, document: DocumentSource) -> Result<DocumentInfo, LoadError> {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(token) = inner.in_flight.take() {
                token.cancel();
            }
            inner.state = EngineState::Loading {
                document: document.clone(),
            };
            inner.document = None;
            inner.links.clear();
            inner.thumbnails = ThumbnailCache::new();
            inner.generation
        };

        debug!(%document, "opening document");
        let opened = self.provider.open(&document).await.and_then(|backend| {
            if backend.info().page_count == 0 {
                anyhow::bail!("document has no pages");
            }
            Ok(backend)
        });

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Err(LoadError::Superseded(document));
        }

        match opened {
            Ok(backend) => {
                let info = backend.info().clone();
                info!(%document, pages = info.page_count, "document loaded");
                inner.state = EngineState::Ready {
                    page_count: info.page_count,
                };
                inner.document = Some(backend);
                Ok(info)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!(%document, error = %reason, "failed to load document");
                inner.state = EngineState::Failed {
                    document: document.clone(),
                    reason: reason.clone(),
                };
                Err(LoadError::Failed { document, reason })
            }
        }
    }

    /// Renders a 1-based page at the current zoom, cancelling any render still in
    /// flight. `container_width` is the drawable width in pixels, used by fit width.
    pub async fn render(
        &self,
        page: usize,
        container_width: Option<f32>,
    ) -> Result<RenderedPage, RenderError> {
        let (backend, token, seq, generation, page_count) = {
            let mut inner = self.inner.lock();
            let backend = inner.document.clone().ok_or(RenderError::NotReady)?;
            let page_count = backend.info().page_count;
            if page == 0 || page > page_count {
                return Err(RenderError::PageOutOfRange { page, page_count });
            }
            if let Some(previous) = inner.in_flight.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            inner.in_flight = Some(token.clone());
            inner.render_seq += 1;
            inner.state = EngineState::Rendering { page, page_count };
            (
                backend,
                token,
                inner.render_seq,
                inner.generation,
                page_count,
            )
        };

        let result = self.rasterize(backend, page, container_width, &token).await;

        let mut inner = self.inner.lock();
        let latest = inner.render_seq == seq && inner.generation == generation;
        match result {
            Ok(rendered) if latest && !token.is_cancelled() => {
                inner.links = rendered.links.clone();
                inner.state = EngineState::Ready { page_count };
                inner.in_flight = None;
                debug!(page, scale = rendered.scale, "page rendered");
                Ok(rendered)
            }
            Ok(_) => Err(RenderError::Cancelled { page }),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                if latest {
                    inner.state = EngineState::Ready { page_count };
                    inner.in_flight = None;
                }
                error!(page, error = %err, "failed to render page");
                Err(err)
            }
        }
    }

    async fn rasterize(
        &self,
        backend: Arc<dyn DocumentBackend>,
        page: usize,
        container_width: Option<f32>,
        token: &CancellationToken,
    ) -> Result<RenderedPage, RenderError> {
        if token.is_cancelled() {
            return Err(RenderError::Cancelled { page });
        }
        let page_index = page - 1;

        let size_backend = backend.clone();
        let size = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RenderError::Cancelled { page }),
            size = tokio::task::spawn_blocking(move || size_backend.page_size(page_index)) => {
                size.map_err(anyhow::Error::from)??
            }
        };
        let scale = self.inner.lock().zoom.scale_for(size.width, container_width);

        let raster_backend = backend.clone();
        let raster = tokio::task::spawn_blocking(move || {
            raster_backend.render_page(RenderRequest { page_index, scale })
        });
        let annotations = tokio::task::spawn_blocking(move || backend.page_links(page_index));

        let (image, annotations) = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RenderError::Cancelled { page }),
            joined = async { tokio::join!(raster, annotations) } => joined,
        };
        let image = image.map_err(anyhow::Error::from)??;

        let annotations = match annotations.map_err(anyhow::Error::from) {
            Ok(Ok(annotations)) => annotations,
            Ok(Err(err)) | Err(err) => {
                warn!(page, error = %err, "failed to read link annotations");
                Vec::new()
            }
        };
        if token.is_cancelled() {
            return Err(RenderError::Cancelled { page });
        }

        Ok(RenderedPage {
            page,
            scale,
            image,
            links: build_page_links(annotations, size, scale),
        })
    }

    /// Renders the thumbnails missing around `current` and returns how many were added.
    pub async fn thumbnails(&self, current: usize) -> Result<usize, RenderError> {
        let (backend, generation, missing) = {
            let inner = self.inner.lock();
            let backend = inner.document.clone().ok_or(RenderError::NotReady)?;
            let missing = inner
                .thumbnails
                .missing(current, backend.info().page_count);
            (backend, inner.generation, missing)
        };
        if missing.is_empty() {
            return Ok(0);
        }

        let rendered = tokio::task::spawn_blocking(move || {
            missing
                .into_iter()
                .filter_map(|page| match render_thumbnail(backend.as_ref(), page) {
                    Ok(image) => Some((page, image)),
                    Err(err) => {
                        warn!(page, error = %err, "failed to render thumbnail");
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(anyhow::Error::from)?;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Ok(0);
        }
        let mut added = 0;
        for (page, image) in rendered {
            if inner.thumbnails.insert(page, image) {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn thumbnail(&self, page: usize) -> Option<RenderImage> {
        self.inner.lock().thumbnails.get(page).cloned()
    }

    pub fn thumbnail_pages(&self) -> Vec<usize> {
        self.inner.lock().thumbnails.pages()
    }

    /// Links of the most recently completed render.
    pub fn links(&self) -> Vec<PageLink> {
        self.inner.lock().links.clone()
    }

    pub fn zoom_in(&self) {
        self.inner.lock().zoom.zoom_in();
    }

    pub fn zoom_out(&self) {
        self.inner.lock().zoom.zoom_out();
    }

    pub fn fit_width(&self) {
        self.inner.lock().zoom.fit_width();
    }

    pub fn zoom_label(&self) -> String {
        self.inner.lock().zoom.label()
    }
}
