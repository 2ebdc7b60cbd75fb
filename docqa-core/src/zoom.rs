pub const ZOOM_STEP: f32 = 0.2;
pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 3.0;
/// Horizontal padding subtracted from the container before fitting the page width.
pub const FIT_WIDTH_MARGIN: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomMode {
    FitWidth,
    Fixed(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    mode: ZoomMode,
    base_scale: Option<f32>,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            mode: ZoomMode::FitWidth,
            base_scale: None,
        }
    }
}

impl Zoom {
    pub fn mode(&self) -> ZoomMode {
        self.mode
    }

    /// Last fit-width scale computed, used as the origin of relative zoom steps.
    pub fn base_scale(&self) -> Option<f32> {
        self.base_scale
    }

    /// Resolves the scale for one render. Fit width is recomputed every time from the
    /// container width and remembered as the base scale.
    pub fn scale_for(&mut self, page_width: f32, container_width: Option<f32>) -> f32 {
        match self.mode {
            ZoomMode::Fixed(scale) => scale,
            ZoomMode::FitWidth => {
                let fitted = container_width
                    .filter(|width| width.is_finite() && *width > 0.0)
                    .filter(|_| page_width.is_finite() && page_width > 0.0)
                    .map(|width| {
                        ((width - FIT_WIDTH_MARGIN).max(1.0) / page_width).clamp(MIN_SCALE, MAX_SCALE)
                    });
                match fitted {
                    Some(scale) => {
                        self.base_scale = Some(scale);
                        scale
                    }
                    None => self.base_scale.unwrap_or(1.0),
                }
            }
        }
    }

    pub fn zoom_in(&mut self) {
        self.step(ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.step(-ZOOM_STEP);
    }

    pub fn fit_width(&mut self) {
        self.mode = ZoomMode::FitWidth;
    }

    pub fn label(&self) -> String {
        match self.mode {
            ZoomMode::FitWidth => "Fit Width".to_string(),
            ZoomMode::Fixed(scale) => format!("{:.0}%", scale * 100.0),
        }
    }

    fn step(&mut self, delta: f32) {
        let origin = match self.mode {
            ZoomMode::Fixed(scale) => scale,
            ZoomMode::FitWidth => self.base_scale.unwrap_or(1.0),
        };
        let next = ((origin + delta) * 100.0).round() / 100.0;
        self.mode = ZoomMode::Fixed(next.clamp(MIN_SCALE, MAX_SCALE));
    }
}
