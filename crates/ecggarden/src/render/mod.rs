//! Turning a buffered window into artifact bytes.

mod svg;
mod wav;

pub use svg::SvgPlotRenderer;
pub use wav::WavRenderer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ecgconf::ArtifactFormat;

use crate::error::RenderError;
use crate::key::SessionKey;
use crate::sample::Sample;

/// Pure function of its input. Called synchronously from the capture loop.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        window: &[Sample],
        key: &SessionKey,
        at: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError>;

    fn mime_type(&self) -> &'static str;
}

/// Rendered window plus the moment it was taken.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub created_at: DateTime<Utc>,
}

pub fn renderer_for(
    format: ArtifactFormat,
    sample_rate_hz: u32,
    reference_volts: f64,
) -> Arc<dyn Renderer> {
    match format {
        ArtifactFormat::Svg => Arc::new(SvgPlotRenderer::new(reference_volts)),
        ArtifactFormat::Wav => Arc::new(WavRenderer::new(sample_rate_hz, reference_volts)),
    }
}
