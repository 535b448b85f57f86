//! Line plot of a capture window as a standalone SVG document.

use chrono::{DateTime, Utc};

use super::Renderer;
use crate::error::RenderError;
use crate::key::SessionKey;
use crate::sample::Sample;

const WIDTH: f64 = 1000.0;
const HEIGHT: f64 = 400.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 50.0;
const VOLT_STEP: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SvgPlotRenderer {
    reference_volts: f64,
}

impl SvgPlotRenderer {
    pub fn new(reference_volts: f64) -> Self {
        Self { reference_volts }
    }
}

struct Frame {
    t_min: f64,
    t_span: f64,
    v_max: f64,
}

impl Frame {
    fn plot_w() -> f64 {
        WIDTH - MARGIN_LEFT - MARGIN_RIGHT
    }

    fn plot_h() -> f64 {
        HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
    }

    fn x(&self, t: f64) -> f64 {
        MARGIN_LEFT + (t - self.t_min) / self.t_span * Self::plot_w()
    }

    fn y(&self, v: f64) -> f64 {
        let v = v.clamp(0.0, self.v_max);
        MARGIN_TOP + (1.0 - v / self.v_max) * Self::plot_h()
    }
}

impl Renderer for SvgPlotRenderer {
    fn render(
        &self,
        window: &[Sample],
        key: &SessionKey,
        at: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError> {
        let (first, last) = match (window.first(), window.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(RenderError::EmptyWindow),
        };

        let span = last.timestamp - first.timestamp;
        let frame = Frame {
            t_min: first.timestamp,
            t_span: if span > 0.0 { span } else { 1.0 },
            v_max: self.reference_volts,
        };

        let mut svg = String::with_capacity(window.len() * 16 + 2048);
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
        ));
        svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
        svg.push_str(&format!(
            r#"<text x="{}" y="24" font-family="sans-serif" font-size="16" text-anchor="middle">ECG - Session #{} - {}</text>"#,
            WIDTH / 2.0,
            key,
            at.format("%H:%M:%S")
        ));

        // Horizontal grid with volt labels.
        let steps = (self.reference_volts / VOLT_STEP).floor() as usize;
        for i in 0..=steps {
            let v = i as f64 * VOLT_STEP;
            let y = frame.y(v);
            svg.push_str(&format!(
                r##"<line x1="{MARGIN_LEFT}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#ddd" stroke-width="1"/>"##,
                WIDTH - MARGIN_RIGHT
            ));
            svg.push_str(&format!(
                r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="10" text-anchor="end">{v:.1}</text>"#,
                MARGIN_LEFT - 6.0,
                y + 3.0
            ));
        }

        // Vertical grid, one line per whole second in the window.
        let mut second = first.timestamp.ceil();
        while second <= last.timestamp {
            let x = frame.x(second);
            svg.push_str(&format!(
                r##"<line x1="{x:.1}" y1="{MARGIN_TOP}" x2="{x:.1}" y2="{:.1}" stroke="#eee" stroke-width="1"/>"##,
                HEIGHT - MARGIN_BOTTOM
            ));
            svg.push_str(&format!(
                r#"<text x="{x:.1}" y="{:.1}" font-family="sans-serif" font-size="10" text-anchor="middle">{second:.0}</text>"#,
                HEIGHT - MARGIN_BOTTOM + 14.0
            ));
            second += 1.0;
        }

        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="12" text-anchor="middle">Time (s)</text>"#,
            MARGIN_LEFT + Frame::plot_w() / 2.0,
            HEIGHT - 12.0
        ));
        svg.push_str(&format!(
            r#"<text x="16" y="{:.1}" font-family="sans-serif" font-size="12" text-anchor="middle" transform="rotate(-90 16 {:.1})">Voltage (V)</text>"#,
            MARGIN_TOP + Frame::plot_h() / 2.0,
            MARGIN_TOP + Frame::plot_h() / 2.0
        ));

        svg.push_str(r#"<polyline fill="none" stroke="blue" stroke-width="1" points=""#);
        for (i, sample) in window.iter().enumerate() {
            if i > 0 {
                svg.push(' ');
            }
            svg.push_str(&format!(
                "{:.2},{:.2}",
                frame.x(sample.timestamp),
                frame.y(sample.value)
            ));
        }
        svg.push_str(r#""/>"#);
        svg.push_str("</svg>");

        Ok(svg.into_bytes())
    }

    fn mime_type(&self) -> &'static str {
        "image/svg+xml"
    }
}
