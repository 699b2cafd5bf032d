use crate::config::GAUGE_DIMS;
use crate::error::EvalError;
use anyhow::Result;
use image::{Rgb, RgbImage};

/// Draws a precision indicator onto an annotated frame.
pub trait GaugeOverlay {
    /// Overlay `precision` (in [0, 1]) onto `frame` in place.
    fn overlay(&self, frame: &mut RgbImage, precision: f32) -> Result<()>;
}

/// Horizontal bar in the lower left corner, filled in proportion to the
/// precision and shaded from red (low) to green (high).
#[derive(Debug, Clone)]
pub struct BarGauge {
    pub margin: u32,
    pub bar_width: u32,
    pub bar_height: u32,
}

impl Default for BarGauge {
    fn default() -> Self {
        Self {
            margin: 40,
            bar_width: 300,
            bar_height: 40,
        }
    }
}

impl GaugeOverlay for BarGauge {
    fn overlay(&self, frame: &mut RgbImage, precision: f32) -> Result<()> {
        if frame.dimensions() != (GAUGE_DIMS.width, GAUGE_DIMS.height) {
            return Err(EvalError::configuration(format!(
                "precision gauge needs {}x{} frames, got {}x{}",
                GAUGE_DIMS.width,
                GAUGE_DIMS.height,
                frame.width(),
                frame.height()
            ))
            .into());
        }

        let precision = precision.clamp(0.0, 1.0);
        let filled = (self.bar_width as f32 * precision).round() as u32;
        let color = Rgb([
            (255.0 * (1.0 - precision)) as u8,
            (255.0 * precision) as u8,
            0,
        ]);
        let outline = Rgb([255, 255, 255]);

        let left = self.margin;
        let top = frame.height() - self.margin - self.bar_height;
        for dy in 0..self.bar_height {
            for dx in 0..self.bar_width {
                let border = dy == 0
                    || dy + 1 == self.bar_height
                    || dx == 0
                    || dx + 1 == self.bar_width;
                if border {
                    frame.put_pixel(left + dx, top + dy, outline);
                } else if dx < filled {
                    frame.put_pixel(left + dx, top + dy, color);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_follows_precision() {
        let gauge = BarGauge::default();
        let mut frame = RgbImage::new(1000, 1000);
        gauge.overlay(&mut frame, 0.5).unwrap();

        let y = 1000 - gauge.margin - gauge.bar_height / 2;
        let inside = *frame.get_pixel(gauge.margin + 10, y);
        let beyond = *frame.get_pixel(gauge.margin + 200, y);
        assert_eq!(inside, Rgb([127, 127, 0]));
        assert_eq!(beyond, Rgb([0, 0, 0]));
    }

    #[test]
    fn test_rejects_other_sizes() {
        let mut frame = RgbImage::new(224, 224);
        assert!(BarGauge::default().overlay(&mut frame, 1.0).is_err());
    }
}
