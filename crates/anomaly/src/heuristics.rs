//! Frame evaluation: template similarity plus dark-overlay heuristic

use image::{DynamicImage, GrayImage};

use crate::models::{BlockReason, DetectorConfig};
use crate::templates::TemplateSet;

/// Outcome of evaluating one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Clear,
    Blocked(BlockReason),
}

/// Evaluate a captured frame. Template similarity is checked first; the
/// mask heuristic only runs when no template matches.
pub fn evaluate(frame: &DynamicImage, templates: &TemplateSet, config: &DetectorConfig) -> Verdict {
    let gray = frame.to_luma8();

    for template in templates.iter() {
        let score = template.similarity(&gray);
        if score >= config.similarity_threshold {
            return Verdict::Blocked(BlockReason::TemplateMatch {
                template: template.name.clone(),
                score,
            });
        }
    }

    if config.use_mask_detection {
        if let Some(reason) = mask_overlay(&gray, config) {
            return Verdict::Blocked(reason);
        }
    }

    Verdict::Clear
}

/// Dimmed-overlay heuristic: a challenge mask darkens the whole surface,
/// so either the mean luminance collapses or most pixels fall below the
/// dark threshold.
fn mask_overlay(gray: &GrayImage, config: &DetectorConfig) -> Option<BlockReason> {
    let pixel_count = u64::from(gray.width()) * u64::from(gray.height());
    if pixel_count == 0 {
        return None;
    }

    let mut sum: u64 = 0;
    let mut dark: u64 = 0;
    for pixel in gray.pixels() {
        let value = pixel.0[0];
        sum += u64::from(value);
        if value < config.dark_pixel_threshold {
            dark += 1;
        }
    }

    let mean_luma = sum as f64 / pixel_count as f64;
    let dark_ratio = dark as f64 / pixel_count as f64;

    if mean_luma < config.brightness_floor || dark_ratio > config.dark_ratio_ceiling {
        Some(BlockReason::DarkOverlay {
            mean_luma,
            dark_ratio,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::Template;
    use image::{ImageBuffer, Rgba};

    fn flat(value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            32,
            32,
            Rgba([value, value, value, 255]),
        ))
    }

    #[test]
    fn bright_frame_without_templates_is_clear() {
        let verdict = evaluate(&flat(200), &TemplateSet::new(), &DetectorConfig::default());
        assert_eq!(verdict, Verdict::Clear);
    }

    #[test]
    fn dark_frame_trips_mask_heuristic() {
        let verdict = evaluate(&flat(10), &TemplateSet::new(), &DetectorConfig::default());
        assert!(matches!(
            verdict,
            Verdict::Blocked(BlockReason::DarkOverlay { .. })
        ));
    }

    #[test]
    fn mask_heuristic_can_be_disabled() {
        let config = DetectorConfig {
            use_mask_detection: false,
            ..DetectorConfig::default()
        };
        let verdict = evaluate(&flat(10), &TemplateSet::new(), &config);
        assert_eq!(verdict, Verdict::Clear);
    }

    #[test]
    fn template_match_reported_before_mask() {
        let mut templates = TemplateSet::new();
        templates.push(Template::from_image("challenge.png", &flat(10)));
        let verdict = evaluate(&flat(10), &templates, &DetectorConfig::default());
        assert!(matches!(
            verdict,
            Verdict::Blocked(BlockReason::TemplateMatch { .. })
        ));
    }

    #[test]
    fn dissimilar_template_does_not_match() {
        let mut templates = TemplateSet::new();
        templates.push(Template::from_image("challenge.png", &flat(255)));
        let verdict = evaluate(&flat(200), &templates, &DetectorConfig::default());
        // 55/255 apart: similarity ~0.78 stays under the 0.8 threshold and
        // the bright frame doesn't trip the mask heuristic either.
        assert_eq!(verdict, Verdict::Clear);
    }
}
