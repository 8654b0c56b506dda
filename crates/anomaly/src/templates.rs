//! Reference template management

use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, GrayImage};
use tracing::{info, warn};

use crate::errors::AnomalyError;

const TEMPLATE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// One reference image of a known challenge overlay.
#[derive(Clone)]
pub struct Template {
    pub name: String,
    pub image: GrayImage,
}

impl Template {
    pub fn from_image(name: impl Into<String>, image: &DynamicImage) -> Self {
        Self {
            name: name.into(),
            image: image.to_luma8(),
        }
    }

    /// Similarity of a frame against this template in `[0, 1]`.
    ///
    /// Templates are captured from the same surface the detector samples,
    /// so a size mismatch means the surface was resized since capture; the
    /// template is scaled to match before comparing.
    pub fn similarity(&self, frame: &GrayImage) -> f64 {
        let template = if self.image.dimensions() == frame.dimensions() {
            self.image.clone()
        } else {
            image::imageops::resize(
                &self.image,
                frame.width(),
                frame.height(),
                FilterType::Triangle,
            )
        };

        let total: u64 = frame
            .pixels()
            .zip(template.pixels())
            .map(|(a, b)| u64::from(a.0[0].abs_diff(b.0[0])))
            .sum();
        let pixel_count = u64::from(frame.width()) * u64::from(frame.height());
        if pixel_count == 0 {
            return 0.0;
        }
        1.0 - (total as f64 / pixel_count as f64) / 255.0
    }
}

/// Ordered set of reference templates.
#[derive(Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn push(&mut self, template: Template) {
        self.templates.push(template);
    }

    /// Load every readable image file from a directory. Unreadable files
    /// are skipped with a warning, not fatal.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, AnomalyError> {
        let dir = dir.as_ref();
        let mut set = Self::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| AnomalyError::TemplateLoad(format!("{}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_template_file(&path) {
                continue;
            }
            match image::open(&path) {
                Ok(img) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "template".to_string());
                    set.push(Template::from_image(name, &img));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable template");
                }
            }
        }
        info!(count = set.len(), dir = %dir.display(), "challenge templates loaded");
        Ok(set)
    }

    /// Persist a captured frame as a new template file and add it to the
    /// set.
    pub fn save_frame_as_template<P: AsRef<Path>>(
        &mut self,
        dir: P,
        frame: &DynamicImage,
    ) -> Result<PathBuf, AnomalyError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| AnomalyError::TemplateLoad(format!("{}: {e}", dir.display())))?;
        let name = format!("template-{}.png", self.len() + 1);
        let path = dir.join(&name);
        frame
            .save(&path)
            .map_err(|e| AnomalyError::ImageProcessing(e.to_string()))?;
        self.push(Template::from_image(name, frame));
        Ok(path)
    }
}

fn is_template_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| TEMPLATE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgba};

    fn flat_frame(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([value, value, value, 255]),
        ))
    }

    #[test]
    fn identical_frames_score_one() {
        let frame = flat_frame(32, 32, 128);
        let template = Template::from_image("t", &frame);
        let score = template.similarity(&frame.to_luma8());
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_frames_score_zero() {
        let white = flat_frame(16, 16, 255);
        let black = flat_frame(16, 16, 0);
        let template = Template::from_image("t", &white);
        let score = template.similarity(&black.to_luma8());
        assert!(score < 0.01);
    }

    #[test]
    fn size_mismatch_resizes_before_compare() {
        let template = Template::from_image("t", &flat_frame(64, 64, 200));
        let frame: GrayImage = ImageBuffer::from_pixel(32, 32, Luma([200u8]));
        assert!(template.similarity(&frame) > 0.99);
    }

    #[test]
    fn load_dir_skips_non_images() {
        let dir = tempfile::TempDir::new().unwrap();
        flat_frame(8, 8, 10).save(dir.path().join("challenge.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        let set = TemplateSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn save_frame_extends_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut set = TemplateSet::new();
        let path = set
            .save_frame_as_template(dir.path(), &flat_frame(8, 8, 90))
            .unwrap();
        assert!(path.exists());
        assert_eq!(set.len(), 1);
    }
}
