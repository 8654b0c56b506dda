//! Core types for the locator system

use serde::{Deserialize, Serialize};

/// A structural path identifying one element on the target page.
///
/// Stored as the raw slash-separated path; segment access is positional so
/// the pattern learner can compare two locators level by level.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hierarchical segments, leading empties retained so that absolute
    /// paths ("//div[1]") keep stable indices.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').collect()
    }

    pub fn from_segments(segments: &[String]) -> Self {
        Self(segments.join("/"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Element geometry in page viewport coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Zero-sized or off-page rects usually mean the element was found in
    /// the DOM but is not actually interactable.
    pub fn is_plausible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.x >= 0.0 && self.y >= 0.0
    }
}

/// A concrete element handle returned by the page port.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Opaque node reference understood by the page port.
    pub node_id: String,

    pub rect: Rect,

    /// Visible text content, already trimmed.
    pub text: String,
}

impl ElementHandle {
    pub fn new(node_id: impl Into<String>, rect: Rect, text: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            rect,
            text: text.into(),
        }
    }
}

/// Resolution outcome: either a real element or a cached screen point
/// standing in for one. Execution logic branches on the variant instead of
/// probing attributes.
#[derive(Clone, Debug)]
pub enum Locatable {
    Element(ElementHandle),
    CachedPoint {
        field: String,
        screen_x: i32,
        screen_y: i32,
    },
}

impl Locatable {
    pub fn is_cached_point(&self) -> bool {
        matches!(self, Locatable::CachedPoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_keep_leading_empties() {
        let locator = Locator::new("//div[3]/span[1]");
        assert_eq!(locator.segments(), vec!["", "", "div[3]", "span[1]"]);
    }

    #[test]
    fn rect_center() {
        let rect = Rect::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(rect.center(), (60.0, 40.0));
        assert!(rect.is_plausible());
        assert!(!Rect::new(-5.0, 0.0, 10.0, 10.0).is_plausible());
        assert!(!Rect::new(0.0, 0.0, 0.0, 10.0).is_plausible());
    }
}
