//! Canvas elements and partial element updates.

use kurbo::{Point, Rect};
use peniko::Color;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for elements.
pub type ElementId = Uuid;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    /// Format as `#rrggbb`, dropping alpha.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Style properties shared by every element kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStyle {
    /// Stroke color.
    pub stroke_color: SerializableColor,
    /// Stroke width.
    pub stroke_width: f64,
    /// Fill color (None = no fill).
    #[serde(default)]
    pub fill_color: Option<SerializableColor>,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl ElementStyle {
    /// Get the stroke color as a peniko Color.
    pub fn stroke(&self) -> Color {
        self.stroke_color.into()
    }

    /// Get the fill color as a peniko Color.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color.map(|c| c.into())
    }
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::black(),
            stroke_width: 2.0,
            fill_color: None,
            opacity: 1.0,
        }
    }
}

/// Outline used by `shape` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    #[default]
    Rectangle,
    Ellipse,
    Diamond,
}

/// Type-specific element data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// Grouping container. Children point at it through `parent_id`.
    Frame {
        name: String,
        #[serde(default)]
        clip: bool,
    },
    /// Raster image referenced by URL in the asset store.
    Image {
        src: String,
        /// Decoded pixels; runtime only, never serialized.
        #[serde(skip)]
        bitmap: Option<Arc<[u8]>>,
    },
    Text {
        content: String,
        #[serde(default = "default_font_size")]
        font_size: f64,
    },
    Shape {
        #[serde(default)]
        shape: ShapeKind,
        #[serde(default)]
        corner_radius: f64,
    },
    /// Freehand or polyline path, points relative to `position`.
    Path {
        points: Vec<Point>,
        #[serde(default)]
        closed: bool,
    },
}

fn default_font_size() -> f64 {
    20.0
}

impl ElementKind {
    /// Wire name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementKind::Frame { .. } => "frame",
            ElementKind::Image { .. } => "image",
            ElementKind::Text { .. } => "text",
            ElementKind::Shape { .. } => "shape",
            ElementKind::Path { .. } => "path",
        }
    }
}

/// A visual entity on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    #[serde(flatten)]
    pub kind: ElementKind,
    /// Top-left corner in document coordinates.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    /// Rotation in radians around the center.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub style: ElementStyle,
    /// Modification stamp of the last writer.
    #[serde(default)]
    pub version: u64,
    /// Weak reference to the frame this element is grouped under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
}

impl Element {
    /// Create a new element with a fresh id and version 0.
    pub fn new(kind: ElementKind, position: Point, width: f64, height: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            position,
            width,
            height,
            rotation: 0.0,
            style: ElementStyle::default(),
            version: 0,
            parent_id: None,
        }
    }

    /// Convenience constructor for a frame.
    pub fn frame(name: impl Into<String>, position: Point, width: f64, height: f64) -> Self {
        Self::new(
            ElementKind::Frame {
                name: name.into(),
                clip: false,
            },
            position,
            width,
            height,
        )
    }

    /// Convenience constructor for a rectangle.
    pub fn rectangle(position: Point, width: f64, height: f64) -> Self {
        Self::new(
            ElementKind::Shape {
                shape: ShapeKind::Rectangle,
                corner_radius: 0.0,
            },
            position,
            width,
            height,
        )
    }

    pub fn is_frame(&self) -> bool {
        matches!(self.kind, ElementKind::Frame { .. })
    }

    /// Axis-aligned bounds, ignoring rotation.
    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.position, (self.width, self.height))
    }

    /// Apply every field present in `patch`.
    pub fn apply_patch(&mut self, patch: &ElementPatch) {
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(rotation) = patch.rotation {
            self.rotation = rotation;
        }
        if let Some(style) = &patch.style {
            self.style = style.clone();
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
    }
}

/// Partial element update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ElementKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ElementStyle>,
    /// `Some(None)` detaches from the parent frame, `None` leaves it alone.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub parent_id: Option<Option<ElementId>>,
}

impl ElementPatch {
    /// Patch that only moves the element.
    pub fn moved_to(position: Point) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Distinguishes an explicit `null` from a missing field.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
