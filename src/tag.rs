//! Tag catalog for classifying log events.
//!
//! The catalog is fixed: Success, Warning and Error, addressed by 1-based
//! ids. Unknown ids resolve to Success instead of failing.

use colored::Color;
use serde::{Deserialize, Serialize};

/// Classification attached to a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Success,
    Warning,
    Error,
}

/// Numeric id of [`Tag::Success`].
pub const TAG_SUCCESS: i64 = 1;

/// Numeric id of [`Tag::Warning`].
pub const TAG_WARNING: i64 = 2;

/// Numeric id of [`Tag::Error`].
pub const TAG_ERROR: i64 = 3;

impl Tag {
    /// Get the whole catalog in id order.
    pub fn catalog() -> &'static [Tag] {
        &[Tag::Success, Tag::Warning, Tag::Error]
    }

    /// Resolve a raw id to a tag.
    ///
    /// Ids of 0, negative ids and ids past the end of the catalog all
    /// resolve to [`Tag::Success`].
    pub fn from_id(id: i64) -> Tag {
        match id {
            TAG_WARNING => Tag::Warning,
            TAG_ERROR => Tag::Error,
            _ => Tag::Success,
        }
    }

    /// Stable 1-based id.
    pub fn id(&self) -> u32 {
        match self {
            Tag::Success => 1,
            Tag::Warning => 2,
            Tag::Error => 3,
        }
    }

    /// Hex display color used by the collector UI.
    pub fn color(&self) -> &'static str {
        match self {
            Tag::Success => "#1c9c3e",
            Tag::Warning => "#c2a525",
            Tag::Error => "#9c1f1f",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tag::Success => "Success",
            Tag::Warning => "Warning",
            Tag::Error => "Error",
        }
    }

    /// Terminal color used when the event is echoed to the console.
    pub fn console_color(&self) -> Color {
        match self {
            Tag::Success => Color::Green,
            Tag::Warning => Color::Yellow,
            Tag::Error => Color::Red,
        }
    }

    /// Wire representation of this tag.
    pub fn record(&self) -> TagRecord {
        TagRecord {
            index: self.id(),
            color: self.color().to_string(),
            name: self.name().to_string(),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tag as the collector receives it: `{"index", "color", "name"}`.
///
/// Untagged events carry the zero record (`index` 0, empty strings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub index: u32,
    pub color: String,
    pub name: String,
}

impl From<Option<Tag>> for TagRecord {
    fn from(tag: Option<Tag>) -> Self {
        tag.map(|t| t.record()).unwrap_or_default()
    }
}
