use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Clock, EndOfLine, FileDesc, LineRange, Position, Range, Selection, Uri};

/// Recorder version whose `ShowTextEditor` reversal targets the same editor.
pub const CURRENT_RECORDER_VERSION: u32 = 2;

/// Stable identity assigned by the [`crate::EventStore`]; survives clock edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn is_forward(self) -> bool {
        matches!(self, Direction::Forward)
    }
}

/// An event as held by the store: identity, owning resource and clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: EventId,
    pub uri: Uri,
    pub clock: Clock,
    pub event: EditorEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorEvent {
    FsCreate(FsCreate),
    FsChange(FsChange),
    FsDelete(FsDelete),
    TextChange(TextChange),
    TextInsert(TextInsert),
    OpenTextDocument(OpenTextDocument),
    CloseTextDocument(CloseTextDocument),
    ShowTextEditor(ShowTextEditor),
    CloseTextEditor(CloseTextEditor),
    Select(Select),
    Scroll(Scroll),
    Save(Save),
    UpdateTextDocument(UpdateTextDocument),
}

impl EditorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EditorEvent::FsCreate(_) => "fs_create",
            EditorEvent::FsChange(_) => "fs_change",
            EditorEvent::FsDelete(_) => "fs_delete",
            EditorEvent::TextChange(_) => "text_change",
            EditorEvent::TextInsert(_) => "text_insert",
            EditorEvent::OpenTextDocument(_) => "open_text_document",
            EditorEvent::CloseTextDocument(_) => "close_text_document",
            EditorEvent::ShowTextEditor(_) => "show_text_editor",
            EditorEvent::CloseTextEditor(_) => "close_text_editor",
            EditorEvent::Select(_) => "select",
            EditorEvent::Scroll(_) => "scroll",
            EditorEvent::Save(_) => "save",
            EditorEvent::UpdateTextDocument(_) => "update_text_document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsCreate {
    pub file: FileDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsChange {
    pub file: FileDesc,
    pub revert_file: FileDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsDelete {
    pub revert_file: FileDesc,
}

/// One replaced span plus the edit that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChange {
    pub range: Range,
    pub text: String,
    pub revert_range: Range,
    pub revert_text: String,
}

/// Changes apply in order forward and their reverts in reverse order backward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    pub changes: Vec<ContentChange>,
    #[serde(default)]
    pub update_selection: bool,
    /// Editor selections before the edit; restored when stepping back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_selections: Option<Vec<Selection>>,
}

/// Single-span insertion; `revert_range` covers the inserted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInsert {
    pub text: String,
    pub revert_range: Range,
    #[serde(default)]
    pub update_selection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_selections: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTextDocument {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub eol: EndOfLine,
    #[serde(default)]
    pub language_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseTextDocument {
    pub revert_text: String,
    #[serde(default)]
    pub revert_eol: EndOfLine,
    #[serde(default)]
    pub revert_language_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowTextEditor {
    #[serde(default = "default_true")]
    pub activate: bool,
    /// The document was opened implicitly by showing the editor.
    #[serde(default)]
    pub just_opened: bool,
    pub selections: Vec<Selection>,
    pub visible_range: LineRange,
    #[serde(default)]
    pub revert_uri: Option<Uri>,
    #[serde(default)]
    pub revert_selections: Option<Vec<Selection>>,
    #[serde(default)]
    pub revert_visible_range: Option<LineRange>,
    /// Zero means "inherit the session format version" at decode time.
    #[serde(default)]
    pub recorder_version: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseTextEditor {
    pub revert_selections: Vec<Selection>,
    pub revert_visible_range: LineRange,
    #[serde(default)]
    pub revert_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub selections: Vec<Selection>,
    pub revert_selections: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scroll {
    pub visible_range: LineRange,
    pub revert_visible_range: LineRange,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Save {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTextDocument {
    pub language_id: String,
    pub revert_language_id: String,
}

impl TextInsert {
    pub fn at(position: Position, text: impl Into<String>) -> Self {
        let text = text.into();
        let end = crate::document::end_of_inserted(position, &text);
        Self {
            text,
            revert_range: Range::new(position, end),
            update_selection: false,
            revert_selections: None,
        }
    }
}
