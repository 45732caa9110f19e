use std::collections::BTreeMap;

use crate::{FileDesc, LineRange, Result, Selection, TextDocument, TimelineError, Uri};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditorView {
    pub selections: Vec<Selection>,
    pub visible_range: LineRange,
}

/// Replay-derived state of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeItem {
    pub file: Option<FileDesc>,
    pub document: Option<TextDocument>,
    pub editor: Option<EditorView>,
    /// One record per applied close: the dirty snapshot, or `None` when the
    /// document was closed clean.
    pub closed: Vec<Option<TextDocument>>,
}

impl WorktreeItem {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.document.is_none() && self.editor.is_none() && self.closed.is_empty()
    }

    /// Snapshot left behind by the most recent close, if it was dirty.
    pub fn closed_dirty(&self) -> Option<&TextDocument> {
        self.closed.last().and_then(Option::as_ref)
    }
}

/// Virtual workspace: resource -> {file, document, editor}, plus the active editor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Worktree {
    items: BTreeMap<Uri, WorktreeItem>,
    active_editor: Option<Uri>,
}

impl Worktree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, uri: &Uri) -> Option<&WorktreeItem> {
        self.items.get(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uri, &WorktreeItem)> + '_ {
        self.items.iter()
    }

    pub fn active_editor(&self) -> Option<&Uri> {
        self.active_editor.as_ref()
    }

    pub fn set_active_editor(&mut self, uri: Option<Uri>) {
        self.active_editor = uri;
    }

    /// Seeds a file outside of replay, e.g. the workspace's initial contents.
    pub fn add_file(&mut self, uri: Uri, file: FileDesc) {
        self.entry(&uri).file = Some(file);
    }

    pub fn add_dir(&mut self, uri: Uri) {
        self.add_file(uri, FileDesc::Dir);
    }

    /// Item for `uri`, created on first reference.
    pub fn entry(&mut self, uri: &Uri) -> &mut WorktreeItem {
        self.items.entry(uri.clone()).or_default()
    }

    /// Item that the caller requires to already exist.
    pub fn existing(&mut self, uri: &Uri) -> Result<&mut WorktreeItem> {
        self.items
            .get_mut(uri)
            .ok_or_else(|| TimelineError::MissingResource(uri.clone()))
    }

    pub fn document(&self, uri: &Uri) -> Option<&TextDocument> {
        self.items.get(uri).and_then(|i| i.document.as_ref())
    }

    pub fn editor(&self, uri: &Uri) -> Option<&EditorView> {
        self.items.get(uri).and_then(|i| i.editor.as_ref())
    }

    /// Drops the item once every facet is gone.
    pub fn prune(&mut self, uri: &Uri) {
        if self.items.get(uri).is_some_and(WorktreeItem::is_empty) {
            self.items.remove(uri);
        }
    }
}
