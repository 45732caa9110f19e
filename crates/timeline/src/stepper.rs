use std::collections::HashMap;

use crate::{
    document::end_of_inserted, CloseTextDocument, CloseTextEditor, Direction, EditorEvent,
    EditorView, EventEntry, FileDesc, FsChange, FsCreate, FsDelete, OpenTextDocument, Position,
    Range, Result, Save, Scroll, Select, Selection, ShowTextEditor, TextChange, TextDocument,
    TextInsert, TimelineError, UpdateTextDocument, Uri, Worktree, CURRENT_RECORDER_VERSION,
};

/// Applies single events forward or backward against a target workspace.
///
/// Implementations must be deterministic: stepping an event forward and
/// then backward has to leave the target exactly as it was.
pub trait Stepper: Send {
    fn fs_create(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsCreate, dir: Direction) -> Result<()>;
    fn fs_change(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsChange, dir: Direction) -> Result<()>;
    fn fs_delete(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsDelete, dir: Direction) -> Result<()>;
    fn text_change(&mut self, wt: &mut Worktree, uri: &Uri, e: &TextChange, dir: Direction) -> Result<()>;
    fn text_insert(&mut self, wt: &mut Worktree, uri: &Uri, e: &TextInsert, dir: Direction) -> Result<()>;
    fn open_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &OpenTextDocument,
        dir: Direction,
    ) -> Result<()>;
    fn close_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &CloseTextDocument,
        dir: Direction,
    ) -> Result<()>;
    fn show_text_editor(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &ShowTextEditor,
        dir: Direction,
    ) -> Result<()>;
    fn close_text_editor(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &CloseTextEditor,
        dir: Direction,
    ) -> Result<()>;
    fn select(&mut self, wt: &mut Worktree, uri: &Uri, e: &Select, dir: Direction) -> Result<()>;
    fn scroll(&mut self, wt: &mut Worktree, uri: &Uri, e: &Scroll, dir: Direction) -> Result<()>;
    fn save(&mut self, wt: &mut Worktree, uri: &Uri, e: &Save, dir: Direction) -> Result<()>;
    fn update_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &UpdateTextDocument,
        dir: Direction,
    ) -> Result<()>;
}

/// Resources touched by one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub touched: Vec<Uri>,
}

/// Routes one event to the matching [`Stepper`] method.
pub fn apply_event(
    stepper: &mut dyn Stepper,
    wt: &mut Worktree,
    entry: &EventEntry,
    dir: Direction,
) -> Result<StepOutcome> {
    let uri = &entry.uri;
    let mut touched = vec![uri.clone()];
    match &entry.event {
        EditorEvent::FsCreate(e) => stepper.fs_create(wt, uri, e, dir)?,
        EditorEvent::FsChange(e) => stepper.fs_change(wt, uri, e, dir)?,
        EditorEvent::FsDelete(e) => stepper.fs_delete(wt, uri, e, dir)?,
        EditorEvent::TextChange(e) => stepper.text_change(wt, uri, e, dir)?,
        EditorEvent::TextInsert(e) => stepper.text_insert(wt, uri, e, dir)?,
        EditorEvent::OpenTextDocument(e) => stepper.open_text_document(wt, uri, e, dir)?,
        EditorEvent::CloseTextDocument(e) => stepper.close_text_document(wt, uri, e, dir)?,
        EditorEvent::ShowTextEditor(e) => {
            stepper.show_text_editor(wt, uri, e, dir)?;
            if let Some(other) = e.revert_uri.as_ref().filter(|u| *u != uri) {
                touched.push(other.clone());
            }
        }
        EditorEvent::CloseTextEditor(e) => stepper.close_text_editor(wt, uri, e, dir)?,
        EditorEvent::Select(e) => stepper.select(wt, uri, e, dir)?,
        EditorEvent::Scroll(e) => stepper.scroll(wt, uri, e, dir)?,
        EditorEvent::Save(e) => stepper.save(wt, uri, e, dir)?,
        EditorEvent::UpdateTextDocument(e) => stepper.update_text_document(wt, uri, e, dir)?,
    }
    Ok(StepOutcome { touched })
}

/// Content-addressed file bodies referenced by [`FileDesc::Blob`].
pub trait BlobStore: Send {
    fn get(&self, sha1: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sha1: impl Into<String>, text: impl Into<String>) {
        self.blobs.insert(sha1.into(), text.into());
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, sha1: &str) -> Option<String> {
        self.blobs.get(sha1).cloned()
    }
}

/// Stepper that only updates the in-memory [`Worktree`].
pub struct InMemoryStepper {
    blobs: Box<dyn BlobStore>,
}

impl Default for InMemoryStepper {
    fn default() -> Self {
        Self::new(MemoryBlobStore::new())
    }
}

impl InMemoryStepper {
    pub fn new(blobs: impl BlobStore + 'static) -> Self {
        Self {
            blobs: Box::new(blobs),
        }
    }

    fn file_text(&self, file: Option<&FileDesc>) -> Result<String> {
        match file {
            None | Some(FileDesc::Empty) => Ok(String::new()),
            Some(FileDesc::Text { text }) => Ok(text.clone()),
            Some(FileDesc::Blob { sha1 }) => self
                .blobs
                .get(sha1)
                .ok_or_else(|| TimelineError::MissingBlob(sha1.clone())),
            Some(FileDesc::Dir) => Err(TimelineError::InvalidOp(
                "directories have no text content".into(),
            )),
        }
    }

    fn is_dirty(&self, doc: &TextDocument, file: Option<&FileDesc>) -> Result<bool> {
        Ok(self.file_text(file)? != doc.text())
    }

    /// Document for an implicit open: dirty snapshot first, else the file.
    fn reopen(&self, wt: &mut Worktree, uri: &Uri, language_id: &str) -> Result<TextDocument> {
        let item = wt.entry(uri);
        if let Some(doc) = item.closed_dirty() {
            return Ok(doc.clone());
        }
        let text = self.file_text(item.file.as_ref())?;
        Ok(TextDocument::from_text(&text, language_id))
    }
}

fn document_mut<'a>(wt: &'a mut Worktree, uri: &Uri) -> Result<&'a mut TextDocument> {
    wt.existing(uri)?
        .document
        .as_mut()
        .ok_or_else(|| TimelineError::MissingDocument(uri.clone()))
}

fn editor_mut<'a>(wt: &'a mut Worktree, uri: &Uri) -> Result<&'a mut EditorView> {
    wt.existing(uri)?
        .editor
        .as_mut()
        .ok_or_else(|| TimelineError::MissingEditor(uri.clone()))
}

/// Forward edits leave a caret after the edit. Stepping back restores the
/// recorded selections, or falls back to a caret for logs that lack them.
fn update_selections(
    wt: &mut Worktree,
    uri: &Uri,
    cursor: Option<Position>,
    dir: Direction,
    revert: Option<&[Selection]>,
) {
    let Some(editor) = wt.existing(uri).ok().and_then(|i| i.editor.as_mut()) else {
        return;
    };
    match (dir, revert) {
        (Direction::Backward, Some(selections)) => editor.selections = selections.to_vec(),
        _ => {
            if let Some(at) = cursor {
                editor.selections = vec![Selection::caret(at)];
            }
        }
    }
}

impl Stepper for InMemoryStepper {
    fn fs_create(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsCreate, dir: Direction) -> Result<()> {
        match dir {
            Direction::Forward => {
                let item = wt.entry(uri);
                if item.file.is_some() {
                    return Err(TimelineError::FacetExists {
                        uri: uri.clone(),
                        facet: "file",
                    });
                }
                item.file = Some(e.file.clone());
            }
            Direction::Backward => {
                wt.existing(uri)?.file = None;
                wt.prune(uri);
            }
        }
        Ok(())
    }

    fn fs_change(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsChange, dir: Direction) -> Result<()> {
        let file = if dir.is_forward() { &e.file } else { &e.revert_file };
        wt.existing(uri)?.file = Some(file.clone());
        Ok(())
    }

    fn fs_delete(&mut self, wt: &mut Worktree, uri: &Uri, e: &FsDelete, dir: Direction) -> Result<()> {
        match dir {
            Direction::Forward => {
                wt.existing(uri)?.file = None;
                wt.prune(uri);
            }
            Direction::Backward => wt.entry(uri).file = Some(e.revert_file.clone()),
        }
        Ok(())
    }

    fn text_change(&mut self, wt: &mut Worktree, uri: &Uri, e: &TextChange, dir: Direction) -> Result<()> {
        let doc = document_mut(wt, uri)?;
        let mut cursor = None;
        match dir {
            Direction::Forward => {
                for change in &e.changes {
                    doc.apply_edit(change.range, &change.text)?;
                    cursor = Some(end_of_inserted(change.range.start, &change.text));
                }
            }
            Direction::Backward => {
                for change in e.changes.iter().rev() {
                    doc.apply_edit(change.revert_range, &change.revert_text)?;
                    cursor = Some(end_of_inserted(change.revert_range.start, &change.revert_text));
                }
            }
        }
        if e.update_selection {
            update_selections(wt, uri, cursor, dir, e.revert_selections.as_deref());
        }
        Ok(())
    }

    fn text_insert(&mut self, wt: &mut Worktree, uri: &Uri, e: &TextInsert, dir: Direction) -> Result<()> {
        let doc = document_mut(wt, uri)?;
        let at = match dir {
            Direction::Forward => {
                doc.apply_edit(Range::caret(e.revert_range.start), &e.text)?;
                e.revert_range.end
            }
            Direction::Backward => {
                doc.apply_edit(e.revert_range, "")?;
                e.revert_range.start
            }
        };
        if e.update_selection {
            update_selections(wt, uri, Some(at), dir, e.revert_selections.as_deref());
        }
        Ok(())
    }

    fn open_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &OpenTextDocument,
        dir: Direction,
    ) -> Result<()> {
        match dir {
            Direction::Forward => {
                if wt.document(uri).is_some() {
                    return Err(TimelineError::FacetExists {
                        uri: uri.clone(),
                        facet: "document",
                    });
                }
                let doc = match &e.text {
                    Some(text) => TextDocument::with_eol(text, e.eol, e.language_id.clone()),
                    None => self.reopen(wt, uri, &e.language_id)?,
                };
                wt.entry(uri).document = Some(doc);
            }
            Direction::Backward => {
                let item = wt.existing(uri)?;
                if item.editor.is_some() {
                    return Err(TimelineError::InvalidOp(format!(
                        "cannot unopen {uri} while its editor is shown"
                    )));
                }
                item.document
                    .take()
                    .ok_or_else(|| TimelineError::MissingDocument(uri.clone()))?;
                wt.prune(uri);
            }
        }
        Ok(())
    }

    fn close_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &CloseTextDocument,
        dir: Direction,
    ) -> Result<()> {
        match dir {
            Direction::Forward => {
                let item = wt.existing(uri)?;
                if item.editor.is_some() {
                    return Err(TimelineError::InvalidOp(format!(
                        "cannot close {uri} while its editor is shown"
                    )));
                }
                let doc = item
                    .document
                    .take()
                    .ok_or_else(|| TimelineError::MissingDocument(uri.clone()))?;
                let dirty = self.is_dirty(&doc, item.file.as_ref())?;
                item.closed.push(dirty.then_some(doc));
                wt.prune(uri);
            }
            Direction::Backward => {
                let item = wt.existing(uri)?;
                let record = item.closed.pop().ok_or_else(|| {
                    TimelineError::InvalidOp(format!("no close record for {uri}"))
                })?;
                let doc = record.unwrap_or_else(|| {
                    TextDocument::with_eol(&e.revert_text, e.revert_eol, e.revert_language_id.clone())
                });
                item.document = Some(doc);
            }
        }
        Ok(())
    }

    fn show_text_editor(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &ShowTextEditor,
        dir: Direction,
    ) -> Result<()> {
        match dir {
            Direction::Forward => {
                if e.just_opened {
                    if wt.document(uri).is_some() {
                        return Err(TimelineError::FacetExists {
                            uri: uri.clone(),
                            facet: "document",
                        });
                    }
                    let doc = self.reopen(wt, uri, "")?;
                    wt.entry(uri).document = Some(doc);
                }
                let item = wt.existing(uri)?;
                if item.document.is_none() {
                    return Err(TimelineError::MissingDocument(uri.clone()));
                }
                item.editor = Some(EditorView {
                    selections: e.selections.clone(),
                    visible_range: e.visible_range,
                });
                if e.activate {
                    wt.set_active_editor(Some(uri.clone()));
                }
            }
            Direction::Backward => {
                let version = match e.recorder_version {
                    0 => CURRENT_RECORDER_VERSION,
                    v => v,
                };
                if version >= 2 {
                    let item = wt.existing(uri)?;
                    item.editor = e.revert_selections.as_ref().map(|selections| EditorView {
                        selections: selections.clone(),
                        visible_range: e.revert_visible_range.unwrap_or_default(),
                    });
                    if e.just_opened {
                        item.editor = None;
                        item.document = None;
                    }
                } else {
                    if e.just_opened {
                        let item = wt.existing(uri)?;
                        item.editor = None;
                        item.document = None;
                    }
                    if let Some(other) = &e.revert_uri {
                        if let Some(editor) = wt.existing(other).ok().and_then(|i| i.editor.as_mut()) {
                            if let Some(selections) = &e.revert_selections {
                                editor.selections = selections.clone();
                            }
                            if let Some(range) = e.revert_visible_range {
                                editor.visible_range = range;
                            }
                        }
                    }
                }
                wt.set_active_editor(e.revert_uri.clone());
                wt.prune(uri);
            }
        }
        Ok(())
    }

    fn close_text_editor(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &CloseTextEditor,
        dir: Direction,
    ) -> Result<()> {
        match dir {
            Direction::Forward => {
                wt.existing(uri)?
                    .editor
                    .take()
                    .ok_or_else(|| TimelineError::MissingEditor(uri.clone()))?;
                if wt.active_editor() == Some(uri) {
                    wt.set_active_editor(None);
                }
            }
            Direction::Backward => {
                let item = wt.existing(uri)?;
                if item.document.is_none() {
                    return Err(TimelineError::MissingDocument(uri.clone()));
                }
                item.editor = Some(EditorView {
                    selections: e.revert_selections.clone(),
                    visible_range: e.revert_visible_range,
                });
                if e.revert_active {
                    wt.set_active_editor(Some(uri.clone()));
                }
            }
        }
        Ok(())
    }

    fn select(&mut self, wt: &mut Worktree, uri: &Uri, e: &Select, dir: Direction) -> Result<()> {
        let selections = if dir.is_forward() { &e.selections } else { &e.revert_selections };
        editor_mut(wt, uri)?.selections = selections.clone();
        Ok(())
    }

    fn scroll(&mut self, wt: &mut Worktree, uri: &Uri, e: &Scroll, dir: Direction) -> Result<()> {
        let range = if dir.is_forward() { e.visible_range } else { e.revert_visible_range };
        editor_mut(wt, uri)?.visible_range = range;
        Ok(())
    }

    fn save(&mut self, wt: &mut Worktree, uri: &Uri, _e: &Save, _dir: Direction) -> Result<()> {
        document_mut(wt, uri)?;
        Ok(())
    }

    fn update_text_document(
        &mut self,
        wt: &mut Worktree,
        uri: &Uri,
        e: &UpdateTextDocument,
        dir: Direction,
    ) -> Result<()> {
        let language_id = if dir.is_forward() { &e.language_id } else { &e.revert_language_id };
        document_mut(wt, uri)?.language_id = language_id.clone();
        Ok(())
    }
}
