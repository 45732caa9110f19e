use serde::{Deserialize, Serialize};

use crate::{EndOfLine, Position, Range, Result, TimelineError};

/// Line buffer of an open document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocument {
    pub lines: Vec<String>,
    pub eol: EndOfLine,
    pub language_id: String,
}

impl TextDocument {
    /// Builds a document, detecting the line ending from the text.
    pub fn from_text(text: &str, language_id: impl Into<String>) -> Self {
        let eol = if text.contains("\r\n") {
            EndOfLine::CrLf
        } else {
            EndOfLine::Lf
        };
        Self::with_eol(text, eol, language_id)
    }

    pub fn with_eol(text: &str, eol: EndOfLine, language_id: impl Into<String>) -> Self {
        Self {
            lines: split_lines(text),
            eol,
            language_id: language_id.into(),
        }
    }

    pub fn text(&self) -> String {
        self.lines.join(self.eol.as_str())
    }

    pub fn end(&self) -> Position {
        let last = self.lines.len().saturating_sub(1);
        let character = self.lines.get(last).map_or(0, |l| l.chars().count());
        Position::new(last as u32, character as u32)
    }

    /// Replaces `range` with `text`, returning the edit that undoes it.
    pub fn apply_edit(&mut self, range: Range, text: &str) -> Result<(Range, String)> {
        self.check_range(range)?;
        let (start, end) = (range.start, range.end);

        let first = &self.lines[start.line as usize];
        let (prefix, rest) = split_at_char(first, start.character as usize);
        let prefix = prefix.to_string();

        let replaced = if start.line == end.line {
            let (middle, _) = split_at_char(rest, (end.character - start.character) as usize);
            middle.to_string()
        } else {
            let mut parts = vec![rest.to_string()];
            for line in &self.lines[start.line as usize + 1..end.line as usize] {
                parts.push(line.clone());
            }
            let last = &self.lines[end.line as usize];
            let (head, _) = split_at_char(last, end.character as usize);
            parts.push(head.to_string());
            parts.join(self.eol.as_str())
        };

        let last = &self.lines[end.line as usize];
        let (_, suffix) = split_at_char(last, end.character as usize);
        let suffix = suffix.to_string();

        let mut inserted = split_lines(text);
        if let Some(first) = inserted.first_mut() {
            first.insert_str(0, &prefix);
        }
        if let Some(last) = inserted.last_mut() {
            last.push_str(&suffix);
        }
        self.lines
            .splice(start.line as usize..=end.line as usize, inserted);

        let revert_range = Range::new(start, end_of_inserted(start, text));
        Ok((revert_range, replaced))
    }

    fn check_range(&self, range: Range) -> Result<()> {
        let valid = |p: Position| {
            self.lines
                .get(p.line as usize)
                .is_some_and(|l| p.character as usize <= l.chars().count())
        };
        if range.start > range.end || !valid(range.start) || !valid(range.end) {
            return Err(TimelineError::RangeOutOfBounds(range));
        }
        Ok(())
    }
}

/// Splits on `\n`, dropping a trailing `\r` from each line. Never empty.
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

/// Position right after `text` once inserted at `at`.
pub(crate) fn end_of_inserted(at: Position, text: &str) -> Position {
    let lines = split_lines(text);
    let tail = lines.last().map_or(0, |l| l.chars().count()) as u32;
    if lines.len() == 1 {
        Position::new(at.line, at.character + tail)
    } else {
        Position::new(at.line + lines.len() as u32 - 1, tail)
    }
}

fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}
