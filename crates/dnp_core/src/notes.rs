use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dnp_proto::RecordKind;

use crate::error::CoreError;
use crate::records::{Item, RecordBody, RecordManager};

pub const DEFAULT_NOTE_TITLE: &str = "Untitled Note";
pub const COPY_SUFFIX: &str = " (Copy)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoteBody {
    pub title: String,
    pub content: String,
    /// Lowercase, unique, in insertion order.
    pub tags: Vec<String>,
    pub archived: bool,
}

impl Default for NoteBody {
    fn default() -> Self {
        Self {
            title: DEFAULT_NOTE_TITLE.to_string(),
            content: String::new(),
            tags: Vec::new(),
            archived: false,
        }
    }
}

impl NoteBody {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags.into_iter().map(|t| t.as_ref().to_string()).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        normalize_tag(tag).is_some_and(|t| self.tags.contains(&t))
    }
}

/// Partial update. Fields left `None` are untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Trimmed and lowercased; `None` when nothing is left.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let t = tag.trim().to_lowercase();
    (!t.is_empty()).then_some(t)
}

impl RecordBody for NoteBody {
    const KIND: RecordKind = RecordKind::Note;

    fn normalize(&mut self, _now_ms: i64) {
        let title = self.title.trim();
        self.title = if title.is_empty() {
            DEFAULT_NOTE_TITLE.to_string()
        } else {
            title.to_string()
        };
        let mut seen = BTreeSet::new();
        self.tags = self
            .tags
            .iter()
            .filter_map(|t| normalize_tag(t))
            .filter(|t| seen.insert(t.clone()))
            .collect();
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.content.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.contains(needle))
    }

    fn duplicate(&self) -> Self {
        Self {
            title: format!("{}{COPY_SUFFIX}", self.title),
            content: self.content.clone(),
            tags: self.tags.clone(),
            archived: false,
        }
    }
}

pub type NoteManager = RecordManager<NoteBody>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStats {
    pub total: usize,
    pub total_words: usize,
    pub total_characters: usize,
    /// Characters per note, rounded.
    pub average_length: usize,
    pub tags_count: usize,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

impl RecordManager<NoteBody> {
    /// `Ok(false)` if the note already carries the tag.
    pub async fn add_tag(&self, id: &str, tag: &str) -> Result<bool, CoreError> {
        let tag = normalize_tag(tag)
            .ok_or_else(|| CoreError::InvalidInput("tag is empty".into()))?;
        let note = self
            .get(id)
            .ok_or_else(|| CoreError::not_found(RecordKind::Note, id))?;
        if note.body.tags.contains(&tag) {
            return Ok(false);
        }
        self.modify(id, move |body| {
            body.tags.push(tag);
            Ok(())
        })
        .await?;
        Ok(true)
    }

    /// `Ok(false)` if the tag was not there.
    pub async fn remove_tag(&self, id: &str, tag: &str) -> Result<bool, CoreError> {
        let note = self
            .get(id)
            .ok_or_else(|| CoreError::not_found(RecordKind::Note, id))?;
        let Some(tag) = normalize_tag(tag).filter(|t| note.body.tags.contains(t)) else {
            return Ok(false);
        };
        self.modify(id, move |body| {
            body.tags.retain(|t| *t != tag);
            Ok(())
        })
        .await?;
        Ok(true)
    }

    /// Every tag in use, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        let tags: BTreeSet<String> = self
            .list()
            .into_iter()
            .flat_map(|n| n.body.tags)
            .collect();
        tags.into_iter().collect()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<Item<NoteBody>> {
        match normalize_tag(tag) {
            Some(tag) => self.filter(|n| n.body.tags.contains(&tag)),
            None => Vec::new(),
        }
    }

    pub async fn set_archived(&self, id: &str, archived: bool) -> Result<Item<NoteBody>, CoreError> {
        self.update(
            id,
            &NotePatch {
                archived: Some(archived),
                ..NotePatch::default()
            },
        )
        .await
    }

    pub fn archived(&self) -> Vec<Item<NoteBody>> {
        self.filter(|n| n.body.archived)
    }

    pub fn active(&self) -> Vec<Item<NoteBody>> {
        self.filter(|n| !n.body.archived)
    }

    pub fn stats(&self) -> NoteStats {
        let notes = self.list();
        let total = notes.len();
        let total_words = notes
            .iter()
            .map(|n| n.body.content.split_whitespace().count())
            .sum();
        let total_characters: usize = notes.iter().map(|n| n.body.content.chars().count()).sum();
        let average_length = if total == 0 {
            0
        } else {
            (total_characters as f64 / total as f64).round() as usize
        };
        NoteStats {
            total,
            total_words,
            total_characters,
            average_length,
            tags_count: self.all_tags().len(),
            oldest: notes.iter().map(|n| n.created_at).min(),
            newest: notes.iter().map(|n| n.created_at).max(),
        }
    }
}
