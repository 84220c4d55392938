use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Catalog key of an entry, e.g. `"Aatrox"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    /// Image file reference, resolved to a URL by the image loader.
    pub image: String,
}

impl Entry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::new(id),
            name: name.into(),
            image: image.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Versioned, immutable catalog of selectable entries.
///
/// Entries are kept sorted by id so a 1-based random index maps to the same
/// entry on every run for a given version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roster {
    version: VersionTag,
    entries: Vec<Entry>,
}

impl Roster {
    /// Builds a roster; duplicate ids keep the first occurrence.
    pub fn new(version: VersionTag, entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut entries: Vec<Entry> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|later, earlier| later.id == earlier.id);
        Self { version, entries }
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries
            .binary_search_by(|entry| entry.id.cmp(id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Entry at 1-based `index`, matching the `1..=len` range requested from the
    /// randomness source.
    pub fn by_index(&self, index: u32) -> Option<&Entry> {
        let idx = usize::try_from(index).ok()?.checked_sub(1)?;
        self.entries.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}
