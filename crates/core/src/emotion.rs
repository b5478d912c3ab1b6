use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::{self, ConfigError};

/// Most emotions one session can carry.
pub const MAX_EMOTIONS: usize = 3;

/// Ordered, duplicate-free emotion labels in detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionSet(Vec<String>);

impl EmotionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise an untrusted list: trims labels, drops blanks and duplicates,
    /// keeps at most `MAX_EMOTIONS`.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for label in labels {
            set.insert(label.as_ref().trim(), MAX_EMOTIONS);
        }
        set
    }

    /// Append `label` unless it is blank, already present, or the set holds `cap` entries.
    /// Returns whether it was added.
    pub fn insert(&mut self, label: &str, cap: usize) -> bool {
        if label.is_empty() || self.0.len() >= cap.min(MAX_EMOTIONS) || self.contains(label) {
            return false;
        }
        self.0.push(label.to_owned());
        true
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Labels joined for prompt text: "A", "A and B", "A and B and C".
    pub fn joined(&self) -> String {
        self.0.join(" and ")
    }
}

impl fmt::Display for EmotionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Fixed lookup from card color to emotion label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionMap(BTreeMap<String, String>);

impl Default for EmotionMap {
    fn default() -> Self {
        Self(
            [
                ("blue", "Relieved"),
                ("purple", "Overwhelmed"),
                ("yellow", "Confident"),
                ("gray", "Skeptical"),
                ("green", "Satisfied"),
                ("red", "Frustrated"),
            ]
            .into_iter()
            .map(|(c, e)| (c.to_owned(), e.to_owned()))
            .collect(),
        )
    }
}

impl EmotionMap {
    pub fn from_pairs<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            what: "emotion map".into(),
            source,
        })
    }

    /// Load an override table from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let map = Self::parse(&config::read_file(path)?)?;
        tracing::info!(path = %path.display(), entries = map.0.len(), "emotion map loaded");
        Ok(map)
    }

    /// Built-in table, or the file at `path` when given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn emotion_for(&self, color: &str) -> Option<&str> {
        self.0.get(color).map(String::as_str)
    }
}

/// Display color for an emotion label, as printed on the physical cards.
pub fn palette_hex(emotion: &str) -> Option<&'static str> {
    match emotion {
        "Relieved" => Some("#6EC1E4"),
        "Overwhelmed" => Some("#6B3FA0"),
        "Confident" => Some("#F7B500"),
        "Skeptical" => Some("#708090"),
        "Satisfied" => Some("#50C878"),
        "Frustrated" => Some("#E63946"),
        _ => None,
    }
}
