//! Keras-compatible word index.
//!
//! Accepts either the output of `Tokenizer.to_json()` (where the maps are
//! JSON-encoded strings nested inside `config`) or a plain file of the form
//! `{"word_index": {...}, "oov_token": "<oov>"}`. Text is split exactly the
//! way `texts_to_sequences` does it so ids line up with the trained model.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use timeline_common::{Result, TimelineError};

/// Keras' default `filters` argument.
pub const DEFAULT_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

#[derive(Debug, Clone)]
pub struct Vocabulary {
    word_index: HashMap<String, u32>,
    /// Indexed by id; slot 0 is the padding value and never holds a word.
    index_word: Vec<Option<String>>,
    oov_token: Option<String>,
    num_words: Option<usize>,
    filters: String,
    lower: bool,
    split: String,
    char_level: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VocabFile {
    Keras { config: KerasConfig },
    Plain(PlainVocab),
}

#[derive(Deserialize)]
struct KerasConfig {
    word_index: String,
    #[serde(default)]
    num_words: Option<usize>,
    #[serde(default = "default_filters")]
    filters: String,
    #[serde(default = "default_true")]
    lower: bool,
    #[serde(default = "default_split")]
    split: String,
    #[serde(default)]
    char_level: bool,
    #[serde(default)]
    oov_token: Option<String>,
}

#[derive(Deserialize)]
struct PlainVocab {
    word_index: HashMap<String, u32>,
    #[serde(default)]
    num_words: Option<usize>,
    #[serde(default = "default_filters")]
    filters: String,
    #[serde(default = "default_true")]
    lower: bool,
    #[serde(default = "default_split")]
    split: String,
    #[serde(default)]
    char_level: bool,
    #[serde(default)]
    oov_token: Option<String>,
}

fn default_filters() -> String { DEFAULT_FILTERS.to_string() }
fn default_true() -> bool { true }
fn default_split() -> String { " ".to_string() }

impl Vocabulary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let vocab = Self::from_json_str(&text)?;
        tracing::info!(target: "backend", "loaded vocabulary of {} words from {}", vocab.len(), path.display());
        Ok(vocab)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: VocabFile = serde_json::from_str(text)
            .map_err(|e| TimelineError::Vocabulary(format!("unrecognised tokenizer file: {e}")))?;
        let plain = match file {
            VocabFile::Keras { config } => PlainVocab {
                word_index: serde_json::from_str(&config.word_index)?,
                num_words: config.num_words,
                filters: config.filters,
                lower: config.lower,
                split: config.split,
                char_level: config.char_level,
                oov_token: config.oov_token,
            },
            VocabFile::Plain(plain) => plain,
        };
        Self::build(plain)
    }

    /// Builds an index the way a fresh Keras tokenizer would: the OOV token
    /// (if any) takes id 1 and words follow in order.
    pub fn from_words(oov_token: Option<&str>, words: &[&str]) -> Self {
        let mut word_index = HashMap::new();
        let mut index_word = vec![None];
        for word in oov_token.into_iter().chain(words.iter().copied()) {
            if word_index.contains_key(word) { continue; }
            word_index.insert(word.to_string(), index_word.len() as u32);
            index_word.push(Some(word.to_string()));
        }
        Self {
            word_index,
            index_word,
            oov_token: oov_token.map(str::to_string),
            num_words: None,
            filters: default_filters(),
            lower: true,
            split: default_split(),
            char_level: false,
        }
    }

    fn build(plain: PlainVocab) -> Result<Self> {
        if plain.split.is_empty() && !plain.char_level {
            return Err(TimelineError::Vocabulary("split separator must not be empty".into()));
        }
        // Keras assigns ids 1..=len with no gaps; anything sparser is not a tokenizer export.
        let max_id = plain.word_index.values().copied().max().unwrap_or(0) as usize;
        if max_id > plain.word_index.len() {
            return Err(TimelineError::Vocabulary(format!(
                "ids must run from 1 to {} without gaps, found id {max_id}",
                plain.word_index.len()
            )));
        }
        let mut index_word: Vec<Option<String>> = vec![None; max_id + 1];
        for (word, &id) in &plain.word_index {
            if id == 0 {
                return Err(TimelineError::Vocabulary(format!("word {word:?} uses reserved id 0")));
            }
            let slot = &mut index_word[id as usize];
            if let Some(existing) = slot {
                return Err(TimelineError::Vocabulary(format!(
                    "id {id} assigned to both {existing:?} and {word:?}"
                )));
            }
            *slot = Some(word.clone());
        }
        Ok(Self {
            word_index: plain.word_index,
            index_word,
            oov_token: plain.oov_token,
            num_words: plain.num_words.filter(|&n| n > 0),
            filters: plain.filters,
            lower: plain.lower,
            split: plain.split,
            char_level: plain.char_level,
        })
    }

    pub fn len(&self) -> usize { self.word_index.len() }

    pub fn is_empty(&self) -> bool { self.word_index.is_empty() }

    /// Highest assigned id; a model over this index has `max_id() + 1` outputs.
    pub fn max_id(&self) -> u32 { self.index_word.len().saturating_sub(1) as u32 }

    pub fn oov_token(&self) -> Option<&str> { self.oov_token.as_deref() }

    pub fn id(&self, word: &str) -> Option<u32> { self.word_index.get(word).copied() }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.index_word.get(id as usize).and_then(|w| w.as_deref())
    }

    /// Splits text into the tokens Keras would look up.
    pub fn split_words(&self, text: &str) -> Vec<String> {
        let text = if self.lower { text.to_lowercase() } else { text.to_string() };
        if self.char_level {
            return text.chars().map(String::from).collect();
        }
        let translated: String = text
            .chars()
            .map(|c| if self.filters.contains(c) { self.split.clone() } else { c.to_string() })
            .collect();
        translated
            .split(self.split.as_str())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `texts_to_sequences` for a single text.
    ///
    /// Unknown words become the OOV id when the index has one and are
    /// dropped otherwise. Ids at or above `num_words` are treated as unknown.
    pub fn texts_to_ids(&self, text: &str) -> Vec<u32> {
        let oov_id = self.oov_token.as_deref().and_then(|t| self.id(t));
        self.split_words(text)
            .iter()
            .filter_map(|word| match self.id(word) {
                Some(id) if self.num_words.is_some_and(|n| id as usize >= n) => oov_id,
                Some(id) => Some(id),
                None => oov_id,
            })
            .collect()
    }
}
