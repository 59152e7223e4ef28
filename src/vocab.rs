// ============================================================================
// WORD VOCABULARY
// Frequency-ranked, so id order matches what the log-uniform sampler assumes.
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const UNK: &str = "<unk>";

pub struct Vocab {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    version: String,
    #[serde(rename = "vocabSize")]
    vocab_size: usize,
    words: Vec<String>,
}

/// Lowercased words; anything that is not alphanumeric or an inner
/// apostrophe separates them.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

impl Vocab {
    /// Keeps the `max_size - 1` most frequent words (ties broken
    /// alphabetically) after the reserved `<unk>` at id 0.
    pub fn build(text: &str, max_size: usize) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for w in words(text) { *counts.entry(w).or_default() += 1; }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keep = max_size.saturating_sub(1);
        let words = std::iter::once(UNK.to_string())
            .chain(ranked.into_iter().take(keep).map(|(w, _)| w))
            .collect();
        Self::from_words(words)
    }

    fn from_words(words: Vec<String>) -> Self {
        let index = words.iter().enumerate().map(|(i, w)| (w.clone(), i)).collect();
        Vocab { words, index }
    }

    pub fn len(&self) -> usize { self.words.len() }
    pub fn is_empty(&self) -> bool { self.words.is_empty() }

    pub fn id(&self, word: &str) -> Option<usize> { self.index.get(word).copied() }
    pub fn word(&self, id: usize) -> Option<&str> { self.words.get(id).map(String::as_str) }

    /// Unknown words map to 0.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        words(text).map(|w| self.id(&w).unwrap_or(0)).collect()
    }

    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter().map(|&id| self.word(id).unwrap_or(UNK)).collect::<Vec<_>>().join(" ")
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let file = VocabFile { version: "1".into(), vocab_size: self.len(), words: self.words.clone() };
        fs::write(path, serde_json::to_string_pretty(&file)?)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let file: VocabFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        if file.words.first().map(String::as_str) != Some(UNK) || file.words.len() != file.vocab_size {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("{} is not a vocabulary file", path.display())));
        }
        Ok(Self::from_words(file.words))
    }
}
