// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Owns `paths.tokenizer_path` and decides where the tokenizer
// comes from:
//
//   1. the file already exists       → load it
//   2. built with `--features hub`   → fetch tokenizer.json of
//                                      `model_name` from the hub
//   3. otherwise                     → build a word-level
//                                      vocabulary from the
//                                      training split
//
// The word-level fallback writes the tokenizer JSON directly
// rather than going through a tokenizers Trainer; in
// tokenizers 0.15 `train_from_files` requires Trainer::Model to
// equal ModelWrapper, which the WordLevel trainer does not.
// Special tokens use the RoBERTa/Longformer ids so `<pad>` is
// 1 either way.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use tokenizers::Tokenizer;

const SPECIAL_TOKENS: [(&str, u32); 4] = [("<s>", 0), ("<pad>", 1), ("</s>", 2), ("<unk>", 3)];

/// Where the tokenizer in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerOrigin {
    Local,
    Hub,
    Built,
}

impl fmt::Display for TokenizerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenizerOrigin::Local => "existing file",
            TokenizerOrigin::Hub   => "Hugging Face hub",
            TokenizerOrigin::Built => "word-level vocabulary built from the training split",
        };
        f.write_str(s)
    }
}

pub struct TokenizerStore {
    path: PathBuf,
}

impl TokenizerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Return the tokenizer, acquiring it first if the file is missing.
    ///
    /// `training_texts` is only called when a vocabulary has to be
    /// built.
    pub fn acquire<F>(
        &self,
        model_name:     &str,
        vocab_size:     usize,
        training_texts: F,
    ) -> Result<(Tokenizer, TokenizerOrigin)>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        if self.exists() {
            tracing::info!("Loading existing tokenizer from '{}'", self.path.display());
            return Ok((self.load()?, TokenizerOrigin::Local));
        }

        if cfg!(feature = "hub") {
            let tokenizer = self.download(model_name)?;
            return Ok((tokenizer, TokenizerOrigin::Hub));
        }

        tracing::info!(
            "No tokenizer at '{}' and hub support is not compiled in; building one (vocab_size={})",
            self.path.display(),
            vocab_size
        );
        let texts = training_texts()?;
        Ok((self.build_and_save(&texts, vocab_size)?, TokenizerOrigin::Built))
    }

    /// Load a previously saved tokenizer from its JSON file.
    pub fn load(&self) -> Result<Tokenizer> {
        Tokenizer::from_file(&self.path)
            .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {}", self.path.display(), e))
    }

    /// Fetch `tokenizer.json` of `model_name` and save it locally.
    #[cfg(feature = "hub")]
    pub fn download(&self, model_name: &str) -> Result<Tokenizer> {
        tracing::info!("Downloading tokenizer for '{}'", model_name);
        let tokenizer = Tokenizer::from_pretrained(model_name, None)
            .map_err(|e| anyhow!("Cannot download tokenizer for '{model_name}': {e}"))?;

        self.ensure_parent()?;
        tokenizer
            .save(&self.path, true)
            .map_err(|e| anyhow!("Cannot save tokenizer to '{}': {}", self.path.display(), e))?;
        tracing::info!("Tokenizer saved to '{}'", self.path.display());
        Ok(tokenizer)
    }

    #[cfg(not(feature = "hub"))]
    pub fn download(&self, model_name: &str) -> Result<Tokenizer> {
        bail!(
            "cannot download the tokenizer for '{model_name}': rebuild with `--features hub` \
             or place a tokenizer.json at '{}'",
            self.path.display()
        )
    }

    /// Build a word-level vocabulary of the `vocab_size` most frequent
    /// words and write it in the HuggingFace tokenizer JSON format.
    pub fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        if vocab_size <= SPECIAL_TOKENS.len() {
            bail!("vocab_size {vocab_size} leaves no room for words after the special tokens");
        }
        self.ensure_parent()?;

        // ── Step 1: Word frequencies ──────────────────────────────────────────
        // Same split as the Whitespace pre-tokenizer: \w+|[^\w\s]+
        let word_re = Regex::new(r"\w+|[^\w\s]+")?;
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for m in word_re.find_iter(text) {
                *freq.entry(m.as_str().to_lowercase()).or_insert(0) += 1;
            }
        }

        // Most frequent first; ties alphabetical so rebuilds are identical
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(vocab_size - SPECIAL_TOKENS.len());

        // ── Step 2: Vocabulary ────────────────────────────────────────────────
        let mut vocab = serde_json::Map::new();
        for (token, id) in SPECIAL_TOKENS {
            vocab.insert(token.to_string(), serde_json::json!(id));
        }
        let mut next_id = SPECIAL_TOKENS.len() as u32;
        for (word, _) in &words {
            if !vocab.contains_key(word) {
                vocab.insert(word.clone(), serde_json::json!(next_id));
                next_id += 1;
            }
        }

        // ── Step 3: Tokenizer JSON ────────────────────────────────────────────
        let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
            .iter()
            .map(|(content, id)| {
                serde_json::json!({
                    "id": id, "content": content, "single_word": false,
                    "lstrip": false, "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "<unk>"
            }
        });

        fs::write(&self.path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write tokenizer JSON '{}'", self.path.display()))?;

        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            next_id,
            self.path.display()
        );

        self.load()
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
        }
        Ok(())
    }
}

/// Id of a special token such as `<pad>` or `<s>` in the vocabulary.
pub fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("token '{token}' is not in the tokenizer vocabulary"))
}
