//! The safety-violation taxonomy: stable category codes mapped to names.
//!
//! Loaded once at startup and never mutated afterwards, so it can be shared
//! across concurrent guard evaluations without locking.

use crate::RedForgeResult;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One taxonomy category, unique by code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub code: String,
    pub name: String,
}

/// Read-only registry of taxonomy categories.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    by_code: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    taxonomy: Vec<TaxonomyEntry>,
}

impl Taxonomy {
    /// Builds a registry from category records. On duplicate codes the first
    /// occurrence wins.
    pub fn from_entries(entries: impl IntoIterator<Item = TaxonomyEntry>) -> Self {
        let mut taxonomy = Taxonomy::default();
        for entry in entries {
            let key = normalize(&entry.code);
            if taxonomy.by_code.contains_key(&key) {
                continue;
            }
            taxonomy.by_code.insert(key, taxonomy.entries.len());
            taxonomy.entries.push(entry);
        }
        taxonomy
    }

    /// Parses a `{"taxonomy": [{code, name}, ...]}` document.
    pub fn from_json(text: &str) -> RedForgeResult<Self> {
        let file: TaxonomyFile =
            serde_json::from_str(text).context("invalid taxonomy document")?;
        Ok(Self::from_entries(file.taxonomy))
    }

    /// Loads the registry from a policy config file. A missing, malformed or
    /// empty taxonomy is fatal to the whole run.
    pub fn load(path: &Path) -> RedForgeResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read taxonomy config {}", path.display()))?;
        let taxonomy = Self::from_json(&text)
            .with_context(|| format!("cannot parse taxonomy config {}", path.display()))?;
        if taxonomy.is_empty() {
            bail!("taxonomy config {} contains no categories", path.display());
        }
        Ok(taxonomy)
    }

    /// Case-insensitive lookup by category code.
    pub fn lookup(&self, code: &str) -> Option<&TaxonomyEntry> {
        self.by_code
            .get(&normalize(code))
            .map(|&index| &self.entries[index])
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}
