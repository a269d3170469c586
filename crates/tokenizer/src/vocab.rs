use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, TokenizerError};

/// Bidirectional token <-> id table. Ids are dense, starting at 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocab {
    pub token_to_id: HashMap<String, u32>,
    pub id_to_token: HashMap<u32, String>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `token` with the next free id, or returns its existing id.
    pub fn push(&mut self, token: &str) -> u32 {
        if let Some(id) = self.get_id(token) {
            return id;
        }
        let id = self.len() as u32;
        self.token_to_id.insert(token.to_string(), id);
        self.id_to_token.insert(id, token.to_string());
        id
    }

    pub fn get_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn get_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Writes the `token -> id` map as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.token_to_id)?;
        Ok(())
    }

    /// Reads a `token -> id` JSON map, rejecting ids used twice.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let token_to_id: HashMap<String, u32> = serde_json::from_reader(reader)?;

        let mut id_to_token = HashMap::with_capacity(token_to_id.len());
        for (token, &id) in &token_to_id {
            if id_to_token.insert(id, token.clone()).is_some() {
                return Err(TokenizerError::VocabMismatch(id));
            }
        }

        Ok(Self {
            token_to_id,
            id_to_token,
        })
    }
}
