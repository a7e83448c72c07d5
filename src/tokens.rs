//! BSS referral-token table.
//!
//! When the power-on operator stages an artifact tuple in BSS, BSS answers
//! with an opaque referral token. Nodes later report the token of the boot
//! they actually performed, and this table is how the engine maps that
//! report back to concrete artifacts. Entries are written once when BSS
//! hands out a token and never mutated; nothing in the engine prunes them.
//!
//! A token that is missing on read is a domain condition, not a storage
//! failure: the node is reporting a boot the engine never staged.

use serde::{Deserialize, Serialize};
use sled::Tree;
use thiserror::Error;

use crate::clock;

const TOKENS_TREE: &str = "bss_tokens_boot_artifacts";

/// The artifacts a token was issued for, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootArtifactRecord {
    pub kernel: String,
    pub initrd: String,
    pub kernel_parameters: String,
    pub timestamp: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// The engine has no record of staging this token.
    #[error("unknown BSS referral token {0:?}")]
    Unknown(String),
    #[error("token table error: {0}")]
    Database(#[from] sled::Error),
    #[error("token record corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistent token → artifacts mapping.
pub struct TokenTable {
    tree: Tree,
}

impl TokenTable {
    /// Open the token tree inside the engine's database. Idempotent.
    pub fn open(db: &sled::Db) -> Result<TokenTable, TokenError> {
        let tree = db.open_tree(TOKENS_TREE)?;
        Ok(TokenTable { tree })
    }

    /// Associate a referral token with the artifact tuple it was issued
    /// for. Stamps the record with the current time.
    pub fn put(
        &self,
        token: &str,
        kernel: &str,
        kernel_parameters: &str,
        initrd: &str,
    ) -> Result<(), TokenError> {
        let record = BootArtifactRecord {
            kernel: kernel.to_string(),
            initrd: initrd.to_string(),
            kernel_parameters: kernel_parameters.to_string(),
            timestamp: clock::now_string(),
        };
        let bytes = serde_json::to_vec(&record)?;
        self.tree.insert(token.as_bytes(), bytes)?;
        Ok(())
    }

    /// Look up the artifacts a token describes.
    pub fn get(&self, token: &str) -> Result<BootArtifactRecord, TokenError> {
        match self.tree.get(token.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(TokenError::Unknown(token.to_string())),
        }
    }

    /// Whether a token is known without deserializing its record.
    pub fn contains(&self, token: &str) -> Result<bool, TokenError> {
        Ok(self.tree.contains_key(token.as_bytes())?)
    }
}
