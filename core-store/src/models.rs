//! Domain models for the local token mirror

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

// =============================================================================
// Token kinds
// =============================================================================

/// Where a token kind lives, locally and on the remote ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindLayout {
    /// Table in the local mirror
    pub local_table: &'static str,
    /// Table on every remote ledger
    pub remote_table: &'static str,
    /// Remote column holding the mint block number
    pub order_field: &'static str,
}

const ERC721_LAYOUT: KindLayout = KindLayout {
    local_table: "erc721_tokens",
    remote_table: "nfts",
    order_field: "block_minted",
};

const ERC1155_LAYOUT: KindLayout = KindLayout {
    local_table: "erc1155_tokens",
    remote_table: "erc1155_tokens",
    order_field: "block_number",
};

/// Token standard of a mirrored record.
///
/// All table and column names that differ between kinds come from
/// [`TokenKind::layout`]; nothing else in the workspace matches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Erc721,
    Erc1155,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Erc721, TokenKind::Erc1155];

    pub fn layout(self) -> &'static KindLayout {
        match self {
            TokenKind::Erc721 => &ERC721_LAYOUT,
            TokenKind::Erc1155 => &ERC1155_LAYOUT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Erc721 => "erc721",
            TokenKind::Erc1155 => "erc1155",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "erc721" => Ok(TokenKind::Erc721),
            "erc1155" => Ok(TokenKind::Erc1155),
            other => Err(StoreError::InvalidData {
                field: "kind".to_string(),
                message: format!("unknown token kind '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Keys and records
// =============================================================================

/// `(contract, token_id)` identity of a token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub contract: String,
    pub token_id: String,
}

impl TokenKey {
    pub fn new(contract: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            token_id: token_id.into(),
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contract, self.token_id)
    }
}

/// A mirrored token and its acquisition state
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub key: TokenKey,
    pub kind: TokenKind,
    pub block_number: i64,
    pub block_hash: String,
    /// Raw metadata document as supplied by the remote
    pub metadata: String,
    pub token_uri: Option<String>,
    /// Public URL of the published renditions
    pub cached_location: Option<String>,
    pub processed: bool,
    /// Failed attempts since the record was (re)created
    pub attempt_count: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// True once the record has hit the given terminal ceiling without success
    pub fn is_abandoned(&self, terminal_ceiling: i64) -> bool {
        !self.processed && self.attempt_count >= terminal_ceiling
    }
}

/// A token as observed on a remote ledger, ready to be mirrored
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedToken {
    pub key: TokenKey,
    pub kind: TokenKind,
    pub block_number: i64,
    /// Hash of `block_number` on the remote that supplied the row
    pub block_hash: String,
    pub metadata: String,
    pub token_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_layouts_are_distinct() {
        let erc721 = TokenKind::Erc721.layout();
        let erc1155 = TokenKind::Erc1155.layout();

        assert_ne!(erc721.local_table, erc1155.local_table);
        assert_eq!(erc721.remote_table, "nfts");
        assert_eq!(erc721.order_field, "block_minted");
    }

    #[test]
    fn test_kind_string_round_trip() {
        for kind in TokenKind::ALL {
            assert_eq!(kind.as_str().parse::<TokenKind>().unwrap(), kind);
        }
        assert!("erc20".parse::<TokenKind>().is_err());
    }

    #[test]
    fn test_key_display() {
        let key = TokenKey::new("0xabc", "42");
        assert_eq!(key.to_string(), "0xabc:42");
    }
}
