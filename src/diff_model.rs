//! The recursive structural-diff manifest (`.bireus`) at the root of every
//! patch archive.
//!
//! Field order is the JSON wire contract: a `.bireus` loaded then
//! re-serialized must be byte-equal. Plain structs (not maps) with fields
//! declared in the required order give us that for free via serde's default
//! struct serialization.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crc;

/// Protocol version this client/server pair implements. Bumped whenever the
/// manifest shape or patch-application semantics change incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
    Unchanged,
    Delta,
    Bsdiff,
    Zipdelta,
}

impl Action {
    pub fn is_legal_for(self, item_type: ItemType) -> bool {
        use Action::*;
        use ItemType::*;
        match item_type {
            File => matches!(self, Add | Remove | Unchanged | Bsdiff | Zipdelta),
            Directory => matches!(self, Add | Remove | Delta),
        }
    }
}

/// One node of the recursive structural diff: a file or directory
/// transition between `base` and `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub name: String,
    pub action: Action,
    pub items: Vec<DiffItem>,
    /// Present only for `type == file`; `#[serde(skip_serializing_if)]`
    /// keeps directory items from emitting spurious CRC fields, matching
    /// spec.md §4.2's "included only for type==file" key-order contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_crc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_crc: Option<String>,
}

impl DiffItem {
    pub fn new_file(name: impl Into<String>, action: Action, base_crc: Option<String>, target_crc: Option<String>) -> Self {
        let item = DiffItem {
            item_type: ItemType::File,
            name: name.into(),
            action,
            items: Vec::new(),
            base_crc,
            target_crc,
        };
        debug_assert!(action.is_legal_for(ItemType::File));
        item
    }

    pub fn new_directory(name: impl Into<String>, action: Action) -> Self {
        let item = DiffItem {
            item_type: ItemType::Directory,
            name: name.into(),
            action,
            items: Vec::new(),
            base_crc: None,
            target_crc: None,
        };
        debug_assert!(action.is_legal_for(ItemType::Directory));
        item
    }

    /// Total count of file/directory nodes in this subtree, including self.
    pub fn node_count(&self) -> usize {
        let mut count = 1;
        let mut queue: VecDeque<&DiffItem> = self.items.iter().collect();
        while let Some(item) = queue.pop_front() {
            count += 1;
            queue.extend(item.items.iter());
        }
        count
    }
}

/// The patch manifest at the root of a patch archive (`.bireus`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHead {
    pub repository: String,
    pub base_version: String,
    pub target_version: String,
    pub protocol: u32,
    /// Exactly one element: the synthetic root directory `DiffItem`
    /// describing the whole tree transition (spec.md §3).
    pub items: Vec<DiffItem>,
}

impl DiffHead {
    pub fn new(repository: impl Into<String>, base_version: impl Into<String>, target_version: impl Into<String>) -> Self {
        DiffHead {
            repository: repository.into(),
            base_version: base_version.into(),
            target_version: target_version.into(),
            protocol: PROTOCOL_VERSION,
            items: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<&DiffItem> {
        self.items.first()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize DiffHead")
    }

    pub fn load_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Render a CRC32 hex string or [`crc::ZIPFILE_SENTINEL`] for a zipdelta item.
pub fn zipfile_sentinel() -> String {
    crc::ZIPFILE_SENTINEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_byte_equal() {
        let mut head = DiffHead::new("repo", "v1", "v2");
        let mut root = DiffItem::new_directory("", Action::Delta);
        root.items.push(DiffItem::new_file(
            "hello.txt",
            Action::Add,
            None,
            Some("0xc00f1971".to_string()),
        ));
        head.items.push(root);

        let json = head.to_json().unwrap();
        let reparsed: DiffHead = serde_json::from_str(&json).unwrap();
        let rejson = reparsed.to_json().unwrap();
        assert_eq!(json, rejson);
    }

    #[test]
    fn directory_items_omit_crc_fields() {
        let root = DiffItem::new_directory("sub", Action::Add);
        let json = serde_json::to_string(&root).unwrap();
        assert!(!json.contains("base_crc"));
        assert!(!json.contains("target_crc"));
    }

    #[test]
    fn field_order_matches_spec() {
        let head = DiffHead::new("repo", "v1", "v2");
        let json = serde_json::to_string(&head).unwrap();
        let repo_idx = json.find("\"repository\"").unwrap();
        let base_idx = json.find("\"base_version\"").unwrap();
        let target_idx = json.find("\"target_version\"").unwrap();
        let items_idx = json.find("\"items\"").unwrap();
        assert!(repo_idx < base_idx && base_idx < target_idx && target_idx < items_idx);
    }
}
