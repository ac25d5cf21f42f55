//! The ordered, in-memory block collection.
//!
//! [BlockStore] is the single owner of block state. Insertion order is display order. Every
//! mutator is synchronous and leaves the collection with unique ids and case-insensitively unique
//! names before returning.

use crate::{
    config::EngineConfig,
    error::BlockflowError,
    properties::{Block, BlockField, BlockId, BlockKind, BlockResult, BlockStatus, InteractionState},
    reference::normalize_name,
};

#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: Vec<Block>,
    max_blocks: usize,
    id_length: usize,
    max_id_attempts: usize,
}

impl Default for BlockStore {
    fn default() -> Self {
        BlockStore::with_config(&EngineConfig::default())
    }
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        BlockStore {
            blocks: Vec::new(),
            max_blocks: config.max_blocks,
            id_length: config.id_length,
            max_id_attempts: config.max_id_attempts,
        }
    }

    /// Build a store from deserialized blocks with the default limits. See [Self::replace_all].
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, BlockflowError> {
        let mut store = Self::default();
        store.replace_all(blocks)?;
        Ok(store)
    }

    /// Replace the whole collection, keeping the given order.
    ///
    /// Duplicate ids are rejected. Duplicate names are resolved by suffixing the later block, the
    /// same way a rename collision is.
    pub fn replace_all(&mut self, blocks: Vec<Block>) -> Result<(), BlockflowError> {
        if blocks.len() > self.max_blocks {
            return Err(BlockflowError::Command(format!(
                "{} blocks exceed the configured maximum of {}",
                blocks.len(),
                self.max_blocks
            )));
        }
        let previous = std::mem::take(&mut self.blocks);
        for mut block in blocks {
            if self.contains(&block.id) {
                let duplicate = block.id.clone();
                self.blocks = previous;
                return Err(BlockflowError::Command(format!(
                    "Duplicate block id '{duplicate}'"
                )));
            }
            block.name = self.unique_name(&block.name, None);
            self.blocks.push(block);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.id.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Block> {
        self.blocks.clone()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| &b.id == id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &BlockId) -> Result<&mut Block, BlockflowError> {
        self.blocks
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| not_found(id))
    }

    /// Case-insensitive lookup; surrounding whitespace is ignored.
    pub fn find_by_name(&self, name: &str) -> Option<&Block> {
        let wanted = normalize_name(name);
        self.blocks.iter().find(|b| normalize_name(&b.name) == wanted)
    }

    /// `desired` if no other block uses it, otherwise `desired-2`, `desired-3`, ... whichever is
    /// first free. `exclude` is the block being renamed, which never collides with itself.
    pub fn unique_name(&self, desired: &str, exclude: Option<&BlockId>) -> String {
        let taken = |candidate: &str| {
            let candidate = normalize_name(candidate);
            self.blocks
                .iter()
                .any(|b| Some(&b.id) != exclude && normalize_name(&b.name) == candidate)
        };
        if !taken(desired) {
            return desired.to_string();
        }
        let mut suffix = 2usize;
        loop {
            let candidate = format!("{desired}-{suffix}");
            if !taken(&candidate) {
                tracing::debug!(
                    "[BlockStore] name '{}' already in use, using '{}'",
                    desired,
                    candidate
                );
                return candidate;
            }
            suffix += 1;
        }
    }

    fn fresh_id(&self) -> Result<BlockId, BlockflowError> {
        for _ in 0..self.max_id_attempts.max(1) {
            let id = BlockId::random(self.id_length);
            if !self.contains(&id) {
                return Ok(id);
            }
        }
        Err(BlockflowError::Custom(format!(
            "Could not generate a unique block id after {} attempts",
            self.max_id_attempts
        )))
    }

    fn ensure_capacity(&self) -> Result<(), BlockflowError> {
        if self.blocks.len() >= self.max_blocks {
            return Err(BlockflowError::Command(format!(
                "Block limit of {} reached",
                self.max_blocks
            )));
        }
        Ok(())
    }

    /// Create a new block at the end of the collection.
    pub fn insert(
        &mut self,
        kind: BlockKind,
        name: &str,
        data: &str,
        transform: Option<&str>,
    ) -> Result<BlockId, BlockflowError> {
        let block = Block::new(BlockId::from(""), name, kind, data);
        let block = match transform {
            Some(t) => block.with_transform(t),
            None => block,
        };
        self.insert_at(self.blocks.len(), block)
    }

    /// Place `block` at `index` (clamped), assigning it a fresh id and a unique name.
    pub fn insert_at(&mut self, index: usize, mut block: Block) -> Result<BlockId, BlockflowError> {
        self.ensure_capacity()?;
        block.id = self.fresh_id()?;
        block.name = self.unique_name(&block.name, None);
        if !block.kind.has_transform() {
            block.transform = None;
        }
        let id = block.id.clone();
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
        Ok(id)
    }

    /// Copy a block directly after the original. The copy gets its own id and the next free
    /// suffixed name; its result and cached input carry over.
    pub fn duplicate(&mut self, id: &BlockId) -> Result<BlockId, BlockflowError> {
        let index = self.position(id).ok_or_else(|| not_found(id))?;
        let mut copy = self.blocks[index].clone();
        copy.status = BlockStatus::Idle;
        copy.last_request_time = None;
        self.insert_at(index + 1, copy)
    }

    fn ensure_editable(&self, id: &BlockId, field: BlockField) -> Result<(), BlockflowError> {
        let block = self.get(id).ok_or_else(|| not_found(id))?;
        if block.interaction_state.allows(field) {
            Ok(())
        } else {
            Err(BlockflowError::Locked {
                id: id.clone(),
                field,
            })
        }
    }

    /// Rename a block, suffixing on collision. Returns the name actually applied.
    pub fn rename(&mut self, id: &BlockId, name: &str) -> Result<String, BlockflowError> {
        self.ensure_editable(id, BlockField::Name)?;
        let name = self.unique_name(name, Some(id));
        self.get_mut(id)?.name = name.clone();
        Ok(name)
    }

    pub fn set_data(&mut self, id: &BlockId, data: &str) -> Result<(), BlockflowError> {
        self.ensure_editable(id, BlockField::Data)?;
        self.get_mut(id)?.data = data.to_string();
        Ok(())
    }

    pub fn set_transform(&mut self, id: &BlockId, transform: &str) -> Result<(), BlockflowError> {
        self.ensure_editable(id, BlockField::Transform)?;
        let block = self.get_mut(id)?;
        if !block.kind.has_transform() {
            return Err(BlockflowError::Command(format!(
                "{} block {} has no transform",
                block.kind, id
            )));
        }
        block.transform = Some(transform.to_string());
        Ok(())
    }

    pub fn set_result(
        &mut self,
        id: &BlockId,
        result: Option<BlockResult>,
    ) -> Result<(), BlockflowError> {
        self.get_mut(id)?.result = result;
        Ok(())
    }

    pub fn set_interaction_state(
        &mut self,
        id: &BlockId,
        state: InteractionState,
    ) -> Result<(), BlockflowError> {
        self.get_mut(id)?.interaction_state = state;
        Ok(())
    }

    pub fn set_status(&mut self, id: &BlockId, status: BlockStatus) -> Result<(), BlockflowError> {
        self.get_mut(id)?.status = status;
        Ok(())
    }

    pub fn status(&self, id: &BlockId) -> Option<&BlockStatus> {
        self.get(id).map(|b| &b.status)
    }

    /// Move a block to `index` (clamped). Display order only.
    pub fn move_to(&mut self, id: &BlockId, index: usize) -> Result<(), BlockflowError> {
        let from = self.position(id).ok_or_else(|| not_found(id))?;
        let block = self.blocks.remove(from);
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
        Ok(())
    }

    /// Remove and return a block.
    pub fn delete(&mut self, id: &BlockId) -> Result<Block, BlockflowError> {
        let index = self.position(id).ok_or_else(|| not_found(id))?;
        Ok(self.blocks.remove(index))
    }
}

fn not_found(id: &BlockId) -> BlockflowError {
    BlockflowError::NotFound(format!("block {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_rename_collision_suffixes() {
        let mut store = BlockStore::new();
        store.insert(BlockKind::Static, "Intro", "", None).unwrap();
        let second = store.insert(BlockKind::Static, "Other", "", None).unwrap();
        let third = store.insert(BlockKind::Static, "Third", "", None).unwrap();
        assert_eq!(store.rename(&second, "Intro").unwrap(), "Intro-2");
        assert_eq!(store.rename(&third, "intro").unwrap(), "intro-3");
        // Renaming to its own name is not a collision.
        assert_eq!(store.rename(&second, "INTRO-2").unwrap(), "INTRO-2");
    }

    #[test]
    fn test_insert_assigns_unique_ids_and_names() {
        let mut store = BlockStore::new();
        let a = store.insert(BlockKind::Static, "A", "", None).unwrap();
        let b = store.insert(BlockKind::Static, "a", "", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(&b).unwrap().name, "a-2");
        assert_eq!(a.as_str().len(), EngineConfig::default().id_length);
    }

    #[test]
    fn test_duplicate_places_copy_after_original() {
        let mut store = BlockStore::new();
        let intro = store
            .insert(BlockKind::GenerativeText, "Intro", "hi", Some("shout"))
            .unwrap();
        store.insert(BlockKind::Static, "Tail", "", None).unwrap();
        let copy = store.duplicate(&intro).unwrap();
        let again = store.duplicate(&intro).unwrap();
        let names: Vec<_> = store.iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, vec!["Intro", "Intro-3", "Intro-2", "Tail"]);
        assert_eq!(store.get(&copy).unwrap().transform.as_deref(), Some("shout"));
        assert_ne!(copy, again);
    }

    #[test]
    fn test_interaction_state_guards_edits() {
        let mut store = BlockStore::new();
        let id = store
            .insert(BlockKind::GenerativeText, "B", "x", Some("t"))
            .unwrap();
        store
            .set_interaction_state(&id, InteractionState::Entry)
            .unwrap();
        assert!(store.set_data(&id, "y").is_ok());
        assert!(matches!(
            store.rename(&id, "C"),
            Err(BlockflowError::Locked {
                field: BlockField::Name,
                ..
            })
        ));
        assert!(store.set_transform(&id, "u").is_err());

        store
            .set_interaction_state(&id, InteractionState::Locked)
            .unwrap();
        assert!(store.set_data(&id, "z").is_err());
        assert_eq!(store.get(&id).unwrap().data, "y");
    }

    #[test]
    fn test_transform_rejected_for_static() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockKind::Static, "A", "", Some("t")).unwrap();
        assert_eq!(store.get(&id).unwrap().transform, None);
        assert!(matches!(
            store.set_transform(&id, "t"),
            Err(BlockflowError::Command(_))
        ));
    }

    #[test]
    fn test_replace_all_rejects_duplicate_ids() {
        let blocks = vec![
            Block::new("1", "A", BlockKind::Static, ""),
            Block::new("1", "B", BlockKind::Static, ""),
        ];
        assert!(BlockStore::from_blocks(blocks).is_err());

        let blocks = vec![
            Block::new("1", "A", BlockKind::Static, ""),
            Block::new("2", "a", BlockKind::Static, ""),
        ];
        let store = BlockStore::from_blocks(blocks).unwrap();
        assert_eq!(store.get(&BlockId::from("2")).unwrap().name, "a-2");
    }

    #[test]
    fn test_move_and_delete() {
        let mut store = BlockStore::new();
        let a = store.insert(BlockKind::Static, "A", "", None).unwrap();
        let b = store.insert(BlockKind::Static, "B", "", None).unwrap();
        store.move_to(&b, 0).unwrap();
        assert_eq!(store.ids(), vec![b.clone(), a.clone()]);
        let removed = store.delete(&b).unwrap();
        assert_eq!(removed.name, "B");
        assert!(store.delete(&b).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_block_limit() {
        let config = EngineConfig {
            max_blocks: 1,
            ..Default::default()
        };
        let mut store = BlockStore::with_config(&config);
        store.insert(BlockKind::Static, "A", "", None).unwrap();
        assert!(matches!(
            store.insert(BlockKind::Static, "B", "", None),
            Err(BlockflowError::Command(_))
        ));
    }
}
