//! [crate::properties] contains the basic building blocks of a workflow: the [Block] entity and
//! the identifier, kind, result and editability types it is assembled from.
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
};
use tokio::time::Instant;
use uuid::Uuid;

/// Block ID
///
/// An opaque, short, random identifier assigned at creation time. Uniqueness is only guaranteed
/// within a single [crate::store::BlockStore]; the store retries generation until the id is
/// unused.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a random lowercase hex id of `len` characters (clamped to `1..=32`).
    pub fn random(len: usize) -> Self {
        let len = len.clamp(1, 32);
        let mut buffer = Uuid::encode_buffer();
        let encoded = Uuid::new_v4().simple().encode_lower(&mut buffer);
        BlockId(encoded[..len].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        BlockId(id.to_string())
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        BlockId(id)
    }
}

impl AsRef<str> for BlockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Plain text; its result is its reference-resolved data.
    #[default]
    Static,
    /// Data + transform sent to a text-completion back-end.
    GenerativeText,
    /// Data + transform sent to an image-generation back-end.
    GenerativeImage,
    /// A visual separator. Tracked as a graph node, never recomputed.
    Break,
    /// A user-supplied image. A constant-result leaf.
    ImportedImage,
}

impl BlockKind {
    /// Whether blocks of this kind carry a transform instruction.
    pub fn has_transform(&self) -> bool {
        matches!(self, BlockKind::GenerativeText | BlockKind::GenerativeImage)
    }

    /// Whether the propagation engine has any recomputation defined for this kind.
    pub fn recomputes(&self) -> bool {
        !matches!(self, BlockKind::Break | BlockKind::ImportedImage)
    }

    /// Whether recomputation goes through the external generation collaborator.
    pub fn is_generative(&self) -> bool {
        self.has_transform()
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BlockKind::Static => "static",
            BlockKind::GenerativeText => "generative-text",
            BlockKind::GenerativeImage => "generative-image",
            BlockKind::Break => "break",
            BlockKind::ImportedImage => "imported-image",
        };
        write!(f, "{label}")
    }
}

/// The last computed value of a block. An unset result is modelled as `Option::None` on the
/// [Block], which is distinct from `BlockResult::Text(String::new())`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockResult {
    Text(String),
    Binary {
        mime: String,
        #[serde(with = "hex::serde")]
        bytes: Vec<u8>,
    },
}

impl BlockResult {
    pub fn is_binary(&self) -> bool {
        matches!(self, BlockResult::Binary { .. })
    }

    /// The value substituted for a reference to this result.
    ///
    /// Binary results stringify to a content token (`<mime sha256:digest>`) so that a changed
    /// image changes the combined input of every block referencing it.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            BlockResult::Text(text) => Cow::Borrowed(text),
            BlockResult::Binary { mime, bytes } => {
                let digest = hex::encode(Sha256::digest(bytes));
                Cow::Owned(format!("<{mime} sha256:{digest}>"))
            }
        }
    }
}

impl From<&str> for BlockResult {
    fn from(text: &str) -> Self {
        BlockResult::Text(text.to_string())
    }
}

impl From<String> for BlockResult {
    fn from(text: String) -> Self {
        BlockResult::Text(text)
    }
}

/// The user-editable fields of a block.
#[derive(EnumSetType, Debug, Serialize, Deserialize)]
pub enum BlockField {
    Name,
    Data,
    Transform,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionState {
    #[default]
    Open,
    /// Only the data field may be edited.
    Entry,
    Locked,
}

impl InteractionState {
    pub fn frozen(&self) -> EnumSet<BlockField> {
        match self {
            InteractionState::Open => EnumSet::empty(),
            InteractionState::Entry => BlockField::Name | BlockField::Transform,
            InteractionState::Locked => EnumSet::all(),
        }
    }

    pub fn allows(&self, field: BlockField) -> bool {
        !self.frozen().contains(field)
    }
}

/// Per-block state during a propagation pass. Runtime only, never persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    #[default]
    Idle,
    Waiting,
    Done,
    Error(String),
}

impl Display for BlockStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockStatus::Idle => write!(f, "Idle"),
            BlockStatus::Waiting => write!(f, "Waiting"),
            BlockStatus::Done => write!(f, "Done"),
            BlockStatus::Error(msg) => write!(f, "Error({msg})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub kind: BlockKind,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BlockResult>,
    /// Reference-resolved `data` the current `result` was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_input: Option<String>,
    /// The `transform` the current `result` was computed with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_transform: Option<String>,
    #[serde(default)]
    pub interaction_state: InteractionState,
    #[serde(skip)]
    pub last_request_time: Option<Instant>,
    #[serde(skip)]
    pub status: BlockStatus,
}

impl Block {
    /// Create a block with an explicit id. Callers inserting into a store should go through
    /// [crate::store::BlockStore::insert], which assigns a unique id and name.
    pub fn new(id: impl Into<BlockId>, name: &str, kind: BlockKind, data: &str) -> Self {
        Block {
            id: id.into(),
            name: name.to_string(),
            kind,
            data: data.to_string(),
            transform: None,
            result: None,
            combined_input: None,
            applied_transform: None,
            interaction_state: InteractionState::default(),
            last_request_time: None,
            status: BlockStatus::default(),
        }
    }

    pub fn with_transform(mut self, transform: &str) -> Self {
        if self.kind.has_transform() {
            self.transform = Some(transform.to_string());
        }
        self
    }

    pub fn with_result(mut self, result: BlockResult) -> Self {
        self.result = Some(result);
        self
    }

    /// The transform as seen by the engine; kinds without transforms always yield `None`.
    pub fn effective_transform(&self) -> Option<&str> {
        if self.kind.has_transform() {
            self.transform.as_deref()
        } else {
            None
        }
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}
