//! Reference resolution for a single block's data.
//!
//! Resolution classifies every distinct referenced name, reports problems as
//! [ReferenceDiagnostic]s rather than errors, and substitutes every valid, ready reference with
//! the referenced block's result. Anything else stays in place as literal text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    graph::DependencyGraph,
    properties::{BlockId, BlockResult},
    reference::{distinct_names, normalize_name, parse_references},
    store::BlockStore,
};

/// A non-fatal problem with one reference. The reference is treated as invalid; the block's other
/// references still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceDiagnostic {
    /// The name does not match any block.
    UnresolvedReference(String),
    /// The name resolves to the referencing block itself.
    SelfReference(String),
    /// The referenced block also references this block directly.
    DirectCircularReference { name: String, other: BlockId },
}

impl ReferenceDiagnostic {
    pub fn name(&self) -> &str {
        match self {
            ReferenceDiagnostic::UnresolvedReference(name) => name,
            ReferenceDiagnostic::SelfReference(name) => name,
            ReferenceDiagnostic::DirectCircularReference { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableReference {
    pub name: String,
    pub id: BlockId,
    pub result: BlockResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub has_references: bool,
    pub invalid_references: Vec<String>,
    /// Existing blocks whose result is still unset.
    pub not_ready_references: Vec<String>,
    pub available_references: Vec<AvailableReference>,
    /// Data with every valid, ready reference replaced by the referenced result.
    pub resolved_text: String,
    pub diagnostics: Vec<ReferenceDiagnostic>,
}

impl Resolution {
    /// True when every reference was substituted.
    pub fn is_complete(&self) -> bool {
        self.invalid_references.is_empty() && self.not_ready_references.is_empty()
    }

    /// Referenced binary results, handed to generators alongside the resolved text.
    pub fn attachments(&self) -> Vec<AvailableReference> {
        self.available_references
            .iter()
            .filter(|r| r.result.is_binary())
            .cloned()
            .collect()
    }
}

enum Classified<'a> {
    Invalid,
    NotReady,
    Available(&'a BlockResult),
}

/// Resolve the references in `data`, written by the block called `self_name`.
///
/// The graph is rebuilt from `store` first so the direct-circular check sees current edges.
/// Longer cycles are not detected here; they surface as [crate::graph::CycleError] when a
/// propagation batch is ordered.
pub fn resolve_references(
    data: &str,
    self_name: &str,
    store: &BlockStore,
    graph: &mut DependencyGraph,
) -> Resolution {
    graph.rebuild(store);
    let self_id = store.find_by_name(self_name).map(|b| b.id.clone());

    let mut resolution = Resolution::default();
    let mut classified: BTreeMap<String, Classified<'_>> = BTreeMap::new();

    for name in distinct_names(data) {
        resolution.has_references = true;
        let class = match store.find_by_name(&name) {
            None => {
                resolution
                    .diagnostics
                    .push(ReferenceDiagnostic::UnresolvedReference(name.clone()));
                Classified::Invalid
            }
            Some(target) if Some(&target.id) == self_id.as_ref() => {
                resolution
                    .diagnostics
                    .push(ReferenceDiagnostic::SelfReference(name.clone()));
                Classified::Invalid
            }
            Some(target)
                if self_id.as_ref().is_some_and(|me| {
                    graph.has_edge(me, &target.id) && graph.has_edge(&target.id, me)
                }) =>
            {
                resolution
                    .diagnostics
                    .push(ReferenceDiagnostic::DirectCircularReference {
                        name: name.clone(),
                        other: target.id.clone(),
                    });
                Classified::Invalid
            }
            Some(target) => match &target.result {
                Some(result) => {
                    resolution.available_references.push(AvailableReference {
                        name: name.clone(),
                        id: target.id.clone(),
                        result: result.clone(),
                    });
                    Classified::Available(result)
                }
                None => Classified::NotReady,
            },
        };
        match class {
            Classified::Invalid => resolution.invalid_references.push(name.clone()),
            Classified::NotReady => resolution.not_ready_references.push(name.clone()),
            Classified::Available(_) => {}
        }
        classified.insert(normalize_name(&name), class);
    }

    let mut resolved = String::with_capacity(data.len());
    let mut cursor = 0;
    for reference in parse_references(data) {
        if let Some(Classified::Available(result)) = classified.get(&normalize_name(&reference.name))
        {
            resolved.push_str(&data[cursor..reference.span.start]);
            resolved.push_str(&result.as_text());
            cursor = reference.span.end;
        }
    }
    resolved.push_str(&data[cursor..]);
    resolution.resolved_text = resolved;

    tracing::trace!(
        "[Resolver] '{}': {} available, {} not ready, {} invalid",
        self_name,
        resolution.available_references.len(),
        resolution.not_ready_references.len(),
        resolution.invalid_references.len()
    );
    resolution
}
