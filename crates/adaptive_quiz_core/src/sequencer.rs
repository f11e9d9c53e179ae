//! crates/adaptive_quiz_core/src/sequencer.rs
//!
//! Slot enumeration and next-slot computation.
//!
//! Every question reachable from the main block gets a one-based slot number in
//! depth-first pre-order. The sequencer walks forward from an attempt's current
//! slot and returns the first question whose enclosing blocks all have their
//! conditions fulfilled, skipping whole subtrees whose gate is closed.

use std::collections::HashMap;

use tracing::debug;

use crate::condition::ResultLookup;
use crate::domain::{BlockId, ElementId, ElementRef};
use crate::tree::BlockTree;

/// The slot numbers of one enumeration of a block tree.
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    by_element: HashMap<ElementId, u32>,
    by_slot: Vec<ElementId>,
    question_counts: HashMap<BlockId, u32>,
}

impl SlotMap {
    /// Numbers the questions of `tree` depth-first, starting at 1.
    pub fn enumerate(tree: &BlockTree) -> Self {
        let mut map = SlotMap::default();
        map.number_block(tree, tree.root());
        map
    }

    fn number_block(&mut self, tree: &BlockTree, block: BlockId) -> u32 {
        let mut count = 0;
        for element in tree.children_of(block) {
            match element.target {
                ElementRef::Question(_) => {
                    self.by_slot.push(element.id);
                    self.by_element.insert(element.id, self.by_slot.len() as u32);
                    count += 1;
                }
                ElementRef::Block(child) => count += self.number_block(tree, child),
            }
        }
        self.question_counts.insert(block, count);
        count
    }

    /// The number of slots, i.e. of reachable questions.
    pub fn total(&self) -> u32 {
        self.by_slot.len() as u32
    }

    pub fn slot_of(&self, element: ElementId) -> Option<u32> {
        self.by_element.get(&element).copied()
    }

    pub fn element_at(&self, slot: u32) -> Option<ElementId> {
        let index = slot.checked_sub(1)? as usize;
        self.by_slot.get(index).copied()
    }

    /// The number of questions in the subtree of `block`.
    pub fn questions_in(&self, block: BlockId) -> u32 {
        self.question_counts.get(&block).copied().unwrap_or(0)
    }

    /// Slot-ordered `(slot, element)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, ElementId)> + '_ {
        self.by_slot
            .iter()
            .enumerate()
            .map(|(index, element)| (index as u32 + 1, *element))
    }
}

/// Decides which slot an attempt sees next.
pub struct SlotSequencer<'a> {
    tree: &'a BlockTree,
    slots: SlotMap,
}

impl<'a> SlotSequencer<'a> {
    pub fn new(tree: &'a BlockTree) -> Self {
        Self {
            tree,
            slots: SlotMap::enumerate(tree),
        }
    }

    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    /// The first eligible slot after `current`, or `None` when the attempt is done.
    ///
    /// Passing `0` yields the first slot an attempt should start at.
    pub fn next_slot(&self, current: u32, results: &dyn ResultLookup) -> Option<u32> {
        let mut counter = 1;
        self.walk(self.tree.root(), current, results, &mut counter)
    }

    fn walk(
        &self,
        block: BlockId,
        current: u32,
        results: &dyn ResultLookup,
        counter: &mut u32,
    ) -> Option<u32> {
        for element in self.tree.children_of(block) {
            match element.target {
                ElementRef::Question(_) => {
                    let slot = *counter;
                    *counter += 1;
                    if slot > current {
                        return Some(slot);
                    }
                }
                ElementRef::Block(child) => {
                    let count = self.slots.questions_in(child);
                    let first = *counter;
                    if count == 0 || first + count - 1 <= current {
                        *counter += count;
                        continue;
                    }
                    // A block the attempt is already inside was entered with its gate open.
                    if first > current && !self.is_open(child, results) {
                        debug!(block_id = %child, first_slot = first, skipped = count, "Skipping gated block");
                        *counter += count;
                        continue;
                    }
                    if let Some(slot) = self.walk(child, current, results, counter) {
                        return Some(slot);
                    }
                }
            }
        }
        None
    }

    fn is_open(&self, block: BlockId, results: &dyn ResultLookup) -> bool {
        self.tree
            .node(block)
            .ok()
            .and_then(|node| node.condition.as_ref())
            .map_or(true, |condition| condition.is_fulfilled(results))
    }
}
