//! crates/adaptive_quiz_core/src/tree.rs
//!
//! An arena holding a quiz's whole block tree, loaded once per request.
//!
//! Every node records the id of its parent, so parent lookup does not have to
//! search the tree. Loading verifies that the blocks reachable from the main
//! block really form a tree: a block reached twice is an inconsistency.

use std::collections::HashMap;

use tracing::warn;

use crate::domain::{
    BlockElement, BlockId, BlockRecord, Condition, ConditionOwner, ElementId, ElementRef, Quiz,
    QuizId,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::QuizStore;

/// One block of the tree with everything needed to traverse it.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub record: BlockRecord,
    pub parent: Option<BlockId>,
    /// Children ordered by slot.
    pub children: Vec<BlockElement>,
    /// The gate of this block; always `None` for the main block.
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct BlockTree {
    quiz_id: QuizId,
    root: BlockId,
    nodes: HashMap<BlockId, TreeNode>,
    elements: HashMap<ElementId, BlockElement>,
}

impl BlockTree {
    /// Loads every block reachable from the quiz's main block.
    pub async fn load(store: &dyn QuizStore, quiz: &Quiz) -> QuizResult<Self> {
        let mut tree = BlockTree {
            quiz_id: quiz.id,
            root: quiz.main_block_id,
            nodes: HashMap::new(),
            elements: HashMap::new(),
        };

        let mut pending = vec![(quiz.main_block_id, None)];
        while let Some((block_id, parent)) = pending.pop() {
            if tree.nodes.contains_key(&block_id) {
                return Err(tree.inconsistent(format!("block {} is reachable twice", block_id)));
            }

            let record = store.get_block(block_id).await?;
            if record.quiz_id != quiz.id {
                return Err(tree.inconsistent(format!(
                    "block {} belongs to quiz {}",
                    block_id, record.quiz_id
                )));
            }
            let children = store.get_block_elements(block_id).await?;
            let condition = match parent {
                Some(_) => store.get_condition(ConditionOwner::Block(block_id)).await?,
                None => None,
            };

            for element in children.iter().rev() {
                if let ElementRef::Block(child) = element.target {
                    pending.push((child, Some(block_id)));
                }
            }
            for element in &children {
                tree.elements.insert(element.id, element.clone());
            }
            tree.nodes.insert(
                block_id,
                TreeNode {
                    record,
                    parent,
                    children,
                    condition,
                },
            );
        }

        Ok(tree)
    }

    fn inconsistent(&self, detail: String) -> QuizError {
        warn!(quiz_id = %self.quiz_id, detail = detail.as_str(), "Inconsistent block tree");
        QuizError::InconsistentTree {
            quiz_id: self.quiz_id,
            detail,
        }
    }

    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.nodes.contains_key(&block)
    }

    pub fn node(&self, block: BlockId) -> QuizResult<&TreeNode> {
        self.nodes
            .get(&block)
            .ok_or_else(|| self.inconsistent(format!("block {} is not part of the tree", block)))
    }

    /// Every block of the tree in depth-first pre-order, main block first.
    pub fn blocks(&self) -> Vec<&TreeNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut pending = vec![self.root];
        while let Some(block) = pending.pop() {
            let Some(node) = self.nodes.get(&block) else {
                continue;
            };
            out.push(node);
            pending.extend(node.children.iter().rev().filter_map(BlockElement::sub_block));
        }
        out
    }

    /// Children of a block that is known to be in the tree.
    pub(crate) fn children_of(&self, block: BlockId) -> &[BlockElement] {
        self.nodes
            .get(&block)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Looks up any element of the tree by id.
    pub fn element(&self, element: ElementId) -> Option<&BlockElement> {
        self.elements.get(&element)
    }

    /// The parent of `block`, `None` for the main block.
    pub fn parent_of(&self, block: BlockId) -> QuizResult<Option<BlockId>> {
        if block == self.root {
            return Ok(None);
        }
        match self.node(block)?.parent {
            Some(parent) => Ok(Some(parent)),
            None => Err(self.inconsistent(format!("block {} has no parent", block))),
        }
    }

    /// The chain of blocks from the main block down to `block`, inclusive.
    pub fn path_to(&self, block: BlockId) -> QuizResult<Vec<BlockId>> {
        let mut path = vec![block];
        let mut current = block;
        while let Some(parent) = self.parent_of(current)? {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// True if the block or any nested block contains a question.
    pub fn has_questions(&self, block: BlockId) -> bool {
        self.children_of(block).iter().any(|element| match element.target {
            ElementRef::Question(_) => true,
            ElementRef::Block(child) => self.has_questions(child),
        })
    }

    /// The siblings that precede `block` in its parent's child order.
    ///
    /// These are the only elements a condition on `block` may reference.
    pub fn condition_candidates(&self, block: BlockId) -> QuizResult<Vec<BlockElement>> {
        let Some(parent) = self.parent_of(block)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .children_of(parent)
            .iter()
            .take_while(|element| element.target != ElementRef::Block(block))
            .cloned()
            .collect())
    }

    /// All question elements in depth-first pre-order.
    pub fn question_elements(&self) -> Vec<&BlockElement> {
        let mut questions = Vec::new();
        self.collect_questions(self.root, &mut questions);
        questions
    }

    fn collect_questions<'a>(&'a self, block: BlockId, out: &mut Vec<&'a BlockElement>) {
        for element in self.children_of(block) {
            match element.target {
                ElementRef::Question(_) => out.push(element),
                ElementRef::Block(child) => self.collect_questions(child, out),
            }
        }
    }

    /// The question elements inside `element`: itself for a question, its
    /// subtree's questions for a block.
    pub fn questions_within<'a>(&'a self, element: &'a BlockElement) -> Vec<&'a BlockElement> {
        match element.target {
            ElementRef::Question(_) => vec![element],
            ElementRef::Block(child) => {
                let mut questions = Vec::new();
                self.collect_questions(child, &mut questions);
                questions
            }
        }
    }
}
