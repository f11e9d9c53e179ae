//! crates/adaptive_quiz_core/src/block.rs
//!
//! A handle on one block of a quiz, used by editing operations.
//!
//! Children and condition are loaded lazily and cached on the handle. Every
//! structural mutation writes through to the store and refreshes the cached
//! child list before returning it, so no later read sees a stale list.

use std::collections::HashSet;

use tracing::info;

use crate::domain::{
    BlockElement, BlockId, BlockRecord, Condition, ConditionOwner, ElementId, ElementRef,
    PartDraft, QuestionId, Quiz, QuizId,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::{PortError, QuizStore};
use crate::tree::BlockTree;

#[derive(Debug, Clone)]
pub struct Block {
    record: BlockRecord,
    main_block_id: BlockId,
    children: Option<Vec<BlockElement>>,
    condition: Option<Option<Condition>>,
}

impl Block {
    /// Loads a block of `quiz`. Fails with `NotFound` for unknown ids and for
    /// blocks of other quizzes.
    pub async fn load(store: &dyn QuizStore, quiz: &Quiz, block_id: BlockId) -> QuizResult<Self> {
        let record = store.get_block(block_id).await?;
        if record.quiz_id != quiz.id {
            return Err(PortError::NotFound(format!(
                "Block {} not found in quiz {}",
                block_id, quiz.id
            ))
            .into());
        }
        Ok(Self::from_record(record, quiz.main_block_id))
    }

    /// Creates a new, detached block in `quiz`.
    pub async fn create(store: &dyn QuizStore, quiz: &Quiz, name: &str) -> QuizResult<Self> {
        let record = store.create_block(quiz.id, name).await?;
        Ok(Self {
            children: Some(Vec::new()),
            condition: None,
            ..Self::from_record(record, quiz.main_block_id)
        })
    }

    fn from_record(record: BlockRecord, main_block_id: BlockId) -> Self {
        Self {
            record,
            main_block_id,
            children: None,
            condition: None,
        }
    }

    pub fn id(&self) -> BlockId {
        self.record.id
    }

    pub fn quiz_id(&self) -> QuizId {
        self.record.quiz_id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_main_block(&self) -> bool {
        self.record.id == self.main_block_id
    }

    pub async fn set_name(&mut self, store: &dyn QuizStore, name: &str) -> QuizResult<()> {
        if self.record.name != name {
            store.rename_block(self.record.id, name).await?;
            self.record.name = name.to_string();
        }
        Ok(())
    }

    //=====================================================================================
    // Children
    //=====================================================================================

    /// The ordered child elements, fetched on first access.
    pub async fn children(&mut self, store: &dyn QuizStore) -> QuizResult<&[BlockElement]> {
        let children = match self.children.take() {
            Some(children) => children,
            None => store.get_block_elements(self.record.id).await?,
        };
        Ok(self.children.insert(children).as_slice())
    }

    /// Attempts address questions by slot number, so the slot layout is frozen
    /// once the quiz has been attempted.
    async fn ensure_unattempted(&self, store: &dyn QuizStore) -> QuizResult<()> {
        if store.list_attempts(self.quiz_id()).await?.is_empty() {
            Ok(())
        } else {
            Err(QuizError::QuizHasAttempts(self.quiz_id()))
        }
    }

    async fn refresh_children(&mut self, store: &dyn QuizStore) -> QuizResult<&[BlockElement]> {
        self.children = None;
        self.children(store).await
    }

    /// Appends a question, weighted with the question's default mark.
    pub async fn add_question(
        &mut self,
        store: &dyn QuizStore,
        question_id: QuestionId,
    ) -> QuizResult<&[BlockElement]> {
        self.ensure_unattempted(store).await?;
        let question = store.get_question(question_id).await?;
        let element = store
            .insert_block_element(
                self.record.id,
                ElementRef::Question(question_id),
                question.default_mark,
            )
            .await?;
        info!(block_id = %self.record.id, element_id = %element.id, "Question added to block");
        self.refresh_children(store).await
    }

    /// Appends `block` as a sub-block.
    ///
    /// The sub-block must belong to the same quiz, must not be the main block,
    /// must not already be placed anywhere in the tree, and must not contain
    /// this block.
    pub async fn add_subblock(
        &mut self,
        store: &dyn QuizStore,
        quiz: &Quiz,
        block: &Block,
    ) -> QuizResult<&[BlockElement]> {
        let child = block.id();
        let refuse = |reason: &str| QuizError::InvalidPlacement {
            block_id: child,
            reason: reason.to_string(),
        };

        if block.quiz_id() != self.quiz_id() {
            return Err(refuse("it belongs to another quiz"));
        }
        if block.is_main_block() {
            return Err(refuse("it is the main block"));
        }
        if child == self.id() {
            return Err(refuse("a block cannot contain itself"));
        }
        let tree = BlockTree::load(store, quiz).await?;
        if tree.contains(child) {
            return Err(refuse("it is already part of the block tree"));
        }
        if subtree_contains(store, child, self.id()).await? {
            return Err(refuse("it contains the target block"));
        }
        self.ensure_unattempted(store).await?;

        let element = store
            .insert_block_element(self.record.id, ElementRef::Block(child), 0.0)
            .await?;
        info!(block_id = %self.record.id, element_id = %element.id, sub_block = %child, "Sub-block added");
        self.refresh_children(store).await
    }

    /// Creates a new block named `name` and appends it as a sub-block.
    pub async fn create_subblock(
        &mut self,
        store: &dyn QuizStore,
        quiz: &Quiz,
        name: &str,
    ) -> QuizResult<Block> {
        self.ensure_unattempted(store).await?;
        let block = Block::create(store, quiz, name).await?;
        self.add_subblock(store, quiz, &block).await?;
        Ok(block)
    }

    /// Removes a child element; later siblings move up one slot.
    pub async fn remove_child(
        &mut self,
        store: &dyn QuizStore,
        element_id: ElementId,
    ) -> QuizResult<&[BlockElement]> {
        let is_child = self
            .children(store)
            .await?
            .iter()
            .any(|element| element.id == element_id);
        if !is_child {
            return Err(QuizError::UnknownChild {
                block_id: self.record.id,
                element_id,
            });
        }
        self.ensure_unattempted(store).await?;
        store.delete_block_element(element_id).await?;
        info!(block_id = %self.record.id, %element_id, "Element removed from block");
        self.refresh_children(store).await
    }

    //=====================================================================================
    // Tree Queries
    //=====================================================================================

    /// The parent block, `None` for the main block.
    pub async fn parent(&self, store: &dyn QuizStore, quiz: &Quiz) -> QuizResult<Option<BlockId>> {
        if self.is_main_block() {
            return Ok(None);
        }
        BlockTree::load(store, quiz).await?.parent_of(self.id())
    }

    /// True if this block or any nested block contains a question.
    pub async fn has_questions(&mut self, store: &dyn QuizStore) -> QuizResult<bool> {
        let mut pending: Vec<BlockId> = {
            let children = self.children(store).await?;
            if children.iter().any(BlockElement::is_question) {
                return Ok(true);
            }
            children.iter().filter_map(BlockElement::sub_block).collect()
        };
        let mut seen = HashSet::new();
        while let Some(block) = pending.pop() {
            if !seen.insert(block) {
                continue;
            }
            for element in store.get_block_elements(block).await? {
                match element.target {
                    ElementRef::Question(_) => return Ok(true),
                    ElementRef::Block(child) => pending.push(child),
                }
            }
        }
        Ok(false)
    }

    /// The elements a condition on this block may reference.
    pub async fn condition_candidates(
        &self,
        store: &dyn QuizStore,
        quiz: &Quiz,
    ) -> QuizResult<Vec<BlockElement>> {
        BlockTree::load(store, quiz).await?.condition_candidates(self.id())
    }

    //=====================================================================================
    // Condition
    //=====================================================================================

    /// The condition gating this block, fetched on first access.
    pub async fn condition(&mut self, store: &dyn QuizStore) -> QuizResult<Option<&Condition>> {
        let condition = match self.condition.take() {
            Some(condition) => condition,
            None => Condition::load(store, ConditionOwner::Block(self.record.id)).await?,
        };
        Ok(self.condition.insert(condition).as_ref())
    }

    /// Replaces this block's condition with the submitted combinator and parts.
    ///
    /// Every part must reference one of the block's condition candidates.
    pub async fn update_condition(
        &mut self,
        store: &dyn QuizStore,
        quiz: &Quiz,
        use_and: bool,
        parts: Vec<PartDraft>,
    ) -> QuizResult<&Condition> {
        if self.is_main_block() {
            return Err(QuizError::MainBlockCondition);
        }
        let candidates = self.condition_candidates(store, quiz).await?;
        for part in &parts {
            if !candidates.iter().any(|c| c.id == part.element_id) {
                return Err(QuizError::IllegalConditionReference(part.element_id));
            }
        }

        let condition =
            Condition::save(store, ConditionOwner::Block(self.record.id), use_and, parts).await?;
        info!(block_id = %self.record.id, condition_id = %condition.id, "Block condition updated");

        Ok(self.condition.insert(None).insert(condition))
    }
}

/// Whether `target` is `root` or lies anywhere below it.
async fn subtree_contains(
    store: &dyn QuizStore,
    root: BlockId,
    target: BlockId,
) -> QuizResult<bool> {
    let mut pending = vec![root];
    let mut seen = HashSet::new();
    while let Some(block) = pending.pop() {
        if block == target {
            return Ok(true);
        }
        if !seen.insert(block) {
            continue;
        }
        for element in store.get_block_elements(block).await? {
            if let Some(child) = element.sub_block() {
                pending.push(child);
            }
        }
    }
    Ok(false)
}
