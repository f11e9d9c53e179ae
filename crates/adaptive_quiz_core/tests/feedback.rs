mod common;

use adaptive_quiz_core::feedback::{
    create_feedback_block, delete_feedback_block, load_feedback_block, update_feedback_block,
};
use adaptive_quiz_core::*;
use common::*;
use uuid::Uuid;

fn update(used_elements: Vec<ElementId>, parts: Vec<PartDraft>) -> FeedbackUpdate {
    FeedbackUpdate {
        name: "Struggling".to_string(),
        feedback_text: "Revisit chapter two.".to_string(),
        used_elements,
        use_and: true,
        parts,
    }
}

#[tokio::test]
async fn feedback_blocks_start_always_active() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "General").await.unwrap();
    assert!(gated.condition.use_and);
    assert!(gated.condition.parts().is_empty());

    let loaded = load_feedback_block(&store, &s.quiz, gated.block.id).await.unwrap();
    assert_eq!(loaded.condition.id, gated.condition.id);
}

#[tokio::test]
async fn update_replaces_text_elements_and_condition() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "Draft").await.unwrap();

    let low_q1 = PartDraft {
        id: None,
        comparator: Comparator::Less,
        element_id: s.q1,
        grade: 5.0,
    };
    let updated = update_feedback_block(
        &store,
        &s.quiz,
        gated.block.id,
        update(vec![s.q1, s.q3, s.q1], vec![low_q1]),
    )
    .await
    .unwrap();
    assert_eq!(updated.block.name, "Struggling");
    assert_eq!(updated.block.used_elements, vec![s.q1, s.q3]);
    assert_eq!(updated.condition.parts().len(), 1);

    let stored = store.get_feedback_block(gated.block.id).await.unwrap();
    assert_eq!(stored.feedback_text, "Revisit chapter two.");
}

#[tokio::test]
async fn references_outside_the_tree_are_rejected() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "Draft").await.unwrap();

    let err = update_feedback_block(
        &store,
        &s.quiz,
        gated.block.id,
        update(vec![ElementId(31337)], vec![]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, QuizError::IllegalConditionReference(ElementId(31337))));

    let other = quiz::create_quiz(&store, "Other", 10.0, now()).await.unwrap();
    let err = load_feedback_block(&store, &other, gated.block.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn rejected_updates_leave_the_block_as_it_was() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "Draft").await.unwrap();

    let nan = PartDraft {
        id: None,
        comparator: Comparator::Less,
        element_id: s.q1,
        grade: f64::NAN,
    };
    let err = update_feedback_block(&store, &s.quiz, gated.block.id, update(vec![s.q1], vec![nan]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::InvalidGrade(_)));

    store.fail_next_commit();
    let low_q1 = PartDraft {
        id: None,
        comparator: Comparator::Less,
        element_id: s.q1,
        grade: 5.0,
    };
    let err = update_feedback_block(&store, &s.quiz, gated.block.id, update(vec![s.q1], vec![low_q1]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::Port(PortError::Transaction(_))));

    let stored = load_feedback_block(&store, &s.quiz, gated.block.id).await.unwrap();
    assert_eq!(stored.block.name, "Draft");
    assert!(stored.block.used_elements.is_empty());
    assert!(stored.condition.parts().is_empty());
}

#[tokio::test]
async fn active_feedback_follows_attempt_results() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "Draft").await.unwrap();
    let low_q1 = PartDraft {
        id: None,
        comparator: Comparator::Less,
        element_id: s.q1,
        grade: 5.0,
    };
    update_feedback_block(&store, &s.quiz, gated.block.id, update(vec![s.q1], vec![low_q1]))
        .await
        .unwrap();

    let feedback = SpecializedFeedback::load(&store, &s.quiz).await.unwrap();
    assert!(feedback.has_specialized_feedback(s.q1));
    assert!(!feedback.has_specialized_feedback(s.q2));

    let mut weak = AttemptSession::start(&store, s.quiz.id, Uuid::new_v4(), now())
        .await
        .unwrap();
    weak.process_slot(&store, &FractionEngine, 1, scored(2.0), now())
        .await
        .unwrap();
    assert_eq!(
        feedback.feedback_for(s.q1, &weak.results()),
        Some("Revisit chapter two.")
    );
    assert_eq!(feedback.active_blocks(&weak.results()).len(), 1);

    let mut strong = AttemptSession::start(&store, s.quiz.id, Uuid::new_v4(), now())
        .await
        .unwrap();
    strong
        .process_slot(&store, &FractionEngine, 1, scored(9.0), now())
        .await
        .unwrap();
    assert_eq!(feedback.feedback_for(s.q1, &strong.results()), None);
    assert!(feedback.active_blocks(&strong.results()).is_empty());
}

#[tokio::test]
async fn deleting_feedback_drops_its_condition() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let gated = create_feedback_block(&store, &s.quiz, "Draft").await.unwrap();

    delete_feedback_block(&store, &s.quiz, gated.block.id).await.unwrap();
    assert!(store.get_feedback_block(gated.block.id).await.is_err());
    let condition = store
        .get_condition(ConditionOwner::Feedback(gated.block.id))
        .await
        .unwrap();
    assert!(condition.is_none());
}
