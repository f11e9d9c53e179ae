mod common;

use adaptive_quiz_core::*;
use common::*;

fn draft(id: Option<PartId>, comparator: Comparator, element_id: ElementId, grade: f64) -> PartDraft {
    PartDraft {
        id,
        comparator,
        element_id,
        grade,
    }
}

#[tokio::test]
async fn update_merges_submitted_parts() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let owner = ConditionOwner::Block(s.x.id());
    let mut condition = Condition::load_or_create(&store, owner).await.unwrap();
    assert!(condition.use_and);
    assert!(condition.parts().is_empty());

    let first = condition
        .update(
            &store,
            vec![
                draft(None, Comparator::GreaterOrEqual, s.q1, 5.0),
                draft(None, Comparator::Less, s.q1, 2.0),
            ],
        )
        .await
        .unwrap()
        .to_vec();
    assert_eq!(first.len(), 2);
    assert_ne!(first[0].id, first[1].id);

    // Keep the first part with a new threshold, drop the second, add a third.
    let kept = first[0].id;
    let parts = condition
        .update(
            &store,
            vec![
                draft(Some(kept), Comparator::GreaterOrEqual, s.q1, 6.0),
                draft(None, Comparator::WasDisplayed, s.q1, 0.0),
            ],
        )
        .await
        .unwrap()
        .to_vec();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].id, kept);
    assert_eq!(parts[0].grade, 6.0);
    assert!(parts[1].id != first[1].id && parts[1].id != kept);
    assert_eq!(parts[1].comparator, Comparator::WasDisplayed);

    let stored = Condition::load(&store, owner).await.unwrap().unwrap();
    assert_eq!(stored.parts(), parts.as_slice());
}

#[tokio::test]
async fn unknown_ids_are_inserted_as_new_parts() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let owner = ConditionOwner::Block(s.x.id());
    let mut condition = Condition::load_or_create(&store, owner).await.unwrap();

    let parts = condition
        .update(&store, vec![draft(Some(PartId(424242)), Comparator::Equal, s.q1, 10.0)])
        .await
        .unwrap();
    assert_eq!(parts.len(), 1);
    assert_ne!(parts[0].id, PartId(424242));
}

#[tokio::test]
async fn non_finite_thresholds_are_rejected_before_any_write() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let owner = ConditionOwner::Block(s.x.id());
    let mut condition = Condition::load_or_create(&store, owner).await.unwrap();
    condition
        .update(&store, vec![draft(None, Comparator::Greater, s.q1, 1.0)])
        .await
        .unwrap();

    let err = condition
        .update(&store, vec![draft(None, Comparator::Greater, s.q1, f64::NAN)])
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::InvalidGrade(_)));
    let stored = Condition::load(&store, owner).await.unwrap().unwrap();
    assert_eq!(stored.parts().len(), 1);
}

#[tokio::test]
async fn combinator_is_persisted() {
    let store = InMemoryStore::new();
    let s = scenario(&store).await;
    let owner = ConditionOwner::Block(s.x.id());
    let mut condition = Condition::load_or_create(&store, owner).await.unwrap();

    condition.set_use_and(&store, false).await.unwrap();
    let stored = Condition::load(&store, owner).await.unwrap().unwrap();
    assert!(!stored.use_and);
    assert_eq!(stored.id, condition.id);
}

#[tokio::test]
async fn rejected_block_condition_keeps_the_stored_one() {
    let store = InMemoryStore::new();
    let mut s = scenario(&store).await;
    gate_on_q1(&store, &mut s).await;
    let before = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();

    // The combinator change and the valid part must not land either.
    let err = s
        .x
        .update_condition(
            &store,
            &s.quiz,
            false,
            vec![
                draft(None, Comparator::Less, s.q1, 2.0),
                draft(None, Comparator::Greater, s.q1, f64::INFINITY),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::InvalidGrade(_)));

    let after = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();
    assert!(after.use_and);
    assert_eq!(after.parts(), before.parts());
}

#[tokio::test]
async fn failed_commit_writes_no_condition_edits() {
    let store = InMemoryStore::new();
    let mut s = scenario(&store).await;
    gate_on_q1(&store, &mut s).await;
    let before = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();

    store.fail_next_commit();
    let err = s
        .x
        .update_condition(
            &store,
            &s.quiz,
            false,
            vec![draft(None, Comparator::WasDisplayed, s.q1, 0.0)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::Port(PortError::Transaction(_))));

    let after = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();
    assert!(after.use_and);
    assert_eq!(after.parts(), before.parts());
}

#[tokio::test]
async fn parts_of_other_conditions_are_not_touched() {
    let store = InMemoryStore::new();
    let mut s = scenario(&store).await;
    gate_on_q1(&store, &mut s).await;
    let gate = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();
    let feedback = FeedbackBlockId(4242);

    let changes = ConditionChanges {
        use_and: Some(false),
        deleted: vec![gate.parts()[0].id],
        ..ConditionChanges::default()
    };
    let err = store
        .apply_condition_changes(ConditionOwner::Feedback(feedback), &changes)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    assert!(store.get_condition(ConditionOwner::Feedback(feedback)).await.unwrap().is_none());
    let stored = Condition::load(&store, ConditionOwner::Block(s.x.id()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.parts(), gate.parts());
}
