//! Unread counts and read markers.

use liaison_chat::ChatConfig;
use liaison_core::{ChatBackend, ConversationId, Timestamp};
use liaison_harness::{InboxSnapshot, InvariantRegistry, SIM_EPOCH_MS, SimWorld};

#[tokio::test]
async fn counts_follow_beneficiary_messages_and_markers() {
    let world = SimWorld::new(30);
    let beneficiaries = world.portfolio(2);
    let busy = world.backend.open(&world.counselor, &beneficiaries[0]);
    let quiet = world.backend.open(&world.counselor, &beneficiaries[1]);
    let session = world.open_session(ChatConfig::default()).await.unwrap();

    for text in ["un", "deux", "trois"] {
        world.backend.beneficiary_send(&busy, text);
    }
    session.messages().send_message(&quiet, "message du conseiller", None).await.unwrap();

    let ids = vec![busy.clone(), quiet.clone()];
    let counts = session.reads().unread_counts_for(&ids).await;
    assert_eq!(counts[&busy], 3);
    assert_eq!(counts[&quiet], 0, "counselor messages never count as unread");

    session.reads().mark_read(&busy).await.unwrap();
    world.backend.beneficiary_send(&busy, "quatre");
    let counts = session.reads().unread_counts_for(&ids).await;
    assert_eq!(counts[&busy], 1);

    let snapshot = InboxSnapshot {
        unread: ids.iter().map(|id| world.unread_sample(id, counts[id])).collect(),
        ..InboxSnapshot::empty()
    };
    InvariantRegistry::standard().assert_all(&snapshot, "after mark_read");
}

#[tokio::test]
async fn unknown_conversations_count_zero() {
    let world = SimWorld::new(31);
    let session = world.open_session(ChatConfig::default()).await.unwrap();
    let unknown = ConversationId::new("never-created");

    let counts = session.reads().unread_counts_for(std::slice::from_ref(&unknown)).await;

    assert_eq!(counts.len(), 1);
    assert_eq!(counts[&unknown], 0);
}

#[tokio::test]
async fn endpoint_failure_degrades_to_zero() {
    let world = SimWorld::new(32);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(ChatConfig::default()).await.unwrap();
    world.backend.beneficiary_send(&conversation, "non lu");

    world.backend.set_unread_unavailable(true);
    let counts = session.reads().unread_counts_for(std::slice::from_ref(&conversation)).await;

    assert_eq!(counts[&conversation], 0);
    assert_eq!(world.backend.calls().unread_counts, 1);
}

#[tokio::test]
async fn empty_request_makes_no_call() {
    let world = SimWorld::new(33);
    let session = world.open_session(ChatConfig::default()).await.unwrap();

    assert!(session.reads().unread_counts_for(&[]).await.is_empty());
    assert_eq!(world.backend.calls().unread_counts, 0);
}

#[tokio::test]
async fn unread_query_survives_session_expiry() {
    let world = SimWorld::new(34);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(ChatConfig::default()).await.unwrap();
    world.backend.beneficiary_send(&conversation, "bonjour");

    world.backend.expire_session();
    let counts = session.reads().unread_counts_for(std::slice::from_ref(&conversation)).await;

    assert_eq!(counts[&conversation], 1);
    assert_eq!(world.backend.calls().issue_token, 2);
}

#[tokio::test]
async fn read_marker_only_moves_forward() {
    let world = SimWorld::new(35);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(ChatConfig::default()).await.unwrap();
    world.backend.beneficiary_send(&conversation, "bonjour");

    session.reads().mark_read(&conversation).await.unwrap();
    let first = world.backend.conversation(&conversation).unwrap().last_counselor_read_at;
    session.reads().mark_read(&conversation).await.unwrap();
    let second = world.backend.conversation(&conversation).unwrap().last_counselor_read_at;

    assert!(first.is_some());
    assert!(second > first);
    assert!(world.backend.conversation(&conversation).unwrap().seen_by_counselor);
}

#[tokio::test]
async fn read_conversation_stays_read_after_stale_marker_and_republish() {
    let world = SimWorld::new(36);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(ChatConfig::default()).await.unwrap();
    world.backend.beneficiary_send(&conversation, "bonjour");
    world.backend.beneficiary_send(&conversation, "vous êtes là ?");
    let ids = std::slice::from_ref(&conversation);
    assert_eq!(session.reads().unread_counts_for(ids).await[&conversation], 2);

    session.reads().mark_read(&conversation).await.unwrap();
    assert_eq!(session.reads().unread_counts_for(ids).await[&conversation], 0);

    // A late write from another device carries an older marker
    ChatBackend::mark_counselor_read(
        &world.backend,
        &conversation,
        Timestamp::from_millis(SIM_EPOCH_MS),
    )
    .await
    .unwrap();
    assert_eq!(session.reads().unread_counts_for(ids).await[&conversation], 0);

    world.backend.republish(&conversation);
    assert_eq!(session.reads().unread_counts_for(ids).await[&conversation], 0);
    assert!(world.backend.conversation(&conversation).unwrap().seen_by_counselor);
}
