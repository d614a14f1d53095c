//! Live conversation list: ordering, previews, rebuild, reconnect, disposal.

use std::time::Duration;

use liaison_chat::{BackoffConfig, ChatConfig, ConversationView, MessageBody};
use liaison_core::{ConversationId, SealedBody, SenderRole, Timestamp};
use liaison_harness::{InboxSnapshot, InvariantRegistry, Recorder, SimWorld};

fn config() -> ChatConfig {
    ChatConfig {
        reconnect: BackoffConfig { initial_ms: 1, max_ms: 10, multiplier: 2 },
        ..ChatConfig::default()
    }
}

type ListRecorder = Recorder<Vec<ConversationView>>;

fn ids(views: &[ConversationView]) -> Vec<&str> {
    views.iter().map(|v| v.conversation.id.as_str()).collect()
}

fn first_is(id: &ConversationId) -> impl Fn(&Vec<ConversationView>) -> bool + '_ {
    move |views| views.first().is_some_and(|v| &v.conversation.id == id)
}

#[tokio::test]
async fn list_is_ordered_and_previews_decrypted() {
    let world = SimWorld::new(10);
    let beneficiaries = world.portfolio(3);
    let conversations: Vec<_> =
        beneficiaries.iter().map(|b| world.backend.open(&world.counselor, b)).collect();
    let session = world.open_session(config()).await.unwrap();

    world.backend.beneficiary_send(&conversations[1], "J'ai trouvé un stage !");
    session.conversations().set_flagged(&conversations[2], true).await.unwrap();

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();

    let list = recorder
        .wait_for(|views| {
            ids(views)
                == vec![
                    conversations[1].as_str(),
                    conversations[2].as_str(),
                    conversations[0].as_str(),
                ]
        })
        .await
        .expect("ordered list delivered");

    assert_eq!(list[0].preview, Some(MessageBody::Text("J'ai trouvé un stage !".to_string())));
    assert_eq!(list[2].preview, None);
}

#[tokio::test]
async fn every_push_delivers_a_reordered_list() {
    let world = SimWorld::new(11);
    let beneficiaries = world.portfolio(3);
    let conversations: Vec<_> =
        beneficiaries.iter().map(|b| world.backend.open(&world.counselor, b)).collect();
    let session = world.open_session(config()).await.unwrap();
    for conversation in &conversations {
        session.reads().mark_read(conversation).await.unwrap();
    }

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();
    recorder.wait_for(|views| views.len() == 3).await.expect("initial list");

    world.backend.beneficiary_send(&conversations[2], "question");
    recorder.wait_for(first_is(&conversations[2])).await.expect("unseen conversation first");

    session.reads().mark_read(&conversations[2]).await.unwrap();
    world.backend.beneficiary_send(&conversations[0], "autre question");
    recorder.wait_for(first_is(&conversations[0])).await.expect("newest unseen first");

    let snapshot =
        InboxSnapshot { conversation_lists: recorder.deliveries(), ..InboxSnapshot::empty() };
    InvariantRegistry::standard().assert_all(&snapshot, "after live updates");
}

#[tokio::test]
async fn legacy_preview_is_shown_verbatim() {
    let world = SimWorld::new(12);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    world.backend.push_record(
        &conversation,
        SenderRole::Beneficiary,
        SealedBody::legacy_plaintext("message d'avant le chiffrement"),
        Timestamp::from_millis(1_000),
    );
    let session = world.open_session(config()).await.unwrap();

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();

    let list = recorder.wait_for(|views| views.len() == 1).await.unwrap();
    assert_eq!(
        list[0].preview,
        Some(MessageBody::LegacyPlaintext("message d'avant le chiffrement".to_string()))
    );
}

#[tokio::test]
async fn portfolio_change_rebuilds_the_feed() {
    let world = SimWorld::new(13);
    let beneficiaries = world.portfolio(3);
    for beneficiary in &beneficiaries {
        world.backend.open(&world.counselor, beneficiary);
    }
    let session = world.open_session(config()).await.unwrap();

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();
    recorder.wait_for(|views| views.len() == 3).await.expect("full portfolio");

    world.backend.set_portfolio(&world.counselor, beneficiaries[..1].iter().cloned());
    let list = recorder.wait_for(|views| views.len() == 1).await.expect("rebuilt list");

    assert_eq!(list[0].conversation.beneficiary_id, beneficiaries[0]);
    assert_eq!(world.backend.calls().watch_conversations, 2);
}

#[tokio::test]
async fn dropped_feed_reconnects() {
    let world = SimWorld::new(14);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();
    recorder.wait_for(|views| views.len() == 1).await.unwrap();

    world.backend.fail_next_watches(2);
    world.backend.drop_feeds();
    world.backend.beneficiary_send(&conversation, "toujours là ?");

    let list = recorder
        .wait_for(|views| views.first().is_some_and(|v| v.conversation.last_message.is_some()))
        .await
        .expect("callbacks resume after reconnect");
    assert!(!list[0].conversation.seen_by_counselor);
    assert!(world.backend.calls().watch_conversations >= 4);
}

#[tokio::test]
async fn no_delivery_after_dispose() {
    let world = SimWorld::new(15);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    let recorder = ListRecorder::new();
    let subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();
    recorder.wait_for(|views| views.len() == 1).await.unwrap();

    subscription.dispose();
    subscription.dispose();
    let seen = recorder.count();
    world.backend.beneficiary_send(&conversation, "après");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!subscription.is_active());
    assert_eq!(recorder.count(), seen);
}

#[tokio::test]
async fn closing_the_session_stops_listeners() {
    let world = SimWorld::new(16);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    let recorder = ListRecorder::new();
    let _subscription = session.conversations().subscribe(recorder.callback()).await.unwrap();
    recorder.wait_for(|views| views.len() == 1).await.unwrap();

    session.close();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let seen = recorder.count();
    world.backend.beneficiary_send(&conversation, "après fermeture");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(recorder.count(), seen);
    assert_eq!(world.backend.open_feeds(), 0);
}

#[tokio::test]
async fn flag_toggle_is_persisted() {
    let world = SimWorld::new(17);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    session.conversations().set_flagged(&conversation, true).await.unwrap();
    assert!(world.backend.conversation(&conversation).unwrap().flagged_by_counselor);

    session.conversations().set_flagged(&conversation, false).await.unwrap();
    assert!(!world.backend.conversation(&conversation).unwrap().flagged_by_counselor);
}
