//! Per-conversation streams: decryption, ordering, fallback, deduplication.

use liaison_chat::{BackoffConfig, ChannelMessage, ChatConfig, CryptoEngine, MessageBody};
use liaison_core::{AttachmentId, AttachmentRef, ConversationId, SealedBody, SenderRole, Timestamp};
use liaison_crypto::SymmetricKey;
use liaison_harness::{InboxSnapshot, InvariantRegistry, MessageStream, Recorder, SimEnv, SimWorld};

type StreamRecorder = Recorder<Vec<ChannelMessage>>;

fn config() -> ChatConfig {
    ChatConfig {
        reconnect: BackoffConfig { initial_ms: 1, max_ms: 10, multiplier: 2 },
        ..ChatConfig::default()
    }
}

fn setup(seed: u64) -> (SimWorld, ConversationId) {
    let world = SimWorld::new(seed);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    (world, conversation)
}

fn texts(messages: &[ChannelMessage]) -> Vec<Option<&str>> {
    messages.iter().map(|m| m.body.text()).collect()
}

#[tokio::test]
async fn sent_message_streams_back_decrypted() {
    let (world, conversation) = setup(20);
    let session = world.open_session(config()).await.unwrap();
    let attachment =
        AttachmentRef { id: AttachmentId::new("file-1"), name: "cv.pdf".to_string() };

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();

    let id = session
        .messages()
        .send_message(&conversation, "Voici le CV corrigé", Some(attachment.clone()))
        .await
        .unwrap();

    let messages = recorder.wait_for(|messages| messages.len() == 1).await.unwrap();
    assert_eq!(messages[0].id, id);
    assert_eq!(messages[0].sender_role, SenderRole::Counselor);
    assert_eq!(messages[0].body, MessageBody::Text("Voici le CV corrigé".to_string()));
    assert_eq!(messages[0].attachment, Some(attachment));

    let stored = world.backend.messages(&conversation);
    assert!(stored[0].body.iv.is_some(), "stored body is encrypted");
    assert_ne!(stored[0].body.ciphertext, "Voici le CV corrigé");
}

#[tokio::test]
async fn history_is_sorted_by_send_time() {
    let (world, conversation) = setup(21);
    let session = world.open_session(config()).await.unwrap();
    for (text, at) in [("trois", 3_000), ("un", 1_000), ("deux", 2_000)] {
        world.backend.push_record(
            &conversation,
            SenderRole::Beneficiary,
            SealedBody::legacy_plaintext(text),
            Timestamp::from_millis(at),
        );
    }

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();

    let messages = recorder.wait_for(|messages| messages.len() == 3).await.unwrap();
    assert_eq!(texts(&messages), vec![Some("un"), Some("deux"), Some("trois")]);
}

#[tokio::test]
async fn undecipherable_message_does_not_stop_the_stream() {
    let (world, conversation) = setup(22);
    let session = world.open_session(config()).await.unwrap();

    // Sealed for another conversation: authentication fails here
    let foreign = CryptoEngine::new(SimEnv::with_seed(99)).encrypt(
        &world.backend.symmetric_key(),
        &ConversationId::new("elsewhere"),
        "pas pour toi",
    );
    world.backend.push_record(
        &conversation,
        SenderRole::Beneficiary,
        foreign,
        Timestamp::from_millis(1),
    );
    world.backend.push_record(
        &conversation,
        SenderRole::Beneficiary,
        SealedBody::encrypted("AAAA".to_string(), "not-an-iv".to_string()),
        Timestamp::from_millis(2),
    );
    world.backend.beneficiary_send(&conversation, "lisible");

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();

    let messages = recorder.wait_for(|messages| messages.len() == 3).await.unwrap();
    assert_eq!(messages[0].body, MessageBody::Undecipherable);
    assert_eq!(messages[1].body, MessageBody::Undecipherable);
    assert_eq!(messages[2].body, MessageBody::Text("lisible".to_string()));
}

#[tokio::test]
async fn key_rotation_reopens_undecipherable_messages() {
    let (world, conversation) = setup(24);
    let session = world.open_session(config()).await.unwrap();
    let rotated = SymmetricKey::new([42u8; 32]);
    let early =
        CryptoEngine::new(SimEnv::with_seed(98)).encrypt(&rotated, &conversation, "nouvelle clé");
    world.backend.push_record(
        &conversation,
        SenderRole::Beneficiary,
        early,
        Timestamp::from_millis(1),
    );

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();
    let before = recorder.wait_for(|messages| messages.len() == 1).await.unwrap();
    assert_eq!(before[0].body, MessageBody::Undecipherable);

    world.backend.rotate_key(rotated);
    world.backend.expire_session();
    session.messages().send_message(&conversation, "bien reçu", None).await.unwrap();

    let after = recorder.wait_for(|messages| messages.len() == 2).await.unwrap();
    assert_eq!(after[0].body, MessageBody::Text("nouvelle clé".to_string()));
    assert_eq!(after[1].body, MessageBody::Text("bien reçu".to_string()));
}

#[tokio::test]
async fn legacy_messages_are_shown_verbatim() {
    let (world, conversation) = setup(23);
    let session = world.open_session(config()).await.unwrap();
    world.backend.push_record(
        &conversation,
        SenderRole::Beneficiary,
        SealedBody::legacy_plaintext("ancien format"),
        Timestamp::from_millis(5),
    );

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();

    let messages = recorder.wait_for(|messages| messages.len() == 1).await.unwrap();
    assert_eq!(messages[0].body, MessageBody::LegacyPlaintext("ancien format".to_string()));
}

#[tokio::test]
async fn redelivered_snapshots_are_deduplicated() {
    let (world, conversation) = setup(24);
    let session = world.open_session(config()).await.unwrap();
    world.backend.beneficiary_send(&conversation, "un");
    world.backend.beneficiary_send(&conversation, "deux");

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();
    recorder.wait_for(|messages| messages.len() == 2).await.unwrap();

    world.backend.republish(&conversation);
    world.backend.drop_feeds();
    world.backend.beneficiary_send(&conversation, "trois");

    let messages = recorder.wait_for(|messages| messages.len() >= 3).await.unwrap();
    assert_eq!(texts(&messages), vec![Some("un"), Some("deux"), Some("trois")]);

    let snapshot = InboxSnapshot {
        message_streams: vec![MessageStream {
            conversation: Some(conversation),
            deliveries: recorder.deliveries(),
        }],
        ..InboxSnapshot::empty()
    };
    InvariantRegistry::standard().assert_all(&snapshot, "after reconnect");
}

#[tokio::test]
async fn interleaved_sends_stay_ordered() {
    let (world, conversation) = setup(25);
    let session = world.open_session(config()).await.unwrap();

    let recorder = StreamRecorder::new();
    let _subscription =
        session.messages().subscribe(conversation.clone(), recorder.callback()).unwrap();

    for round in 0..5 {
        session.messages().send_message(&conversation, &format!("c{round}"), None).await.unwrap();
        world.backend.beneficiary_send(&conversation, &format!("b{round}"));
    }

    let messages = recorder.wait_for(|messages| messages.len() == 10).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.sender_role).collect();
    assert_eq!(roles.iter().filter(|r| **r == SenderRole::Counselor).count(), 5);

    let snapshot = InboxSnapshot {
        message_streams: vec![MessageStream {
            conversation: Some(conversation),
            deliveries: recorder.deliveries(),
        }],
        ..InboxSnapshot::empty()
    };
    InvariantRegistry::standard().assert_all(&snapshot, "interleaved sends");
}
