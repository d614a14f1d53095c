//! Credential lifecycle: acquisition, silent refresh, single-flight, close.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use liaison_chat::{BackoffConfig, ChatConfig, ChatError, CredentialBroker};
use liaison_core::{BackendError, ChatBackend, IdentityProvider};
use liaison_harness::SimWorld;

fn config() -> ChatConfig {
    ChatConfig {
        reconnect: BackoffConfig { initial_ms: 1, max_ms: 10, multiplier: 2 },
        ..ChatConfig::default()
    }
}

#[tokio::test]
async fn open_acquires_once_and_signs_in() {
    let world = SimWorld::new(1);

    let session = world.open_session(config()).await.unwrap();

    let calls = world.backend.calls();
    assert_eq!(calls.issue_token, 1);
    assert_eq!(calls.chat_key, 1);
    assert_eq!(calls.sign_in, 1);
    assert_eq!(session.broker().active().await.unwrap().generation(), 1);
}

#[tokio::test]
async fn expired_session_is_refreshed_exactly_once() {
    let world = SimWorld::new(2);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    world.backend.expire_session();
    let sent = session.messages().send_message(&conversation, "Bonjour", None).await;

    assert!(sent.is_ok());
    assert_eq!(world.backend.calls().issue_token, 2);
    assert_eq!(world.backend.messages(&conversation).len(), 1);
    assert_eq!(session.broker().active().await.unwrap().generation(), 2);
}

#[tokio::test]
async fn second_expiry_surfaces_auth_expired() {
    let world = SimWorld::new(3);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    world.backend.expire_next_appends(2);
    let sent = session.messages().send_message(&conversation, "Bonjour", None).await;

    assert_eq!(sent, Err(ChatError::AuthExpired));
    assert_eq!(world.backend.calls().issue_token, 2, "only one refresh per operation");
    assert!(world.backend.messages(&conversation).is_empty());
}

#[tokio::test]
async fn expired_token_is_refreshed_before_use() {
    let world = SimWorld::new(4);
    world.backend.set_token_ttl(Duration::from_secs(60));
    let session = world.open_session(config()).await.unwrap();

    world.env.advance(Duration::from_secs(120));
    let credentials = session.broker().active().await.unwrap();

    assert_eq!(credentials.generation(), 2);
    assert_eq!(world.backend.calls().issue_token, 2);
    assert_eq!(world.backend.calls().sign_in, 2);
}

#[tokio::test]
async fn concurrent_expiries_share_one_refresh() {
    let world = SimWorld::new(5);
    let beneficiaries = world.portfolio(5);
    let conversations: Vec<_> =
        beneficiaries.iter().map(|b| world.backend.open(&world.counselor, b)).collect();
    let session = world.open_session(config()).await.unwrap();

    world.backend.expire_session();
    let sends = conversations
        .iter()
        .map(|conversation| session.messages().send_message(conversation, "Rappel", None));
    let results = join_all(sends).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(world.backend.calls().issue_token, 2);
    assert_eq!(world.backend.calls().sign_in, 2);
}

#[tokio::test]
async fn sign_in_is_single_flight() {
    let world = SimWorld::new(6);
    world.backend.set_sign_in_delay(Some(Duration::from_millis(20)));
    let backend = Arc::new(world.backend.clone());
    let broker = CredentialBroker::new(
        world.counselor.clone(),
        Arc::clone(&backend) as Arc<dyn IdentityProvider>,
        backend as Arc<dyn ChatBackend>,
        world.env.clone(),
    );

    let credentials = broker.get_credentials().await.unwrap();
    let attempts = (0..5).map(|_| broker.ensure_signed_in(&credentials));
    let results = join_all(attempts).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(world.backend.calls().sign_in, 1);

    broker.ensure_signed_in(&credentials).await.unwrap();
    assert_eq!(world.backend.calls().sign_in, 1, "signed-in generation is a no-op");
}

#[tokio::test]
async fn failed_sign_in_is_shared_by_waiting_callers() {
    let world = SimWorld::new(8);
    let backend = Arc::new(world.backend.clone());
    let broker = CredentialBroker::new(
        world.counselor.clone(),
        Arc::clone(&backend) as Arc<dyn IdentityProvider>,
        backend as Arc<dyn ChatBackend>,
        world.env.clone(),
    );

    let credentials = broker.get_credentials().await.unwrap();
    world.backend.expire_session();
    world.backend.set_sign_in_delay(Some(Duration::from_millis(20)));
    let attempts = (0..5).map(|_| broker.ensure_signed_in(&credentials));
    let results = join_all(attempts).await;

    assert!(results.iter().all(|r| *r == Err(ChatError::Auth(BackendError::AuthExpired))));
    assert_eq!(world.backend.calls().sign_in, 1);

    let later = broker.ensure_signed_in(&credentials).await;
    assert_eq!(later, Err(ChatError::Auth(BackendError::AuthExpired)));
    assert_eq!(world.backend.calls().sign_in, 2, "a later caller makes its own attempt");
}

#[tokio::test]
async fn failed_refresh_is_shared_by_waiting_callers() {
    let world = SimWorld::new(9);
    let beneficiaries = world.portfolio(5);
    let conversations: Vec<_> =
        beneficiaries.iter().map(|b| world.backend.open(&world.counselor, b)).collect();
    let session = world.open_session(config()).await.unwrap();

    world.backend.expire_session();
    world.backend.set_sign_in_delay(Some(Duration::from_millis(20)));
    world.backend.reject_sign_ins(true);
    let sends = conversations
        .iter()
        .map(|conversation| session.messages().send_message(conversation, "Rappel", None));
    let results = join_all(sends).await;

    assert!(results.iter().all(|r| matches!(r, Err(ChatError::Auth(BackendError::Rejected(_))))));
    assert_eq!(world.backend.calls().issue_token, 2);
    assert_eq!(world.backend.calls().sign_in, 2);

    world.backend.reject_sign_ins(false);
    let sent = session.messages().send_message(&conversations[0], "Rappel", None).await;
    assert!(sent.is_ok());
    assert_eq!(world.backend.calls().issue_token, 3);
}

#[tokio::test]
async fn closed_session_refuses_work() {
    let world = SimWorld::new(7);
    let beneficiary = world.portfolio(1).remove(0);
    let conversation = world.backend.open(&world.counselor, &beneficiary);
    let session = world.open_session(config()).await.unwrap();

    session.close();
    session.close();

    assert!(session.is_closed());
    assert_eq!(session.broker().active().await.unwrap_err(), ChatError::Closed);
    assert_eq!(
        session.messages().send_message(&conversation, "trop tard", None).await,
        Err(ChatError::Closed)
    );
    assert!(matches!(
        session.messages().subscribe(conversation, |_| {}),
        Err(ChatError::Closed)
    ));
}
