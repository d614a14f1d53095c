//! Session credential lifecycle.
//!
//! The broker owns the counselor's short-lived token and the chat symmetric
//! key. Everything else in the session borrows them through
//! [`CredentialBroker::active`] or [`CredentialBroker::with_auth_retry`].
//!
//! # Invariants
//!
//! - Credentials are published as an immutable `Arc` swap. A reader sees the
//!   old set or the new set, never a mix of token and key.
//! - Refreshes are serialized. A caller whose stale generation was already
//!   replaced reuses the replacement instead of fetching again.
//! - Sign-in is single-flight per generation.
//! - Callers that queued behind a failed refresh or sign-in receive that
//!   attempt's error instead of starting their own. A caller arriving after
//!   the failure completed makes a fresh attempt.
//! - After [`CredentialBroker::close`] no credentials are handed out and the
//!   closed signal stops every listener of the session.

use std::{
    future::Future,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use liaison_core::{BackendError, ChatBackend, CounselorId, Environment, IdentityProvider, Timestamp};
use liaison_crypto::SymmetricKey;
use tokio::sync::{Mutex, watch};

use crate::error::ChatError;

/// Token and key for one counselor session.
///
/// The key is zeroized when the last holder drops its `Arc`.
pub struct Credentials {
    token: String,
    key: SymmetricKey,
    expires_at: Timestamp,
    generation: u64,
}

impl Credentials {
    /// Bearer token for backend calls.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Chat symmetric key.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Token expiry.
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Acquisition counter, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the token has passed its expiry at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .field("key", &self.key)
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Failed attempt of a single-flight operation.
struct Failure {
    /// Value of the completion counter once this attempt finished
    attempt: u64,
    generation: u64,
    error: ChatError,
}

/// Serializes one kind of attempt and remembers the last failure.
///
/// A caller takes a ticket before queueing on the lock. Any failure that
/// completed after the ticket was taken belongs to an attempt the caller was
/// waiting on, so the caller shares it.
struct SingleFlight {
    last_failure: Mutex<Option<Failure>>,
    completed: AtomicU64,
}

impl SingleFlight {
    fn new() -> Self {
        Self { last_failure: Mutex::new(None), completed: AtomicU64::new(0) }
    }

    fn ticket(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn shared_failure(
        last_failure: Option<&Failure>,
        ticket: u64,
        generation: u64,
    ) -> Option<ChatError> {
        last_failure
            .filter(|failure| failure.attempt > ticket && failure.generation == generation)
            .map(|failure| failure.error.clone())
    }

    /// Record the outcome of an attempt made while holding `last_failure`.
    fn complete<T>(
        &self,
        last_failure: &mut Option<Failure>,
        generation: u64,
        result: &Result<T, ChatError>,
    ) {
        let attempt = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        *last_failure = match result {
            Ok(_) => None,
            Err(error) => Some(Failure { attempt, generation, error: error.clone() }),
        };
    }
}

/// Obtains, refreshes and destroys session credentials.
pub struct CredentialBroker<E: Environment> {
    counselor: CounselorId,
    identity: Arc<dyn IdentityProvider>,
    chat: Arc<dyn ChatBackend>,
    env: E,
    current: RwLock<Option<Arc<Credentials>>>,
    refresh: SingleFlight,
    sign_in: SingleFlight,
    /// Generation the live backend is signed in with (0 = none)
    signed_in: AtomicU64,
    generation: AtomicU64,
    closed: watch::Sender<bool>,
}

impl<E: Environment> CredentialBroker<E> {
    /// Create a broker without credentials.
    pub fn new(
        counselor: CounselorId,
        identity: Arc<dyn IdentityProvider>,
        chat: Arc<dyn ChatBackend>,
        env: E,
    ) -> Self {
        Self {
            counselor,
            identity,
            chat,
            env,
            current: RwLock::new(None),
            refresh: SingleFlight::new(),
            sign_in: SingleFlight::new(),
            signed_in: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            closed: watch::Sender::new(false),
        }
    }

    /// Counselor this session belongs to.
    pub fn counselor(&self) -> &CounselorId {
        &self.counselor
    }

    /// Session environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Acquire a fresh token and key and publish them.
    ///
    /// # Errors
    ///
    /// - `Auth`: the identity provider refused the token or key request
    /// - `Key`: the delivered key is not a valid 32-byte base64 key
    /// - `Closed`: the session was closed
    pub async fn get_credentials(&self) -> Result<Arc<Credentials>, ChatError> {
        self.ensure_open()?;
        let _guard = self.refresh.last_failure.lock().await;
        self.fetch_and_publish().await
    }

    /// Sign the live backend in with `credentials`.
    ///
    /// No-op when this generation (or a newer one) is already signed in.
    /// Concurrent callers share a single attempt and its outcome.
    ///
    /// # Errors
    ///
    /// - `Auth`: the backend rejected the token
    /// - `Closed`: the session was closed
    pub async fn ensure_signed_in(&self, credentials: &Credentials) -> Result<(), ChatError> {
        self.ensure_open()?;
        if self.signed_in.load(Ordering::SeqCst) >= credentials.generation {
            return Ok(());
        }

        let ticket = self.sign_in.ticket();
        let mut last_failure = self.sign_in.last_failure.lock().await;
        if self.signed_in.load(Ordering::SeqCst) >= credentials.generation {
            return Ok(());
        }
        if let Some(error) =
            SingleFlight::shared_failure(last_failure.as_ref(), ticket, credentials.generation)
        {
            tracing::debug!(generation = credentials.generation, "sharing failed sign-in");
            return Err(error);
        }

        let result = self.chat.sign_in(&credentials.token).await.map_err(ChatError::Auth);
        self.sign_in.complete(&mut last_failure, credentials.generation, &result);
        result?;

        self.signed_in.fetch_max(credentials.generation, Ordering::SeqCst);
        tracing::debug!(generation = credentials.generation, "signed in to chat backend");
        Ok(())
    }

    /// Current credentials, refreshed first if the token has expired.
    ///
    /// # Errors
    ///
    /// - `Closed`: the session was closed
    /// - any error of [`CredentialBroker::refresh`]
    pub async fn active(&self) -> Result<Arc<Credentials>, ChatError> {
        self.ensure_open()?;
        match self.snapshot() {
            Some(current) if !current.is_expired(self.env.now()) => Ok(current),
            Some(current) => {
                tracing::debug!(generation = current.generation, "token expired, refreshing");
                self.refresh(current.generation).await
            },
            None => self.refresh(0).await,
        }
    }

    /// Replace credentials of `stale_generation` and sign in with the result.
    ///
    /// Serialized: if a concurrent caller already replaced the stale
    /// generation, its credentials are reused without a second fetch. If that
    /// caller failed, its error is returned instead.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialBroker::get_credentials`] and
    /// [`CredentialBroker::ensure_signed_in`].
    pub async fn refresh(&self, stale_generation: u64) -> Result<Arc<Credentials>, ChatError> {
        self.ensure_open()?;
        let ticket = self.refresh.ticket();
        let mut last_failure = self.refresh.last_failure.lock().await;
        if let Some(error) =
            SingleFlight::shared_failure(last_failure.as_ref(), ticket, stale_generation)
        {
            tracing::debug!(generation = stale_generation, "sharing failed refresh");
            return Err(error);
        }

        let result = self.replace_and_sign_in(stale_generation).await;
        self.refresh.complete(&mut last_failure, stale_generation, &result);
        result
    }

    /// Run a backend operation with the active credentials.
    ///
    /// On [`BackendError::AuthExpired`] the credentials are refreshed once and
    /// the operation retried. Any other backend error goes through `map_err`.
    ///
    /// # Errors
    ///
    /// - `AuthExpired`: the retry also hit an expired session
    /// - `map_err(e)`: the operation failed for another reason
    /// - credential errors from [`CredentialBroker::active`] and
    ///   [`CredentialBroker::refresh`]
    pub async fn with_auth_retry<T, F, Fut>(
        &self,
        op: F,
        map_err: fn(BackendError) -> ChatError,
    ) -> Result<T, ChatError>
    where
        F: Fn(Arc<Credentials>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let credentials = self.active().await?;
        let stale_generation = credentials.generation;

        match op(credentials).await {
            Ok(value) => return Ok(value),
            Err(BackendError::AuthExpired) => {},
            Err(error) => return Err(map_err(error)),
        }

        tracing::info!(generation = stale_generation, "backend session expired, refreshing once");
        let fresh = self.refresh(stale_generation).await?;

        match op(fresh).await {
            Ok(value) => Ok(value),
            Err(BackendError::AuthExpired) => {
                tracing::warn!("backend session expired again after refresh");
                Err(ChatError::AuthExpired)
            },
            Err(error) => Err(map_err(error)),
        }
    }

    /// Destroy credentials and stop every listener of the session.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let dropped = self.current.write().unwrap_or_else(PoisonError::into_inner).take();
        self.signed_in.store(0, Ordering::SeqCst);
        let was_closed = self.closed.send_replace(true);

        if !was_closed {
            tracing::info!(
                counselor = %self.counselor,
                generation = dropped.as_ref().map_or(0, |c| c.generation),
                "session closed"
            );
        }
    }

    /// Whether [`CredentialBroker::close`] was called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` on close.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    async fn replace_and_sign_in(
        &self,
        stale_generation: u64,
    ) -> Result<Arc<Credentials>, ChatError> {
        let credentials = match self.snapshot() {
            Some(current) if current.generation > stale_generation => current,
            _ => self.fetch_and_publish().await?,
        };

        self.ensure_signed_in(&credentials).await?;
        Ok(credentials)
    }

    fn ensure_open(&self) -> Result<(), ChatError> {
        if self.is_closed() { Err(ChatError::Closed) } else { Ok(()) }
    }

    fn snapshot(&self) -> Option<Arc<Credentials>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn fetch_and_publish(&self) -> Result<Arc<Credentials>, ChatError> {
        let issued = self.identity.issue_token(&self.counselor).await.map_err(ChatError::Auth)?;
        let encoded_key = self.identity.chat_key(&issued.token).await.map_err(ChatError::Auth)?;
        let key = SymmetricKey::from_base64(&encoded_key).map_err(ChatError::Key)?;

        // Closed while fetching: never publish
        self.ensure_open()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let credentials = Arc::new(Credentials {
            token: issued.token,
            key,
            expires_at: issued.expires_at,
            generation,
        });

        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&credentials));

        tracing::info!(
            counselor = %self.counselor,
            generation,
            expires_at = %credentials.expires_at,
            "credentials acquired"
        );
        Ok(credentials)
    }
}

/// Resolves once the session is closed or its broker is gone.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        tracing::trace!("credential broker dropped");
    }
}
