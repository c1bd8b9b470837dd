//! TTL-bounded store for in-flight challenges.
//!
//! Two independent maps share one TTL:
//!
//! - **sessions**, keyed by payment hash (hex): the token, invoice and signing
//!   key issued for that hash.
//! - **routes**, keyed by route: the last challenge issued for the route, so a
//!   polling client keeps seeing the same invoice until it expires.
//!
//! Entries are logically gone once their TTL has elapsed since creation. They
//! are evicted lazily on read, by [`SessionStore::purge_expired`], or by the
//! background task from [`SessionStore::spawn_sweeper`]. Writes overwrite.
//!
//! Time is read from [`tokio::time::Instant`], so tests can pause and advance it.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::Invoice;

/// Default session lifetime (one hour).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Shortest period [`SessionStore::spawn_sweeper`] runs at.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// A challenge as served to clients: token plus invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Serialized token.
    pub token: String,
    /// The invoice the token is bound to.
    pub invoice: Invoice,
}

/// Server-side record of an issued challenge.
#[derive(Clone)]
pub struct Session {
    challenge: Challenge,
    secret: Vec<u8>,
    created_at: Instant,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("payment_hash", &self.challenge.invoice.payment_hash)
            .field("amount", &self.challenge.invoice.amount)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session stamped with the current instant.
    #[must_use]
    pub fn new(challenge: Challenge, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            challenge,
            secret: secret.into(),
            created_at: Instant::now(),
        }
    }

    /// The payment hash this session is keyed by.
    #[must_use]
    pub fn payment_hash(&self) -> &str {
        &self.challenge.invoice.payment_hash
    }

    /// The issued challenge.
    #[must_use]
    pub const fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// The key the token was signed with.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// When the session was created.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

#[derive(Debug)]
struct Timed<T> {
    value: T,
    created_at: Instant,
}

impl<T> Timed<T> {
    fn is_live(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

/// Concurrent, TTL-bounded session and route cache.
///
/// Construct one per policy and share it behind an [`Arc`].
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: DashMap<String, Timed<Session>>,
    routes: DashMap<String, Timed<Challenge>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    /// Creates an empty store whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    /// The configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a session under its payment hash, replacing any previous one.
    pub fn insert(&self, session: Session) {
        let created_at = session.created_at;
        self.sessions.insert(
            session.payment_hash().to_owned(),
            Timed {
                value: session,
                created_at,
            },
        );
    }

    /// Returns the live session for `payment_hash`.
    #[must_use]
    pub fn get(&self, payment_hash: &str) -> Option<Session> {
        if let Some(entry) = self.sessions.get(payment_hash) {
            if entry.is_live(self.ttl) {
                return Some(entry.value.clone());
            }
        }
        self.sessions
            .remove_if(payment_hash, |_, e| !e.is_live(self.ttl));
        None
    }

    /// Removes the session for `payment_hash`.
    pub fn remove(&self, payment_hash: &str) -> Option<Session> {
        self.sessions.remove(payment_hash).map(|(_, e)| e.value)
    }

    /// Records `challenge` as the latest one for `route`.
    pub fn insert_route(&self, route: impl Into<String>, challenge: Challenge) {
        self.routes.insert(
            route.into(),
            Timed {
                value: challenge,
                created_at: Instant::now(),
            },
        );
    }

    /// Returns the live challenge cached for `route`.
    #[must_use]
    pub fn get_route(&self, route: &str) -> Option<Challenge> {
        if let Some(entry) = self.routes.get(route) {
            if entry.is_live(self.ttl) {
                return Some(entry.value.clone());
            }
        }
        self.routes.remove_if(route, |_, e| !e.is_live(self.ttl));
        None
    }

    /// Evicts every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len() + self.routes.len();
        self.sessions.retain(|_, e| e.is_live(self.ttl));
        self.routes.retain(|_, e| e.is_live(self.ttl));
        let purged = before.saturating_sub(self.sessions.len() + self.routes.len());
        #[cfg(feature = "telemetry")]
        tracing::trace!(purged, "Evicted expired L402 sessions");
        purged
    }

    /// Number of stored sessions, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawns a task that calls [`purge_expired`](Self::purge_expired) every `period`.
    ///
    /// Periods shorter than [`MIN_SWEEP_PERIOD`] are raised to it. The task
    /// holds a weak reference and ends once the store is dropped. Must be
    /// called from within a Tokio runtime.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let period = period.max(MIN_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(hash: &str) -> Challenge {
        Challenge {
            token: format!("token-{hash}"),
            invoice: Invoice {
                payment_hash: hash.to_owned(),
                payment_request: format!("lnbc-{hash}"),
                amount: 100,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_ttl() {
        let store = SessionStore::new(Duration::from_secs(10));
        store.insert(Session::new(challenge("aa"), vec![1u8; 32]));
        assert!(store.get("aa").is_some());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("aa").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("aa").is_none());
        assert!(store.is_empty(), "expired entry is evicted on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_overwrites() {
        let store = SessionStore::default();
        store.insert(Session::new(challenge("aa"), vec![1u8; 32]));
        let mut replacement = challenge("aa");
        replacement.token = "fresh".into();
        store.insert(Session::new(replacement, vec![2u8; 32]));
        let session = store.get("aa").unwrap();
        assert_eq!(session.challenge().token, "fresh");
        assert_eq!(session.secret(), &[2u8; 32]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_cache_shares_ttl() {
        let store = SessionStore::new(Duration::from_secs(5));
        store.insert_route("/protected/a", challenge("bb"));
        assert_eq!(store.get_route("/protected/a"), Some(challenge("bb")));
        assert_eq!(store.get_route("/protected/b"), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get_route("/protected/a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_with_zero_period_keeps_running() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(5)));
        let sweeper = store.spawn_sweeper(Duration::ZERO);
        store.insert(Session::new(challenge("aa"), vec![1u8; 32]));
        store.insert_route("/r", challenge("aa"));

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!sweeper.is_finished());
        assert_eq!(store.len(), 0, "sweeper evicted the expired session");
        assert_eq!(store.purge_expired(), 0, "route entry was swept too");
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_counts_both_maps() {
        let store = SessionStore::new(Duration::from_secs(5));
        store.insert(Session::new(challenge("aa"), vec![1u8; 32]));
        store.insert_route("/r", challenge("aa"));
        tokio::time::advance(Duration::from_secs(3)).await;
        store.insert(Session::new(challenge("bb"), vec![1u8; 32]));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("bb").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_stops_with_store() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(1)));
        store.insert(Session::new(challenge("aa"), vec![1u8; 32]));
        let handle = store.spawn_sweeper(Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.len(), 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_finished());
    }

    #[test]
    fn test_debug_hides_secret_and_token() {
        let session = Session::new(challenge("aa"), vec![9u8; 32]);
        let debug = format!("{session:?}");
        assert!(!debug.contains("token-aa"));
        assert!(!debug.contains("secret"));
    }
}
