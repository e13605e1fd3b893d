//! Key pool — picks the credential with the least wait for each probe.
//!
//! One `KeySelector` per network owns a sliding-window limiter for every
//! API key of that network, a rotation cursor, and a "last used" stamp
//! per key. Selection combines the hard limiter wait with a soft recency
//! penalty so that load spreads across keys even while every key is
//! under its cap.
//!
//! The selectors of one run live in a `LimiterRegistry` owned by that
//! run, so no limiter state leaks from one run into the next.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use zeroize::Zeroizing;

pub mod rate_tracker;
pub mod registry;

use rate_tracker::{KeyRateLimiter, RateLimit};

/// A key used within the last second is penalized by the time remaining
/// until that second is up. Fixed regardless of the limiter's window.
const RECENCY_WINDOW: Duration = Duration::from_secs(1);

// ── Credential ──────────────────────────────────────────────────────

/// One API key for one network. The secret is wiped on drop and never
/// appears in `Debug` output; logs use the fingerprint instead.
#[derive(Clone)]
pub struct Credential {
    secret: Zeroizing<String>,
    fingerprint: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = Zeroizing::new(secret.into());
        let digest = Sha256::digest(secret.as_bytes());
        let fingerprint = hex::encode(&digest[..4]);
        Self { secret, fingerprint }
    }

    /// The raw key, for placing into a request. Do not log.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Short stable identifier: first 8 hex chars of sha256(key).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Liveness of a credential as seen by its selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    /// The remote API answered 429 for this key; it sits out one window.
    RateLimited,
}

// ── Key Selector ────────────────────────────────────────────────────

struct KeySlot {
    credential: Credential,
    limiter: KeyRateLimiter,
    last_used: Option<Instant>,
    status: KeyStatus,
}

struct SelectorState {
    slots: Vec<KeySlot>,
    cursor: usize,
}

impl SelectorState {
    /// Scan every key once starting at the cursor and return the index
    /// with the smallest combined wait. Ties go to the key seen first.
    fn pick(&mut self, now: Instant) -> (usize, Duration) {
        let total = self.slots.len();
        let mut best: Option<(usize, Duration)> = None;

        for offset in 0..total {
            let idx = (self.cursor + offset) % total;
            let slot = &mut self.slots[idx];
            let hard = slot.limiter.wait_at(now);
            let soft = slot
                .last_used
                .map(|used| RECENCY_WINDOW.saturating_sub(now.saturating_duration_since(used)))
                .unwrap_or(Duration::ZERO);
            let wait = hard + soft;

            match best {
                Some((_, best_wait)) if wait >= best_wait => {}
                _ => best = Some((idx, wait)),
            }
        }

        best.unwrap_or((0, Duration::ZERO))
    }
}

/// Fair, rate-aware key rotation for one network.
pub struct KeySelector {
    network: String,
    key_count: usize,
    state: Mutex<SelectorState>,
}

impl KeySelector {
    /// Build a selector over `credentials`, each with its own limiter.
    /// Returns `None` when there is nothing to select from.
    pub fn new(network: &str, credentials: Vec<Credential>, limit: RateLimit) -> Option<Self> {
        if credentials.is_empty() {
            return None;
        }
        let slots: Vec<KeySlot> = credentials
            .into_iter()
            .map(|credential| KeySlot {
                credential,
                limiter: KeyRateLimiter::new(limit),
                last_used: None,
                status: KeyStatus::Active,
            })
            .collect();

        Some(Self {
            network: network.to_string(),
            key_count: slots.len(),
            state: Mutex::new(SelectorState { slots, cursor: 0 }),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Wait for and claim the key with the least combined wait.
    ///
    /// The whole scan → sleep → record sequence runs under the selector
    /// lock, so two concurrent callers can never both count the same free
    /// slot. Only the chosen key's window records a request, and only once
    /// its wait has reached zero.
    pub async fn next_available_key(&self) -> Credential {
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();
            let (idx, wait) = state.pick(now);

            if !wait.is_zero() {
                tracing::trace!(
                    network = %self.network,
                    key = %state.slots[idx].credential.fingerprint(),
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for key capacity"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let slot = &mut state.slots[idx];
            if !slot.limiter.acquire().is_zero() {
                continue;
            }
            slot.last_used = Some(now);
            slot.status = KeyStatus::Active;
            let credential = slot.credential.clone();
            state.cursor = (idx + 1) % self.key_count;
            return credential;
        }
    }

    /// Record that the explorer rejected `credential` with a 429.
    pub async fn mark_rate_limited(&self, credential: &Credential) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| s.credential.fingerprint() == credential.fingerprint())
        {
            slot.limiter.saturate_at(now);
            slot.status = KeyStatus::RateLimited;
            tracing::info!(
                network = %self.network,
                key = %credential.fingerprint(),
                "Key marked rate-limited for one window"
            );
        }
    }

    /// Current status of every key, in configuration order.
    pub async fn statuses(&self) -> Vec<(String, KeyStatus)> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .map(|s| (s.credential.fingerprint().to_string(), s.status))
            .collect()
    }
}

impl fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySelector")
            .field("network", &self.network)
            .field("key_count", &self.key_count)
            .finish()
    }
}

// ── Limiter Registry ────────────────────────────────────────────────

/// All key selectors of a single run, keyed by network.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    selectors: BTreeMap<String, Arc<KeySelector>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, selector: KeySelector) -> Arc<KeySelector> {
        let selector = Arc::new(selector);
        self.selectors
            .insert(selector.network().to_string(), Arc::clone(&selector));
        selector
    }

    pub fn get(&self, network: &str) -> Option<Arc<KeySelector>> {
        self.selectors.get(network).cloned()
    }

    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(n: usize) -> Vec<Credential> {
        (0..n).map(|i| Credential::new(format!("key-{}", i))).collect()
    }

    fn limit(max: u32, window_ms: u64) -> RateLimit {
        RateLimit {
            max_requests: max,
            time_window: Duration::from_millis(window_ms),
        }
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let c = Credential::new("super-secret-key");
        let dbg = format!("{:?}", c);
        assert!(!dbg.contains("super-secret-key"));
        assert!(dbg.contains(c.fingerprint()));
        assert_eq!(c.fingerprint().len(), 8);
    }

    #[test]
    fn test_empty_credentials_build_no_selector() {
        assert!(KeySelector::new("ethereum", vec![], RateLimit::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_visits_every_key_before_repeating() {
        let selector = KeySelector::new("bsc", creds(4), limit(5, 1000)).unwrap();
        let start = Instant::now();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(selector.next_available_key().await.fingerprint().to_string());
        }

        let expected: Vec<String> = creds(4).iter().map(|c| c.fingerprint().to_string()).collect();
        assert_eq!(seen, expected);
        assert_eq!(start.elapsed(), Duration::ZERO, "no key should have waited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_key_waits_out_recency_penalty() {
        let selector = KeySelector::new("ethereum", creds(1), limit(5, 1000)).unwrap();
        let start = Instant::now();

        selector.next_available_key().await;
        selector.next_available_key().await;

        assert!(start.elapsed() >= RECENCY_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_key_is_skipped() {
        let all = creds(2);
        let selector = KeySelector::new("polygon", all.clone(), limit(5, 1000)).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        selector.mark_rate_limited(&all[0]).await;
        let picked = selector.next_available_key().await;
        assert_eq!(picked.fingerprint(), all[1].fingerprint());

        let statuses = selector.statuses().await;
        assert_eq!(statuses[0].1, KeyStatus::RateLimited);
        assert_eq!(statuses[1].1, KeyStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_key_budget() {
        let selector = Arc::new(KeySelector::new("tron", creds(2), limit(3, 1000)).unwrap());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let selector = Arc::clone(&selector);
            handles.push(tokio::spawn(async move {
                selector.next_available_key().await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for h in handles {
            grants.push(h.await.unwrap());
        }
        grants.sort();

        // Two keys, each at most once per recency window and 3 per second.
        for (i, t) in grants.iter().enumerate() {
            let within = grants[i..]
                .iter()
                .take_while(|g| g.duration_since(*t) < Duration::from_secs(1))
                .count();
            assert!(within <= 2 * 3);
        }
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_registry_is_keyed_by_network() {
        let mut reg = LimiterRegistry::new();
        assert!(reg.is_empty());
        reg.insert(KeySelector::new("bsc", creds(2), RateLimit::default()).unwrap());
        reg.insert(KeySelector::new("tron", creds(1), RateLimit::default()).unwrap());

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("bsc").map(|s| s.key_count()), Some(2));
        assert!(reg.get("ethereum").is_none());
        assert_eq!(reg.networks().collect::<Vec<_>>(), vec!["bsc", "tron"]);
    }
}
