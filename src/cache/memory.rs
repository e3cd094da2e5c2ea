//! In-process [`KvStore`] with Redis-compatible semantics.
//!
//! Expiry is tracked on `tokio::time::Instant`, so tests running on a paused
//! clock can step through TTL boundaries deterministically.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::store::{KvStore, StoreError, ttl_seconds};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a key: `None` when absent, `Some(None)` when it
    /// never expires.
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        self.purge_expired(key, now);
        self.entries
            .get(key)
            .map(|entry| entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn apply_incr(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let now = Instant::now();
        self.purge_expired(key, now);

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: b"0".to_vec(),
            expires_at: None,
        });

        let current = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(|| StoreError::NotAnInteger {
                key: key.to_string(),
            })?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
            })?;

        entry.value = next.to_string().into_bytes();
        if let Some(ttl) = ttl
            && entry.expires_at.is_none()
        {
            entry.expires_at = Some(now + ttl);
        }

        Ok(next)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.purge_expired(key, Instant::now());
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        ttl_seconds(ttl)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.apply_incr(key, delta, None)
    }

    async fn incr_with_ttl(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        ttl_seconds(ttl)?;
        self.apply_incr(key, delta, Some(ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        ttl_seconds(ttl)?;
        let now = Instant::now();
        self.purge_expired(key, now);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            if !glob_match(pattern, key) {
                return true;
            }
            if !entry.is_expired(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redis `KEYS`/`SCAN MATCH` glob semantics.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p = pattern.as_bytes();
    let s = key.as_bytes();
    let (mut pi, mut si) = (0usize, 0usize);
    // Position of the last `*` and the input offset it is currently absorbing.
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() {
            let step = match p[pi] {
                b'*' => {
                    backtrack = Some((pi, si));
                    pi += 1;
                    continue;
                }
                b'?' => Some(pi + 1),
                b'[' => match match_class(p, pi, s[si]) {
                    Some((true, next)) => Some(next),
                    Some((false, _)) => None,
                    None => (s[si] == b'[').then_some(pi + 1),
                },
                b'\\' if pi + 1 < p.len() => (p[pi + 1] == s[si]).then_some(pi + 2),
                literal => (literal == s[si]).then_some(pi + 1),
            };

            if let Some(next) = step {
                pi = next;
                si += 1;
                continue;
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                pi = star + 1;
                si = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match one byte against a `[...]` class starting at `p[start]`.
///
/// Returns `(matched, index after the class)`, or `None` when the class is
/// unterminated and the `[` must be read literally.
fn match_class(p: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        let current = *p.get(i)?;
        match current {
            b']' => break,
            b'\\' => {
                let escaped = *p.get(i + 1)?;
                matched |= escaped == c;
                i += 2;
            }
            low if p.get(i + 1) == Some(&b'-') && p.get(i + 2).is_some_and(|b| *b != b']') => {
                let high = p[i + 2];
                let (lo, hi) = if low <= high { (low, high) } else { (high, low) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            literal => {
                matched |= literal == c;
                i += 1;
            }
        }
    }

    Some((matched != negate, i + 1))
}
