//! Environment variable access.
//!
//! Two distinct concepts share this module: an [`EnvOverlay`], the map of
//! overrides a caller passes into `exec_command`, and an [`EnvCache`], the
//! lazily-populated snapshot of a backend's *actual* environment that
//! `Backend::env` reads through. Mirrors `pyrc.system.system.FileSystem`'s
//! `__environ` dict, which is empty until first touched and then filled
//! in by a one-shot `echo $VAR` (or `printenv` for a bulk load).

use std::collections::HashMap;

use crate::error::Result;

/// Overrides merged over a backend's live environment for one
/// `exec_command` call. An empty overlay means "inherit unchanged".
///
/// Keys with value `""` still export as empty; the overlay never removes a
/// key from the inherited environment (spec §7: "unknown keys unset
/// nothing").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvOverlay(HashMap<String, String>);

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for EnvOverlay {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lazily-populated cache of a backend's environment.
///
/// A missing key triggers exactly one fetch through the caller-supplied
/// closure; the result (whether present or not) is cached so repeated
/// lookups of an unset variable don't re-query the backend every time.
#[derive(Clone, Debug, Default)]
pub struct EnvCache {
    known: HashMap<String, Option<String>>,
}

impl EnvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `name`, calling `fetch` on a cache miss
    /// and remembering the outcome (including a confirmed absence).
    pub fn get_or_fetch<F>(&mut self, name: &str, fetch: F) -> Result<Option<String>>
    where
        F: FnOnce() -> Result<Option<String>>,
    {
        if let Some(cached) = self.known.get(name) {
            return Ok(cached.clone());
        }
        let value = fetch()?;
        self.known.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Replaces the entire cache in one shot, as when a backend supports a
    /// bulk dump (`printenv` on Unix). Mirrors
    /// `pyrc.system.system.FileSystem.load_env`.
    pub fn load_all(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        self.known.clear();
        for (key, value) in entries {
            self.known.insert(key, Some(value));
        }
    }

    pub fn cached_len(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_preserves_empty_string_values() {
        let mut overlay = EnvOverlay::new();
        overlay.insert("FOO", "");
        assert_eq!(overlay.iter().collect::<Vec<_>>(), vec![("FOO", "")]);
    }

    #[test]
    fn cache_fetches_once_per_key() {
        let mut cache = EnvCache::new();
        let mut calls = 0;
        let first = cache
            .get_or_fetch("PATH", || {
                calls += 1;
                Ok(Some("/usr/bin".to_string()))
            })
            .unwrap();
        let second = cache.get_or_fetch("PATH", || unreachable!()).unwrap();
        assert_eq!(first, Some("/usr/bin".to_string()));
        assert_eq!(second, Some("/usr/bin".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn cache_remembers_confirmed_absence() {
        let mut cache = EnvCache::new();
        let mut calls = 0;
        cache
            .get_or_fetch("MISSING", || {
                calls += 1;
                Ok(None)
            })
            .unwrap();
        cache.get_or_fetch("MISSING", || unreachable!()).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn load_all_replaces_cache_wholesale() {
        let mut cache = EnvCache::new();
        cache
            .get_or_fetch("STALE", || Ok(Some("old".to_string())))
            .unwrap();
        cache.load_all([("FRESH".to_string(), "1".to_string())]);
        assert_eq!(cache.cached_len(), 1);
        assert_eq!(
            cache.get_or_fetch("FRESH", || unreachable!()).unwrap(),
            Some("1".to_string())
        );
    }
}
