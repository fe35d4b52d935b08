//! Asset readiness barrier
//!
//! Joins the six independent announce-download-materialize round trips that
//! gate match start. Downloads run concurrently with no ordering between
//! them; the barrier resolves once, and only once, every expected key has
//! been materialized. A failed download stalls the barrier by design - the
//! protocol defines no timeout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::assets::factory::{AssetFactory, AssetObject};
use crate::assets::AssetKey;

/// Barrier over the fixed set of per-match assets
pub struct AssetBarrier {
    factory: Arc<dyn AssetFactory>,
    expected: HashSet<AssetKey>,
    /// Last announced URL per key (duplicates overwrite)
    announced: DashMap<AssetKey, String>,
    materialized: Arc<DashMap<AssetKey, AssetObject>>,
    progress_tx: watch::Sender<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AssetBarrier {
    /// Create a barrier expecting the standard six match assets.
    pub fn new(factory: Arc<dyn AssetFactory>) -> Self {
        let (progress_tx, _) = watch::channel(0);
        Self {
            factory,
            expected: AssetKey::expected_for_match().into_iter().collect(),
            announced: DashMap::new(),
            materialized: Arc::new(DashMap::new()),
            progress_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Record an `asset_ready` announcement and start its download.
    ///
    /// Duplicate announcements of the same key update the recorded URL but
    /// do not reissue a download already in flight.
    pub fn announce(&self, key: AssetKey, url: String) {
        if !self.expected.contains(&key) {
            warn!(%key, "announcement for unexpected asset key");
            return;
        }

        let already_announced = self.announced.insert(key, url.clone()).is_some();
        if already_announced {
            debug!(%key, "duplicate announcement, url recorded");
            return;
        }

        let factory = self.factory.clone();
        let materialized = self.materialized.clone();
        let progress_tx = self.progress_tx.clone();

        let task = tokio::spawn(async move {
            match factory.materialize(key, &url).await {
                Ok(object) => {
                    debug!(%key, bytes = object.data.len(), "asset materialized");
                    materialized.insert(key, object);
                    progress_tx.send_replace(materialized.len());
                }
                Err(e) => {
                    // No retry and no timeout: the barrier never resolves
                    // with a missing asset, so match start stalls here.
                    error!(%key, error = %e, "asset materialization failed");
                }
            }
        });

        self.tasks.lock().push(task);
    }

    /// Observe materialization progress (completed asset count).
    pub fn progress(&self) -> watch::Receiver<usize> {
        self.progress_tx.subscribe()
    }

    /// Number of assets the barrier is waiting for.
    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    pub fn is_complete(&self) -> bool {
        self.materialized.len() == self.expected.len()
    }

    /// Resolve once every expected asset has been announced and
    /// materialized. Never resolves partially.
    pub async fn wait_complete(&self) -> HashMap<AssetKey, AssetObject> {
        let mut progress = self.progress_tx.subscribe();
        let total = self.expected.len();
        // The sender lives on self, so wait_for cannot fail.
        let _ = progress.wait_for(|count| *count >= total).await;

        self.materialized
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Abort in-flight downloads. Called on session teardown.
    pub fn cancel(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for AssetBarrier {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::factory::MaterializeError;
    use crate::assets::AssetKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Factory that succeeds instantly, optionally failing chosen keys.
    struct StubFactory {
        fail: HashSet<AssetKey>,
        calls: AtomicUsize,
    }

    impl StubFactory {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(key: AssetKey) -> Self {
            let mut factory = Self::new();
            factory.fail.insert(key);
            factory
        }
    }

    #[async_trait]
    impl AssetFactory for StubFactory {
        async fn materialize(
            &self,
            key: AssetKey,
            url: &str,
        ) -> Result<AssetObject, MaterializeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail.contains(&key) {
                return Err(MaterializeError::Empty);
            }
            Ok(AssetObject {
                key,
                url: url.to_string(),
                data: Bytes::from_static(b"glb"),
                fetched_at_ms: 0,
            })
        }
    }

    fn announce_all_but(barrier: &AssetBarrier, skip: Option<AssetKey>) {
        for key in AssetKey::expected_for_match() {
            if Some(key) == skip {
                continue;
            }
            barrier.announce(key, format!("https://cdn.example/{key}.glb"));
        }
    }

    #[tokio::test]
    async fn resolves_once_all_six_are_materialized() {
        let barrier = AssetBarrier::new(Arc::new(StubFactory::new()));
        announce_all_but(&barrier, None);

        let objects = barrier.wait_complete().await;
        assert_eq!(objects.len(), 6);
        assert!(barrier.is_complete());
        for key in AssetKey::expected_for_match() {
            assert_eq!(objects[&key].data.as_ref(), b"glb");
        }
    }

    #[tokio::test]
    async fn five_of_six_never_resolves() {
        let barrier = AssetBarrier::new(Arc::new(StubFactory::new()));
        let missing = AssetKey::new(AssetKind::Shield, 2);
        announce_all_but(&barrier, Some(missing));

        let result =
            tokio::time::timeout(Duration::from_millis(50), barrier.wait_complete()).await;
        assert!(result.is_err(), "barrier resolved with a missing asset");

        // The sixth announcement releases it.
        barrier.announce(missing, "https://cdn.example/shield2.glb".into());
        let objects = barrier.wait_complete().await;
        assert_eq!(objects.len(), 6);
    }

    #[tokio::test]
    async fn failed_materialization_stalls_the_barrier() {
        let failing = AssetKey::new(AssetKind::Bomb, 1);
        let barrier = AssetBarrier::new(Arc::new(StubFactory::failing(failing)));
        announce_all_but(&barrier, None);

        let result =
            tokio::time::timeout(Duration::from_millis(50), barrier.wait_complete()).await;
        assert!(result.is_err(), "barrier resolved despite a failed download");
        assert!(!barrier.is_complete());
    }

    #[tokio::test]
    async fn duplicate_announcements_do_not_reissue_downloads() {
        let factory = Arc::new(StubFactory::new());
        let barrier = AssetBarrier::new(factory.clone());

        let key = AssetKey::new(AssetKind::Tower, 1);
        barrier.announce(key, "https://cdn.example/a.glb".into());
        barrier.announce(key, "https://cdn.example/b.glb".into());
        announce_all_but(&barrier, Some(key));

        barrier.wait_complete().await;
        assert_eq!(factory.calls.load(Ordering::Relaxed), 6);
        // Last write wins on the recorded URL.
        assert_eq!(
            barrier.announced.get(&key).map(|r| r.value().clone()),
            Some("https://cdn.example/b.glb".to_string())
        );
    }

    #[tokio::test]
    async fn unexpected_keys_are_ignored() {
        let factory = Arc::new(StubFactory::new());
        let barrier = AssetBarrier::new(factory.clone());

        barrier.announce(
            AssetKey::new(AssetKind::Tower, 3),
            "https://cdn.example/t3.glb".into(),
        );

        tokio::task::yield_now().await;
        assert_eq!(factory.calls.load(Ordering::Relaxed), 0);
    }
}
