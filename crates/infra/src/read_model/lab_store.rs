use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use labtrack_core::LabId;
use std::sync::Arc;

/// Lab-isolated key/value store abstraction for disposable read models.
///
/// Read models are projections of the event log and can always be rebuilt,
/// so this interface stays deliberately small: point lookup, upsert, listing
/// within a lab, and a per-lab clear used by rebuilds.
pub trait LabStore<K, V>: Send + Sync {
    fn get(&self, lab_id: LabId, key: &K) -> Option<V>;
    fn upsert(&self, lab_id: LabId, key: K, value: V);
    fn list(&self, lab_id: LabId) -> Vec<V>;
    /// Clear all read-model records for a lab (rebuild support).
    fn clear_lab(&self, lab_id: LabId);
}

impl<K, V, S> LabStore<K, V> for Arc<S>
where
    S: LabStore<K, V> + ?Sized,
{
    fn get(&self, lab_id: LabId, key: &K) -> Option<V> {
        (**self).get(lab_id, key)
    }

    fn upsert(&self, lab_id: LabId, key: K, value: V) {
        (**self).upsert(lab_id, key, value)
    }

    fn list(&self, lab_id: LabId) -> Vec<V> {
        (**self).list(lab_id)
    }

    fn clear_lab(&self, lab_id: LabId) {
        (**self).clear_lab(lab_id)
    }
}

/// In-memory lab-isolated store for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryLabStore<K, V> {
    inner: RwLock<HashMap<(LabId, K), V>>,
}

impl<K, V> InMemoryLabStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryLabStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LabStore<K, V> for InMemoryLabStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, lab_id: LabId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(lab_id, key.clone())).cloned()
    }

    fn upsert(&self, lab_id: LabId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((lab_id, key), value);
        }
    }

    fn list(&self, lab_id: LabId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((t, _k), v)| if *t == lab_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_lab(&self, lab_id: LabId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(t, _k), _v| *t != lab_id);
        }
    }
}
