use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

struct SharedEntry<R: ?Sized> {
    resource: Arc<R>,
    holders: BTreeSet<String>,
}

/// Resources shared between phases, keyed by name and reference counted by
/// the phases holding them. A resource is built on first acquisition and
/// dropped when its last holder releases it.
pub struct SharedResources<R: ?Sized> {
    entries: HashMap<String, SharedEntry<R>>,
}

impl<R: ?Sized> Default for SharedResources<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R: ?Sized> SharedResources<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns the error from `create` when the resource does not exist yet
    /// and cannot be built.
    pub fn acquire<F, E>(&mut self, key: &str, holder: &str, create: F) -> Result<Arc<R>, E>
    where
        F: FnOnce() -> Result<Arc<R>, E>,
    {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.holders.insert(holder.to_owned());
            return Ok(Arc::clone(&entry.resource));
        }
        let resource = create()?;
        self.entries.insert(
            key.to_owned(),
            SharedEntry {
                resource: Arc::clone(&resource),
                holders: BTreeSet::from([holder.to_owned()]),
            },
        );
        Ok(resource)
    }

    /// Returns `true` when this was the last holder and the resource was
    /// dropped.
    pub fn release(&mut self, key: &str, holder: &str) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.holders.remove(holder);
        if entry.holders.is_empty() {
            self.entries.remove(key);
            return true;
        }
        false
    }

    #[must_use]
    pub fn holders(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.holders.len())
    }
}
