//! Reactive store - a hierarchical JSON tree with path-addressed views.
//!
//! The whole tree lives behind a single `tokio::sync::watch` channel:
//! writes are serialized by the channel's lock and every write wakes the
//! watchers, which then compare the value at their own path to decide
//! whether anything changed for them.
//!
//! A [`Slice`] is a shared handle to the root plus a path prefix, never a
//! copy. Slices of slices address deeper paths in the same tree.
//!
//! ```text
//! root
//! └── simulations
//!     └── 5a7c…               <- Slice ["simulations", "5a7c…"]
//!         ├── status
//!         ├── services
//!         ├── scenarios
//!         │   └── person      <- written by the control plane
//!         └── store           <- simulator data (people, …)
//! ```

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StoreError;

/// The root of a reactive state tree.
#[derive(Clone)]
pub struct Store {
    tree: Arc<watch::Sender<Value>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (tree, _) = watch::channel(Value::Object(Map::new()));
        Self {
            tree: Arc::new(tree),
        }
    }

    /// Returns a slice addressing the whole tree.
    pub fn root(&self) -> Slice {
        Slice {
            store: self.clone(),
            path: Arc::from(Vec::new()),
        }
    }

    /// Returns a slice rooted at `path`.
    pub fn slice<I, S>(&self, path: I) -> Slice
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Slice {
            store: self.clone(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.tree.borrow().clone()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("watchers", &self.tree.receiver_count())
            .finish()
    }
}

/// A view of the store rooted at a path.
#[derive(Clone)]
pub struct Slice {
    store: Store,
    path: Arc<[String]>,
}

impl Slice {
    /// Returns the path of this slice.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Returns the owning store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns a slice one segment deeper.
    pub fn slice(&self, segment: impl Into<String>) -> Slice {
        let mut path = self.path.to_vec();
        path.push(segment.into());
        Slice {
            store: self.store.clone(),
            path: path.into(),
        }
    }

    /// Returns the value at this path, `None` if absent.
    pub fn get(&self) -> Option<Value> {
        lookup(&self.store.tree.borrow(), &self.path).cloned()
    }

    /// Returns the value at this path deserialized as `T`, `None` if absent.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match self.get() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Invalid {
                    path: self.to_string(),
                    source,
                }),
        }
    }

    /// Replaces the value at this path, creating parents on demand.
    ///
    /// Watchers are only woken if the value actually changed.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        self.store.tree.send_if_modified(|root| {
            let slot = lookup_or_create(root, &self.path);
            if *slot == value {
                false
            } else {
                *slot = value;
                true
            }
        });
    }

    /// Serializes `value` into this path.
    pub fn set_as<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(StoreError::Serialize)?;
        self.set(value);
        Ok(())
    }

    /// Atomically reads and modifies the value at this path.
    ///
    /// The closure sees `null` for an absent value. No other write can
    /// interleave between the read and the write.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        self.store.tree.send_if_modified(|root| {
            let slot = lookup_or_create(root, &self.path);
            let before = slot.clone();
            if let Some(f) = f.take() {
                out = Some(f(slot));
            }
            *slot != before
        });
        match out {
            Some(out) => out,
            // send_if_modified always runs its closure exactly once
            None => unreachable!("store update closure did not run"),
        }
    }

    /// Removes the value at this path.
    pub fn remove(&self) {
        let Some((last, parent)) = self.path.split_last() else {
            self.set(Value::Object(Map::new()));
            return;
        };
        self.store.tree.send_if_modified(|root| {
            match lookup_mut(root, parent) {
                Some(Value::Object(map)) => map.remove(last).is_some(),
                _ => false,
            }
        });
    }

    /// Returns the sequence of future values at this path.
    ///
    /// The sequence starts with the next change, not the current value.
    pub fn updates(&self) -> Updates {
        let rx = self.store.tree.subscribe();
        let last = lookup(&rx.borrow(), &self.path).cloned().unwrap_or(Value::Null);
        Updates {
            rx,
            path: Arc::clone(&self.path),
            last,
        }
    }

    /// Suspends until `predicate` holds for the value at this path and
    /// returns that value.
    ///
    /// The current value is checked first. Returns `None` if the store is
    /// dropped before the predicate is satisfied.
    pub async fn wait_for<P>(&self, predicate: P) -> Option<Value>
    where
        P: Fn(&Value) -> bool,
    {
        let mut rx = self.store.tree.subscribe();
        loop {
            {
                let root = rx.borrow_and_update();
                let value = lookup(&root, &self.path).unwrap_or(&Value::Null);
                if predicate(value) {
                    return Some(value.clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl std::fmt::Display for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.path.join("."))
        }
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slice").field(&self.path).finish()
    }
}

/// Lazy, unbounded sequence of values at a store path.
///
/// Several writes landing between two polls are observed as one update
/// carrying the latest value. Writes that leave this path untouched are
/// skipped.
pub struct Updates {
    rx: watch::Receiver<Value>,
    path: Arc<[String]>,
    last: Value,
}

impl Updates {
    /// Waits for the next change. An absent value is reported as `null`.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            self.rx.changed().await.ok()?;
            let current = lookup(&self.rx.borrow_and_update(), &self.path)
                .cloned()
                .unwrap_or(Value::Null);
            if current != self.last {
                self.last = current.clone();
                return Some(current);
            }
        }
    }

    /// Converts into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Value> + Send + 'static {
        futures::stream::unfold(self, |mut updates| async move {
            let value = updates.next().await?;
            Some((value, updates))
        })
    }
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        _ => None,
    })
}

/// Walks `path`, turning anything that is not an object into one.
fn lookup_or_create<'a>(root: &'a mut Value, path: &[String]) -> &'a mut Value {
    path.iter().fold(root, |node, segment| {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            _ => unreachable!("node was just made an object"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_set_creates_parents() {
        let store = Store::new();
        store.slice(["a", "b", "c"]).set(1);

        assert_eq!(store.snapshot(), json!({ "a": { "b": { "c": 1 } } }));
        assert_eq!(store.slice(["a", "b"]).get(), Some(json!({ "c": 1 })));
        assert_eq!(store.slice(["a", "x"]).get(), None);
    }

    #[test]
    fn test_slices_share_the_tree() {
        let store = Store::new();
        let sim = store.slice(["simulations", "one"]);
        let status = sim.slice("status");

        status.set("running");
        assert_eq!(sim.get(), Some(json!({ "status": "running" })));

        sim.set(json!({ "status": "halted" }));
        assert_eq!(status.get(), Some(json!("halted")));
        assert_eq!(status.to_string(), "simulations.one.status");
    }

    #[test]
    fn test_update_is_atomic_read_modify_write() {
        let store = Store::new();
        let counter = store.slice(["counter"]);

        for _ in 0..5 {
            counter.update(|v| *v = json!(v.as_u64().unwrap_or(0) + 1));
        }
        assert_eq!(counter.get(), Some(json!(5)));

        let seen = counter.update(|v| v.clone());
        assert_eq!(seen, json!(5));
    }

    #[test]
    fn test_remove() {
        let store = Store::new();
        store.slice(["people", "a"]).set("alice");
        store.slice(["people", "b"]).set("bob");

        store.slice(["people", "a"]).remove();
        assert_eq!(store.slice(["people"]).get(), Some(json!({ "b": "bob" })));
    }

    #[test]
    fn test_get_as_reports_path_on_mismatch() {
        let store = Store::new();
        store.slice(["n"]).set("not a number");

        let err = store.slice(["n"]).get_as::<u32>().unwrap_err();
        assert!(err.to_string().contains("`n`"));
        assert_eq!(store.slice(["missing"]).get_as::<u32>().unwrap(), None);
    }

    #[tokio::test]
    async fn test_updates_start_from_next_change() {
        let store = Store::new();
        let status = store.slice(["status"]);
        status.set("creating");

        let mut updates = status.updates();
        status.set("running");
        assert_eq!(updates.next().await, Some(json!("running")));
    }

    #[tokio::test]
    async fn test_updates_skip_unrelated_paths() {
        let store = Store::new();
        let watched = store.slice(["watched"]);
        let mut updates = watched.updates();

        let other = store.slice(["other"]);
        let writer = tokio::spawn({
            let watched = watched.clone();
            async move {
                other.set(1);
                other.set(2);
                tokio::time::sleep(Duration::from_millis(10)).await;
                watched.set("hit");
            }
        });

        let next = tokio::time::timeout(Duration::from_secs(1), updates.next())
            .await
            .unwrap();
        assert_eq!(next, Some(json!("hit")));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_updates_as_stream() {
        let store = Store::new();
        let value = store.slice(["v"]);
        let stream = value.updates().into_stream();
        futures::pin_mut!(stream);

        value.set(1);
        assert_eq!(stream.next().await, Some(json!(1)));
        value.remove();
        assert_eq!(stream.next().await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_wait_for_sees_current_value() {
        let store = Store::new();
        let status = store.slice(["status"]);
        status.set("destroying");

        let value = status.wait_for(|v| v == "destroying").await;
        assert_eq!(value, Some(json!("destroying")));
    }

    #[tokio::test]
    async fn test_wait_for_suspends_until_predicate_holds() {
        let store = Store::new();
        let status = store.slice(["status"]);
        status.set("running");

        let waiter = tokio::spawn({
            let status = status.clone();
            async move { status.wait_for(|v| v == "destroying").await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        status.set("destroying");
        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, Some(json!("destroying")));
    }
}
