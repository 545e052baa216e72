//! Hierarchical prefix subscriptions.
//!
//! Channel names are `/`-delimited paths. A registration under `"/"`
//! matches every channel, one ending in `/` matches every channel with
//! that literal prefix, and any other registration matches one exact name.

use crate::callbacks::LazyList;
use crate::cursor::DataCallback;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The prefix matching every channel.
pub const ROOT_PREFIX: &str = "/";

/// Whether a registration under `prefix` covers the channel `name`.
#[must_use]
pub fn matches(prefix: &str, name: &str) -> bool {
    prefix == ROOT_PREFIX || name == prefix || (prefix.ends_with('/') && name.starts_with(prefix))
}

/// Every registration key that can match `name`, most specific first.
///
/// `"a/b/c"` yields `"a/b/c"`, `"a/b/"`, `"a/"` and `"/"`.
#[must_use]
pub fn prefixes(name: &str) -> Vec<&str> {
    let mut out = vec![name];
    let mut end = name.len();
    while let Some(pos) = name[..end.saturating_sub(1)].rfind('/') {
        out.push(&name[..=pos]);
        end = pos + 1;
    }
    if !out.contains(&ROOT_PREFIX) {
        out.push(ROOT_PREFIX);
    }
    out
}

/// Data callbacks registered by prefix.
///
/// The router only remembers registrations. Attaching them to channels is
/// done by the cursor, both when a prefix is registered and when a channel
/// is announced.
#[derive(Default)]
pub struct PrefixRouter {
    routes: RefCell<BTreeMap<String, Rc<LazyList<DataCallback>>>>,
}

impl PrefixRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `callback` under `prefix`. Returns `false` if it was
    /// already registered there.
    pub fn register(&self, prefix: &str, callback: DataCallback) -> bool {
        let list = Rc::clone(
            self.routes
                .borrow_mut()
                .entry(prefix.to_string())
                .or_default(),
        );
        list.push_unique(callback)
    }

    /// Forget `callback` under `prefix`. Returns `true` if it was there.
    pub fn unregister(&self, prefix: &str, callback: &DataCallback) -> bool {
        let list = self.routes.borrow().get(prefix).cloned();
        let Some(list) = list else {
            return false;
        };
        let removed = list.remove(callback);
        if list.is_empty() {
            self.routes.borrow_mut().remove(prefix);
        }
        removed
    }

    /// Whether `callback` is registered under any prefix matching `name`.
    pub fn covers(&self, name: &str, callback: &DataCallback) -> bool {
        let routes = self.routes.borrow();
        prefixes(name)
            .into_iter()
            .filter_map(|p| routes.get(p))
            .any(|list| list.contains(callback))
    }

    /// Callbacks registered under any prefix matching `name`.
    pub fn callbacks_for(&self, name: &str) -> Vec<DataCallback> {
        let lists: Vec<_> = {
            let routes = self.routes.borrow();
            prefixes(name)
                .into_iter()
                .filter_map(|p| routes.get(p).cloned())
                .collect()
        };
        lists.iter().flat_map(|list| list.snapshot()).collect()
    }

    /// Snapshot of every registration, by prefix.
    pub fn entries(&self) -> Vec<(String, Vec<DataCallback>)> {
        self.routes
            .borrow()
            .iter()
            .map(|(prefix, list)| (prefix.clone(), list.snapshot()))
            .collect()
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.routes.borrow().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.borrow().is_empty()
    }

    /// Forget every registration.
    pub fn clear(&self) {
        let lists: Vec<_> = std::mem::take(&mut *self.routes.borrow_mut())
            .into_values()
            .collect();
        for list in lists {
            list.clear();
        }
    }
}

impl std::fmt::Debug for PrefixRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.routes.borrow().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::DataEvent;

    fn noop() -> DataCallback {
        Rc::new(|_: &DataEvent<'_>| {})
    }

    #[test]
    fn prefix_walk() {
        assert_eq!(prefixes("a/b/c"), vec!["a/b/c", "a/b/", "a/", "/"]);
        assert_eq!(prefixes("plain"), vec!["plain", "/"]);
        assert_eq!(prefixes("/top"), vec!["/top", "/"]);
        assert_eq!(prefixes("dir/"), vec!["dir/", "/"]);
        assert_eq!(prefixes("/"), vec!["/"]);
    }

    #[test]
    fn matching_rules() {
        assert!(matches("a/", "a/b/c"));
        assert!(!matches("a/", "ab/c"));
        assert!(matches("/", "anything"));
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c/", "a/b/c"));
    }

    #[test]
    fn walk_agrees_with_matching() {
        let names = ["a/b/c", "a/bc", "ab/c", "x", "/y/z"];
        let keys = ["/", "a/", "a/b/", "a/b/c", "ab/", "x", "/y/"];
        for name in names {
            for key in keys {
                assert_eq!(
                    prefixes(name).contains(&key),
                    matches(key, name),
                    "{} vs {}",
                    key,
                    name
                );
            }
        }
    }

    #[test]
    fn register_and_lookup() {
        let router = PrefixRouter::new();
        let cb = noop();
        assert!(router.register("main/", cb.clone()));
        assert!(!router.register("main/", cb.clone()));
        router.register("/", noop());

        assert_eq!(router.callbacks_for("main/channel1").len(), 2);
        assert_eq!(router.callbacks_for("other").len(), 1);
        assert!(router.covers("main/x", &cb));
        assert!(!router.covers("mainly", &cb));

        assert!(router.unregister("main/", &cb));
        assert!(!router.unregister("main/", &cb));
        assert_eq!(router.len(), 1);

        router.clear();
        assert!(router.is_empty());
    }
}
