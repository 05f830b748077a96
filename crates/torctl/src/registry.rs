//! The process-wide instance registry.
//!
//! One live runtime exists per environment `fid`.  The registry's only
//! operation is get-or-create under a single lock; nothing global is
//! exposed to callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;

use crate::runtime::RtInner;

/// The registry: `fid` to live instance.
static REGISTRY: Lazy<Mutex<HashMap<String, Weak<RtInner>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Return the live instance for `fid`, or install the one `make`
/// produces.  The boolean reports whether `make` ran.
pub(crate) fn get_or_create<F>(fid: &str, make: F) -> (Arc<RtInner>, bool)
where
    F: FnOnce() -> Arc<RtInner>,
{
    let mut map = REGISTRY.lock().expect("registry poisoned");
    if let Some(existing) = map.get(fid).and_then(Weak::upgrade) {
        return (existing, false);
    }
    let created = make();
    map.insert(fid.to_owned(), Arc::downgrade(&created));
    // Drop entries whose instances have gone away.
    map.retain(|_, weak| weak.strong_count() > 0);
    (created, true)
}
