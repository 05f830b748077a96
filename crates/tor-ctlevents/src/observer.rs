//! Observers: a callback, a key, a tag, and an execution policy.

use std::fmt;

use crate::runtime_event::{EventKey, RuntimeEvent};

/// Prefix marking a tag as *static*.
///
/// Static-tagged observers belong to the runtime itself and are skipped
/// by [`EventBus::unsubscribe_all_by_tag`](crate::EventBus::unsubscribe_all_by_tag),
/// so a caller clearing its own tag cannot take the runtime's wiring
/// down with it.
const STATIC_PREFIX: &str = "static.";

/// A tag grouping observers for bulk unsubscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObserverTag(String);

impl ObserverTag {
    /// An ordinary caller tag.
    pub fn new(tag: impl Into<String>) -> Self {
        ObserverTag(tag.into())
    }

    /// A static tag, reserved for the runtime's own observers.
    pub fn new_static(tag: impl fmt::Display) -> Self {
        ObserverTag(format!("{STATIC_PREFIX}{tag}"))
    }

    /// True if this tag is static.
    pub fn is_static(&self) -> bool {
        self.0.starts_with(STATIC_PREFIX)
    }

    /// The tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObserverTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an observer's callback runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum OnEvent {
    /// On the dispatching task, before `publish` returns.
    Immediate,
    /// Handed to the async runtime; `publish` does not wait for it.
    #[default]
    Dispatched,
}

/// The callback type observers register.
pub type ObserverFn = Box<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// One registered observer.
pub struct Observer {
    /// The event key this observer wants.
    key: EventKey,
    /// Optional grouping tag.
    tag: Option<ObserverTag>,
    /// Execution policy.
    execute: OnEvent,
    /// The callback.
    on_event: ObserverFn,
}

impl Observer {
    /// Construct an observer for `key` with the default (dispatched)
    /// execution policy and no tag.
    pub fn new<F>(key: EventKey, on_event: F) -> Self
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        Observer {
            key,
            tag: None,
            execute: OnEvent::default(),
            on_event: Box::new(on_event),
        }
    }

    /// Attach a tag.
    pub fn tagged(mut self, tag: ObserverTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Choose an execution policy.
    pub fn executing(mut self, execute: OnEvent) -> Self {
        self.execute = execute;
        self
    }

    /// The observer's key.
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// The observer's tag, if any.
    pub fn tag(&self) -> Option<&ObserverTag> {
        self.tag.as_ref()
    }

    /// The execution policy.
    pub(crate) fn execute(&self) -> OnEvent {
        self.execute
    }

    /// Invoke the callback.
    pub(crate) fn notify(&self, event: &RuntimeEvent) {
        (self.on_event)(event);
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("key", &self.key)
            .field("tag", &self.tag)
            .field("execute", &self.execute)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn static_tags() {
        let plain = ObserverTag::new("ui");
        assert!(!plain.is_static());
        let s = ObserverTag::new_static("runtime.abc123");
        assert!(s.is_static());
        assert_eq!(s.as_str(), "static.runtime.abc123");
        // A caller constructing the prefixed form by hand gets a static
        // tag too; the prefix is the marker.
        assert!(ObserverTag::new("static.sneaky").is_static());
    }
}
