//! Per-connection subscription filter over notification names.

use std::collections::HashSet;

use crate::domain::Notification;

/// Set of notification names a WebSocket client wants to receive.
///
/// A new connection receives everything. The first `subscribe` narrows
/// the stream to the listed names unless it contains `"*"`.
#[derive(Debug)]
pub struct SubscriptionManager {
    names: HashSet<&'static str>,
    subscribe_all: bool,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self {
            names: HashSet::new(),
            subscribe_all: true,
        }
    }
}

impl SubscriptionManager {
    /// Creates a manager that matches every notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds names to the filter. Returns the names that were not
    /// recognised.
    pub fn subscribe(&mut self, names: &[String]) -> Vec<String> {
        let (known, unknown) = resolve(names);
        if names.iter().any(|n| n == "*") {
            self.subscribe_all = true;
        } else if !known.is_empty() {
            if self.subscribe_all && self.names.is_empty() {
                // first explicit subscription narrows the default stream
                self.subscribe_all = false;
            }
            self.names.extend(known);
        }
        unknown
    }

    /// Removes names from the filter. `"*"` clears everything.
    pub fn unsubscribe(&mut self, names: &[String]) {
        if names.iter().any(|n| n == "*") {
            self.subscribe_all = false;
            self.names.clear();
            return;
        }
        if self.subscribe_all {
            self.subscribe_all = false;
            self.names = Notification::NAMES.into_iter().collect();
        }
        let (known, _) = resolve(names);
        for name in known {
            self.names.remove(name);
        }
    }

    /// Returns `true` if `notification` passes the filter.
    #[must_use]
    pub fn matches(&self, notification: &Notification) -> bool {
        self.subscribe_all || self.names.contains(notification.name())
    }

    /// Names currently selected, sorted.
    #[must_use]
    pub fn selected(&self) -> Vec<&'static str> {
        let mut out: Vec<_> = if self.subscribe_all {
            Notification::NAMES.to_vec()
        } else {
            self.names.iter().copied().collect()
        };
        out.sort_unstable();
        out
    }

    /// Returns `true` if every notification is selected.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

fn resolve(names: &[String]) -> (Vec<&'static str>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for name in names.iter().filter(|n| n.as_str() != "*") {
        match Notification::NAMES.iter().find(|k| **k == name.as_str()) {
            Some(k) => known.push(*k),
            None => unknown.push(name.clone()),
        }
    }
    (known, unknown)
}
