//! Sender allow-list.

use std::collections::HashSet;

/// Case-insensitive exact-match allow-list on the sender address.
///
/// An empty list allows every sender. That fail-open default is an
/// operational risk: a deployment that forgets `allowedSenders` ingests
/// everything that reaches the mailbox.
#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    allowed: HashSet<String>,
}

impl SenderFilter {
    pub fn new<S: AsRef<str>>(allowed: &[S]) -> Self {
        Self {
            allowed: allowed
                .iter()
                .map(|s| normalize(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows_everyone(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn is_allowed(&self, sender: &str) -> bool {
        self.allows_everyone() || self.allowed.contains(&normalize(sender))
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}
