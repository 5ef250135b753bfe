//! The narrow seams through which the core talks to the outside
//! world: the taxonomy database, the user, and the caller's cancel
//! switch. All three are capability-style traits/values injected into
//! the resolvers; in-memory fakes stand in for them in tests.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::Facet;
use crate::errors::Result;
use crate::taxonomy::Taxonomy;

/// A taxonomy database reachable over the network.
///
/// `search` returns up to `max_results` records; an empty list means
/// no hit. Implementations never return partial records: a returned
/// taxonomy has at least its scientific name populated when available
/// upstream. Transport, authentication, rate limiting and per-call
/// timeouts are the adapter's concern; transport failures surface as
/// `Error::NetworkUnavailable` or `Error::Service`.
pub trait TaxonomyService: Send + Sync {
    fn search(&self, facet: Facet, query: &str, max_results: usize) -> Result<Vec<Taxonomy>>;
}

/// User-facing notifications. The core never blocks on these.
pub trait UserNotifier: Send + Sync {
    fn info(&self, title: &str, message: &str);
    fn warn(&self, title: &str, message: &str);
    fn error(&self, title: &str, message: &str);
}

/// A notifier that swallows everything, for headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl UserNotifier for NullNotifier {
    fn info(&self, _title: &str, _message: &str) {}
    fn warn(&self, _title: &str, _message: &str) {}
    fn error(&self, _title: &str, _message: &str) {}
}

/// How many unresolved labels a notification spells out before
/// truncating with an ellipsis.
pub const NOTIFY_LABEL_LIMIT: usize = 20;

/// Render a collection of labels for a notification: the first
/// [`NOTIFY_LABEL_LIMIT`] entries joined by commas, then "...".
pub fn truncated_label_list<'a, I>(labels: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let mut shown = Vec::with_capacity(NOTIFY_LABEL_LIMIT);
    let mut truncated = false;
    for label in labels {
        if shown.len() == NOTIFY_LABEL_LIMIT {
            truncated = true;
            break;
        }
        shown.push(label.as_str());
    }
    let mut out = shown.join(", ");
    if truncated {
        out.push_str(", ...");
    }
    out
}

/// Cooperative cancellation flag shared between a job and its caller.
///
/// Checked at the top of each postorder iteration and before each
/// service call; a cancelled job stops with `Error::Cancelled`,
/// leaving partial tree mutations in place (rerunning completes them).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
