//! Progress-callback trait for intake events.
//!
//! Inject an [`Arc<dyn IntakeProgressCallback>`] via
//! [`crate::config::IntakeConfigBuilder::progress_callback`] to be told as a
//! package moves through download, merge and page upload.
//!
//! # Example
//!
//! ```rust
//! use case_intake::{IntakeConfig, IntakeProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     stored: AtomicUsize,
//! }
//!
//! impl IntakeProgressCallback for PageCounter {
//!     fn on_page_stored(&self, page_number: usize, total_pages: usize) {
//!         let done = self.stored.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("stored page {page_number} ({done}/{total_pages})");
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { stored: AtomicUsize::new(0) });
//! let config = IntakeConfig::builder()
//!     .progress_callback(counter as Arc<dyn IntakeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the intake pipeline at each stage boundary.
///
/// Page uploads run concurrently, so `on_page_stored` may be called from
/// several tasks at once and in any page order. All methods default to
/// no-ops.
pub trait IntakeProgressCallback: Send + Sync {
    /// Called once the payload is parsed, before any download.
    fn on_intake_start(&self, document_id: &str, total_sources: usize) {
        let _ = (document_id, total_sources);
    }

    /// Called after each source document has been downloaded.
    ///
    /// # Arguments
    /// * `index`: 1-indexed source position
    /// * `size_bytes`: downloaded size
    fn on_source_fetched(&self, index: usize, total_sources: usize, size_bytes: usize) {
        let _ = (index, total_sources, size_bytes);
    }

    /// Called once the consolidated PDF has been assembled.
    fn on_merge_complete(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Called as each single-page PDF lands in the target container.
    fn on_page_stored(&self, page_number: usize, total_pages: usize) {
        let _ = (page_number, total_pages);
    }

    /// Called once every page is stored and metadata persisted.
    fn on_intake_complete(&self, document_id: &str, page_count: usize) {
        let _ = (document_id, page_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl IntakeProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::IntakeConfig`].
pub type ProgressCallback = Arc<dyn IntakeProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        fetched: AtomicUsize,
        stored: AtomicUsize,
    }

    impl IntakeProgressCallback for Tracking {
        fn on_source_fetched(&self, _: usize, _: usize, _: usize) {
            self.fetched.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_stored(&self, _: usize, _: usize) {
            self.stored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb = NoopProgressCallback;
        cb.on_intake_start("doc", 3);
        cb.on_source_fetched(1, 3, 10);
        cb.on_merge_complete(5);
        cb.on_page_stored(1, 5);
        cb.on_intake_complete("doc", 5);
    }

    #[test]
    fn overridden_methods_fire() {
        let cb = Arc::new(Tracking {
            fetched: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
        });
        let dyn_cb: ProgressCallback = cb.clone();
        dyn_cb.on_source_fetched(1, 2, 100);
        dyn_cb.on_page_stored(1, 4);
        dyn_cb.on_page_stored(2, 4);
        dyn_cb.on_merge_complete(4);
        assert_eq!(cb.fetched.load(Ordering::SeqCst), 1);
        assert_eq!(cb.stored.load(Ordering::SeqCst), 2);
    }
}
