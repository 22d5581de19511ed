//! Tuning knobs for query evaluation and the edge pipeline.
//!
//! Configuration is a plain value object; there is no file or environment
//! surface here. Use [`Config::default()`] for typical workloads or
//! [`Config::large_scan()`] when traversals routinely page through large
//! ranges.

/// Configuration options controlling page sizing, merge buffering, and
/// pipeline batching.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base page size requested from the index backend per slice scan.
    pub base_page_size: usize,

    /// Hard ceiling on any single scan request, also the page size used by
    /// nodes that ignore hint sizing (synthetic full scans).
    pub max_page_size: usize,

    /// Elements pre-fetched per source by the multi-row merge iterator
    /// before blocking on a refill.
    pub merge_buffer_size: usize,

    /// Batch size for edge enumeration and deletion in the delete pipeline.
    pub scan_page_size: usize,

    /// Number of metadata sub-types audited per repair batch.
    pub repair_concurrent_size: usize,

    /// Whether a NOT at the root of a query (subtraction from a full
    /// unconstrained scan) is accepted. Expensive; on by default to match
    /// observed behavior, but callers can disable it to reject such
    /// queries at compile time.
    pub allow_unanchored_not: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_page_size: 1000,
            max_page_size: 10_000,
            merge_buffer_size: 1000,
            scan_page_size: 1000,
            repair_concurrent_size: 10,
            allow_unanchored_not: true,
        }
    }
}

impl Config {
    /// Preset for workloads dominated by wide range scans: larger pages and
    /// merge buffers, fewer round trips.
    pub fn large_scan() -> Self {
        Self {
            base_page_size: 5000,
            max_page_size: 50_000,
            merge_buffer_size: 5000,
            scan_page_size: 5000,
            ..Self::default()
        }
    }
}
