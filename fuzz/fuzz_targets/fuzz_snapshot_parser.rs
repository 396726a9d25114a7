//! Fuzz target for the dump codec (§4.E).
//!
//! Feeds arbitrary bytes into `HnswIndex::load_index`. A corrupt or
//! truncated dump must be rejected with `Err`, never panic, and must never
//! leave the index in a state `get_max_elements`/`has_node` can't describe.
//!
//! # Running
//!
//! ```bash
//! cd fuzz
//! cargo +nightly fuzz run fuzz_snapshot_parser
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use vindex_core::config::Mode;
use vindex_core::engine::HnswIndex;

fuzz_target!(|data: &[u8]| {
    let mut index = HnswIndex::new();
    let params = Mode::Balanced.resolve();
    if index.update_config(64, params.m, params.ef_construction).is_err() {
        return;
    }
    if index.init_index(256).is_err() {
        return;
    }
    let _ = index.load_index(data);
});
