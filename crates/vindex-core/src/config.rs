//! Frozen and mutable configuration surfaces for the graph engine and the
//! database orchestrator.
//!
//! Two structs carry the two different mutability regimes invariant 5 (§3)
//! requires: [`HnswConfig`] is fixed the moment [`crate::engine::HnswIndex::init_index`]
//! runs, while [`SearchConfig`] may be changed at any time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Compile-time upper bound on any `ef` value (construction or search).
///
/// All scratch heaps and the visited-stamp array are sized against this
/// constant so that query-time code never allocates.
pub const MAX_EF: usize = 4096;

/// Construction-time hyperparameters. Frozen after the first `init_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimensionality. Must be a positive multiple of 4.
    pub dim: usize,
    /// Per-upper-layer neighbor cap.
    pub m: u32,
    /// Layer-0 neighbor cap, always `2 * m`.
    pub m_max0: u32,
    /// Maximum number of layers a node can occupy (>= 1).
    pub max_layers: u32,
    /// Beam width used while building the graph.
    pub ef_construction: u32,
}

impl HnswConfig {
    /// Default layer cap used throughout the corpus this design is grounded on.
    pub const DEFAULT_MAX_LAYERS: u32 = 4;

    /// Builds a config, validating the invariants from spec §3.
    ///
    /// `capacity` is deliberately not part of this struct: it is supplied to
    /// `init_index` separately and may grow across re-inits (§3 invariant 6),
    /// while `dim`/`m`/`m_max0`/`max_layers`/`ef_construction` are frozen the
    /// moment the index is first initialized.
    pub fn new(dim: usize, m: u32, ef_construction: u32) -> Result<Self> {
        if dim == 0 || dim % 4 != 0 {
            return Err(Error::DimensionMismatch {
                expected: 4,
                actual: dim,
            });
        }
        if m == 0 {
            return Err(Error::ConfigMismatch {
                field: "m",
                expected: ">0".to_string(),
                actual: m.to_string(),
            });
        }
        if ef_construction == 0 {
            return Err(Error::ConfigMismatch {
                field: "ef_construction",
                expected: ">0".to_string(),
                actual: ef_construction.to_string(),
            });
        }
        Ok(Self {
            dim,
            m,
            m_max0: m * 2,
            max_layers: Self::DEFAULT_MAX_LAYERS,
            ef_construction,
        })
    }

    /// `cap(L)`: `m_max0` at layer 0, `m` above it.
    #[inline]
    #[must_use]
    pub fn layer_cap(&self, level: u32) -> u32 {
        if level == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Checks that every frozen field matches `other`, naming the first
    /// field that disagrees.
    pub fn assert_compatible(&self, other: &HnswConfig) -> Result<()> {
        macro_rules! check {
            ($field:ident) => {
                if self.$field != other.$field {
                    return Err(Error::ConfigMismatch {
                        field: stringify!($field),
                        expected: self.$field.to_string(),
                        actual: other.$field.to_string(),
                    });
                }
            };
        }
        check!(dim);
        check!(m);
        check!(m_max0);
        check!(max_layers);
        check!(ef_construction);
        Ok(())
    }
}

/// Query-time tuning. Unlike [`HnswConfig`], every field here may change
/// after `init_index` (invariant 5, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Beam width used while querying.
    pub ef_search: u32,
    /// Maximum number of `(id, dist)` pairs the results buffer holds.
    pub results_cap: u32,
}

impl SearchConfig {
    /// Sets `ef_search`, ignoring non-positive values per §4.G.
    pub fn set_ef_search(&mut self, ef_search: u32) {
        if ef_search > 0 {
            self.ef_search = ef_search;
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ef_search: 64,
            results_cap: 64,
        }
    }
}

/// Search-quality presets named on the CLI/config surface in spec §6.
///
/// Each preset resolves to the `{m, ef_construction, base_ef_search,
/// rerank_multiplier, max_ann_k, results_cap}` tuple the orchestrator needs;
/// parsing the preset name itself is the host's job (out of scope, §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Smaller graph, narrower beams: lowest latency, lowest recall.
    Fast,
    /// Default trade-off for general-purpose workloads.
    Balanced,
    /// Denser graph, wider beams: highest recall, highest latency.
    Accurate,
}

/// Resolved orchestrator tuning parameters for a [`Mode`] preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbParams {
    /// Per-upper-layer neighbor cap passed to [`HnswConfig::new`].
    pub m: u32,
    /// Construction beam width passed to [`HnswConfig::new`].
    pub ef_construction: u32,
    /// Baseline search beam width before the per-query `k`-based widening.
    pub base_ef_search: u32,
    /// Multiplies `k` to size the ANN candidate pool ahead of re-rank.
    pub rerank_multiplier: u32,
    /// Hard cap on the ANN candidate pool regardless of `k`.
    pub max_ann_k: u32,
    /// Default results-buffer capacity.
    pub results_cap: u32,
}

impl Mode {
    /// Resolves this preset into concrete orchestrator tuning.
    #[must_use]
    pub fn resolve(self) -> DbParams {
        match self {
            Mode::Fast => DbParams {
                m: 8,
                ef_construction: 64,
                base_ef_search: 32,
                rerank_multiplier: 2,
                max_ann_k: 256,
                results_cap: 64,
            },
            Mode::Balanced => DbParams {
                m: 16,
                ef_construction: 128,
                base_ef_search: 64,
                rerank_multiplier: 4,
                max_ann_k: 1024,
                results_cap: 128,
            },
            Mode::Accurate => DbParams {
                m: 32,
                ef_construction: 256,
                base_ef_search: 128,
                rerank_multiplier: 8,
                max_ann_k: MAX_EF as u32,
                results_cap: 256,
            },
        }
    }
}

/// Orchestrator-level configuration: storage directory layout, tuning, and
/// the knobs spec §6's "CLI/config surface" names as informational.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Vector dimensionality.
    pub dim: usize,
    /// Search-quality preset.
    pub mode: Mode,
    /// Initial internal-id capacity.
    pub capacity: u32,
    /// RNG seed; zero is replaced by a fixed nonzero constant (see `engine::rng`).
    pub seed: u32,
    /// Fraction of soft-deleted entries (of total) that triggers a scheduled
    /// non-compact rebuild.
    pub deleted_rebuild_threshold: f32,
    /// Whether to rebuild from the f32 store when the dump is absent/corrupt
    /// on open.
    pub auto_rebuild_on_load: bool,
}

impl DbConfig {
    /// Builds a config from a dimension and a [`Mode`] preset, filling the
    /// remaining knobs with the corpus' defaults.
    #[must_use]
    pub fn new(dim: usize, mode: Mode) -> Self {
        Self {
            dim,
            mode,
            capacity: 1 << 20,
            seed: 0,
            deleted_rebuild_threshold: 0.2,
            auto_rebuild_on_load: true,
        }
    }

    /// Loads overrides from a TOML file, layered over [`DbConfig::new`]'s
    /// defaults, via `figment`.
    pub fn from_toml_file(dim: usize, mode: Mode, path: &std::path::Path) -> Result<Self> {
        #[derive(Deserialize, Default)]
        struct Overrides {
            capacity: Option<u32>,
            seed: Option<u32>,
            deleted_rebuild_threshold: Option<f32>,
            auto_rebuild_on_load: Option<bool>,
        }

        let overrides: Overrides = figment::Figment::new()
            .merge(figment::providers::Toml::file(path))
            .extract()
            .unwrap_or_default();

        let mut config = Self::new(dim, mode);
        if let Some(capacity) = overrides.capacity {
            config.capacity = capacity;
        }
        if let Some(seed) = overrides.seed {
            config.seed = seed;
        }
        if let Some(threshold) = overrides.deleted_rebuild_threshold {
            config.deleted_rebuild_threshold = threshold;
        }
        if let Some(auto_rebuild) = overrides.auto_rebuild_on_load {
            config.auto_rebuild_on_load = auto_rebuild;
        }
        Ok(config)
    }
}
