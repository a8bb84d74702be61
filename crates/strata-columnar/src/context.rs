#![forbid(unsafe_code)]

use strata_store::{Store, StoreConfig};

/// Build-time settings. There is no process-wide configuration
/// singleton; operations that create columns take a [`Platform`]
/// explicitly.
#[derive(Clone, Copy, Debug)]
pub struct PlatformOptions {
    /// Target rows per chunk for columns built by this platform.
    pub chunk_rows: usize,
    /// Simulated cluster size; only affects key homing.
    pub nodes: usize,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 65_536,
            nodes: 1,
        }
    }
}

/// The cluster context: a store handle plus build settings.
#[derive(Clone, Debug)]
pub struct Platform {
    store: Store,
    opts: PlatformOptions,
}

impl Platform {
    pub fn new(opts: PlatformOptions) -> Platform {
        Platform {
            store: Store::new(StoreConfig { nodes: opts.nodes }),
            opts,
        }
    }

    /// A platform over an existing store handle (e.g. a second client of
    /// the same cluster).
    pub fn with_store(store: Store, opts: PlatformOptions) -> Platform {
        Platform { store, opts }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn options(&self) -> PlatformOptions {
        self.opts
    }

    pub fn chunk_rows(&self) -> usize {
        self.opts.chunk_rows
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::new(PlatformOptions::default())
    }
}
