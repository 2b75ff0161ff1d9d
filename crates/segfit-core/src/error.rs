//! Heap error taxonomy.
//!
//! Only heap construction surfaces a typed error; the steady-state
//! allocation paths signal failure through `Option` returns, since an
//! out-of-memory result is an expected outcome rather than a fault.

use segfit_arena::ArenaError;
use thiserror::Error;

/// Errors from heap construction.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The arena could not grant the initial heap.
    #[error("heap initialization failed: {0}")]
    Init(#[from] ArenaError),
}
