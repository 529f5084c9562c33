//! Recoverable failures surfaced across the `Runtime`/`AddressSpace` API
//! (`spec.md` §7: "Validation errors inside IR construction or optimization
//! are programmer errors (asserts); everything reachable from an embedder
//! call is a recoverable `Result`").

use xlate_types::Location;

#[derive(Debug, thiserror::Error)]
pub enum XlateError {
    #[error("no module covers location {0:?}")]
    ModuleMiss(Location),

    #[error("module [{0:?}, {1:?}) overlaps an already-mapped module")]
    OverlappingModule(Location, Location),

    #[error("code cache exhausted: {requested} bytes requested, {available} available")]
    CodeCacheExhausted { requested: usize, available: usize },

    #[error("translation for {0:?} failed: {1}")]
    TranslationFailed(Location, String),

    #[error("lowering {0:?} to the execution backend failed: {1}")]
    Codegen(Location, #[source] xlate_codegen::CodegenError),

    #[error("no translator installed; {0:?} is a cache miss with nothing to consult")]
    NoTranslator(Location),

    #[error("address range [{0:?}, {1:?}) is locked by another thread")]
    RangeLocked(Location, Location),

    #[error("host function table has no entry at {0:?}")]
    UnknownHostFunction(Location),

    #[error("{0:?} is outside the configured [loc_start, loc_end) range")]
    OutOfRange(Location),
}

pub type Result<T> = std::result::Result<T, XlateError>;
