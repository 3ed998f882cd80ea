use thiserror::Error;

/// Translator errors, one variant per kind in the error taxonomy.
/// Every variant except [`Error::Internal`] is first-class and
/// propagated to the driver; `Internal` marks an assertion violation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    File(#[from] std::io::Error),
    #[error("unsupported object format: {0}")]
    UnsupportedFormat(#[from] sbt_elf::ElfError),
    #[error("{0}")]
    Emit(#[from] sbt_emit::EmitError),
    #[error("invalid address-to-source file: {0}")]
    InvalidA2S(String),
    #[error("call target {0} has neither an in-module definition nor an external thunk")]
    FunctionNotFound(String),
    #[error("emitted module failed verification: {0}")]
    InvalidBitcode(String),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
