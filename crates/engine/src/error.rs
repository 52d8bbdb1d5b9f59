// SPDX-License-Identifier: MIT

//! Engine-wide error type. Lifecycle errors are returned from the
//! control-plane handler as the body of a `bad_input`/`fatal` response;
//! see `sl_wire::control::Status`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("runtime setup failed: {0}")]
    Setup(String),
    #[error("can't change '{field}' while running")]
    ChangeWhileRunning { field: &'static str },
    #[error("runtime is not running")]
    NotRunning,
    #[error("runtime is not in a startable state")]
    NotStartable,
    #[error("bind failed on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("no backend available")]
    NoBackend,
    #[error(transparent)]
    Storage(#[from] sl_storage::StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
