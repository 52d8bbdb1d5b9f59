// SPDX-License-Identifier: MIT

//! Cache store error types.

use crate::value::ValueKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("type_conflict: key holds a {actual:?}, op expects {expected:?}")]
    TypeConflict { expected: ValueKind, actual: ValueKind },
    #[error("denied: readonly mode")]
    ReadonlyMode,
    #[error("denied: command requires admin mode")]
    AdminRequired,
    #[error("over memory budget and eviction policy is 'none'")]
    OutOfMemory,
}
