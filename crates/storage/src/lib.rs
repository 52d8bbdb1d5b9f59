// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sl-storage: the Persistence Store — one JSON file per runtime, written
//! with atomic tmp-then-rename semantics so a crash mid-write never leaves a
//! half-written config on disk.

mod sanitize;
mod store;

pub use sanitize::{validate_name, SanitizeError};
pub use store::{PersistenceStore, StoreError};
