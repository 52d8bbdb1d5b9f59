// SPDX-License-Identifier: MIT

//! Mode gate: `{readonly, readwrite, admin}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Readonly,
    #[default]
    Readwrite,
    Admin,
}

impl Mode {
    pub fn allows_mutation(self) -> bool {
        !matches!(self, Mode::Readonly)
    }

    pub fn allows_admin(self) -> bool {
        matches!(self, Mode::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    None,
    AllkeysLru,
    AllkeysRandom,
}
