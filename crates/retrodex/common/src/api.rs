// Retrodex
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Platform API levels

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Totally ordered platform API level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiLevel(u32);

impl ApiLevel {
    pub const B: ApiLevel = ApiLevel(1);
    pub const K: ApiLevel = ApiLevel(19);
    pub const L: ApiLevel = ApiLevel(21);
    pub const M: ApiLevel = ApiLevel(23);
    pub const N: ApiLevel = ApiLevel(24);
    pub const O: ApiLevel = ApiLevel(26);
    pub const P: ApiLevel = ApiLevel(28);
    pub const Q: ApiLevel = ApiLevel(29);
    pub const R: ApiLevel = ApiLevel(30);
    pub const S: ApiLevel = ApiLevel(31);
    pub const T: ApiLevel = ApiLevel(33);
    pub const U: ApiLevel = ApiLevel(34);
    /// Level of features no released platform supports yet
    pub const MASTER: ApiLevel = ApiLevel(10_000);

    /// Create an API level from its numeric value
    pub const fn new(level: u32) -> Self {
        Self(level)
    }

    /// Numeric value of the level
    pub const fn level(self) -> u32 {
        self.0
    }

    /// Whether this level is at least `other`
    pub fn is_at_least(self, other: ApiLevel) -> bool {
        self >= other
    }

    fn named(name: &str) -> Option<Self> {
        let level = match name.to_ascii_uppercase().as_str() {
            "B" => Self::B,
            "K" => Self::K,
            "L" => Self::L,
            "M" => Self::M,
            "N" => Self::N,
            "O" => Self::O,
            "P" => Self::P,
            "Q" => Self::Q,
            "R" => Self::R,
            "S" => Self::S,
            "T" => Self::T,
            "U" => Self::U,
            "MASTER" => Self::MASTER,
            _ => return None,
        };
        Some(level)
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MASTER { write!(f, "API MASTER") } else { write!(f, "API {}", self.0) }
    }
}

impl FromStr for ApiLevel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(level) = trimmed.parse::<u32>() {
            return Ok(Self(level));
        }
        Self::named(trimmed).ok_or_else(|| ModelError::InvalidApiLevel(trimmed.to_string()))
    }
}
