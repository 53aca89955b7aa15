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

//! Access flags for classes, methods and fields

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Class file access flags (shared bit layout for classes and members)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
    }
}

impl AccessFlags {
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub fn is_synthetic(self) -> bool {
        self.contains(Self::SYNTHETIC)
    }

    pub fn is_bridge(self) -> bool {
        self.contains(Self::BRIDGE)
    }

    /// More than one of public, private and protected is set
    pub fn has_conflicting_visibility(self) -> bool {
        (self & (Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)).bits().count_ones() > 1
    }

    /// Same flags with the visibility bits replaced by package visibility
    pub fn as_package_private(self) -> Self {
        self - (Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_conflicts() {
        assert!(!AccessFlags::PUBLIC.has_conflicting_visibility());
        assert!((AccessFlags::PUBLIC | AccessFlags::PRIVATE).has_conflicting_visibility());
        assert!(!(AccessFlags::PRIVATE | AccessFlags::STATIC).has_conflicting_visibility());
    }

    #[test]
    fn test_package_private() {
        let flags = AccessFlags::PRIVATE | AccessFlags::STATIC;
        assert_eq!(flags.as_package_private(), AccessFlags::STATIC);
    }
}
