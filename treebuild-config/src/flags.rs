// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::UnknownCapabilityFlag;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// A set of capability flags.
    ///
    /// The same type describes both what a test *needs* and what a test environment *provides*.
    /// A test can run in an environment iff its need set is a subset of the provide set; see
    /// [`matches`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u8 {
        /// An Android userspace is available.
        const ANDROID = 1 << 0;
        /// Storage is available during boot.
        const STORAGE_BOOT = 1 << 1;
        /// Full storage support is available.
        const STORAGE_FULL = 1 << 2;
        /// Four CPUs are available.
        const SMP4 = 1 << 3;
    }
}

/// Flag names as written in build configs, in display order.
static FLAG_NAMES: &[(&str, CapabilityFlags)] = &[
    ("android", CapabilityFlags::ANDROID),
    ("storage_boot", CapabilityFlags::STORAGE_BOOT),
    ("storage_full", CapabilityFlags::STORAGE_FULL),
    ("smp4", CapabilityFlags::SMP4),
];

impl CapabilityFlags {
    /// Looks up a single flag by its config name (e.g. `storage_boot`).
    pub fn parse_flag(name: &str) -> Result<Self, UnknownCapabilityFlag> {
        FLAG_NAMES
            .iter()
            .find_map(|(flag_name, flag)| (*flag_name == name).then_some(*flag))
            .ok_or_else(|| UnknownCapabilityFlag::new(name))
    }

    /// Sets or clears a flag by its config name.
    pub fn set_named(&mut self, name: &str, value: bool) -> Result<(), UnknownCapabilityFlag> {
        let flag = Self::parse_flag(name)?;
        self.set(flag, value);
        Ok(())
    }

    /// Builds a flag set from `name = bool` pairs, applied in order.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<Self, UnknownCapabilityFlag> {
        let mut flags = Self::empty();
        for (name, value) in pairs {
            flags.set_named(name, value)?;
        }
        Ok(flags)
    }

    /// Returns true if every flag in `self` (a need set) is present in `provide`.
    pub fn matches_provide(self, provide: Self) -> bool {
        provide.contains(self)
    }

    /// Iterates over the config names of the flags in this set.
    pub fn flag_names(self) -> impl Iterator<Item = &'static str> {
        FLAG_NAMES
            .iter()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
    }

    /// Returns all known flag names.
    pub fn known_names() -> impl Iterator<Item = &'static str> {
        FLAG_NAMES.iter().map(|(name, _)| *name)
    }
}

/// Returns true iff `need` is a subset of `provide`.
pub fn matches(need: CapabilityFlags, provide: CapabilityFlags) -> bool {
    need.matches_provide(provide)
}

impl fmt::Display for CapabilityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, name) in self.flag_names().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str("}")
    }
}
