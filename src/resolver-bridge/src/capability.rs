//! Capability negotiation.
//!
//! Plugins advertise optional features either statically (names in their
//! manifest) or at runtime through a bitmask. Both forms decode into the same
//! closed set; anything unknown is kept aside rather than dropped silently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Optional features a resolver plugin may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Browsable,
    PlaylistSync,
    AccountFactory,
    UrlLookup,
    ConfigTestable,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Browsable,
        Capability::PlaylistSync,
        Capability::AccountFactory,
        Capability::UrlLookup,
        Capability::ConfigTestable,
    ];

    /// Bit position in the runtime capability mask.
    pub fn bit(self) -> u32 {
        match self {
            Capability::Browsable => 0,
            Capability::PlaylistSync => 1,
            Capability::AccountFactory => 2,
            Capability::UrlLookup => 3,
            Capability::ConfigTestable => 4,
        }
    }

    /// Name used in plugin manifests.
    pub fn manifest_name(self) -> &'static str {
        match self {
            Capability::Browsable => "browsable",
            Capability::PlaylistSync => "playlistSync",
            Capability::AccountFactory => "accountFactory",
            Capability::UrlLookup => "urlLookup",
            Capability::ConfigTestable => "configTestable",
        }
    }

    pub fn from_manifest_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.manifest_name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_name())
    }
}

const KNOWN_BITS: u32 = 0b1_1111;

/// Accumulated capabilities of one resolver.
///
/// Merging is additive: once a capability is present it is never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverCapabilities {
    known: BTreeSet<Capability>,
    /// Mask bits outside the known table, kept for forward compatibility.
    unrecognized_bits: u32,
    /// Manifest names that matched no known capability.
    unrecognized_names: BTreeSet<String>,
}

impl ResolverCapabilities {
    pub fn contains(&self, capability: Capability) -> bool {
        self.known.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.known.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.known.insert(capability);
    }

    pub fn unrecognized_bits(&self) -> u32 {
        self.unrecognized_bits
    }

    pub fn unrecognized_names(&self) -> impl Iterator<Item = &str> {
        self.unrecognized_names.iter().map(String::as_str)
    }

    /// OR another capability set into this one.
    pub fn merge(&mut self, other: &ResolverCapabilities) {
        self.known.extend(other.known.iter().copied());
        self.unrecognized_bits |= other.unrecognized_bits;
        self.unrecognized_names
            .extend(other.unrecognized_names.iter().cloned());
    }

    pub fn is_browsable(&self) -> bool {
        self.contains(Capability::Browsable)
    }

    pub fn has_playlist_sync(&self) -> bool {
        self.contains(Capability::PlaylistSync)
    }

    pub fn is_account_factory(&self) -> bool {
        self.contains(Capability::AccountFactory)
    }

    pub fn has_url_lookup(&self) -> bool {
        self.contains(Capability::UrlLookup)
    }

    pub fn is_config_testable(&self) -> bool {
        self.contains(Capability::ConfigTestable)
    }
}

/// Fixed table mapping capability sources to [`ResolverCapabilities`].
pub struct CapabilityRegistry;

impl CapabilityRegistry {
    /// Decode a runtime capability bitmask.
    pub fn decode(mask: u32) -> ResolverCapabilities {
        let known = Capability::ALL
            .into_iter()
            .filter(|cap| mask & (1 << cap.bit()) != 0)
            .collect();
        ResolverCapabilities {
            known,
            unrecognized_bits: mask & !KNOWN_BITS,
            unrecognized_names: BTreeSet::new(),
        }
    }

    /// Decode the static capability names listed in a plugin manifest.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> ResolverCapabilities {
        let mut caps = ResolverCapabilities::default();
        for name in names {
            match Capability::from_manifest_name(name) {
                Some(cap) => caps.insert(cap),
                None => {
                    caps.unrecognized_names.insert(name.to_string());
                }
            }
        }
        caps
    }
}
