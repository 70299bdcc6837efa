//! Target profiles and the immutable registry that holds them.
//!
//! A profile is a static description of one hardware class: which cross
//! compiler pair to use, which flags, what architecture the resulting binary
//! must have, and how hard the build host may be pushed. Profiles come from
//! the embedded `profiles.toml` unless `Fleet.toml` declares its own
//! `[[profile]]` tables.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use goblin::elf::header::{EM_AARCH64, EM_ARM, EM_X86_64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUILTIN_PROFILES: &str = include_str!("profiles.toml");

/// Errors raised while loading or selecting profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid target id `{0}`: use lowercase letters, digits, `-` or `_`")]
    InvalidId(String),

    #[error("`{0}` is a reserved name and cannot be used as a target id")]
    ReservedId(String),

    #[error("target `{0}` is declared more than once")]
    DuplicateId(String),

    #[error("target `{0}` has parallelism 0; it must be at least 1")]
    ZeroParallelism(String),

    #[error("target `{target}` sets float_abi but {architecture} has no float ABI variants")]
    FloatAbiUnsupported {
        target: String,
        architecture: Architecture,
    },

    #[error("unknown target `{requested}`\navailable targets: {available}")]
    UnknownTarget {
        requested: String,
        available: String,
    },

    #[error("failed to parse profile table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Unique identifier of a target profile.
///
/// Ids are used verbatim as path components of the cache and work trees, so
/// construction rejects anything but `[a-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

/// Directory names inside the cache root that are not target namespaces.
pub const RESERVED_IDS: &[&str] = &["locks"];

impl TargetId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProfileError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if RESERVED_IDS.contains(&id.as_str()) {
            Err(ProfileError::ReservedId(id))
        } else if valid {
            Ok(TargetId(id))
        } else {
            Err(ProfileError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetId {
    type Error = ProfileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TargetId::new(value)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CPU architecture a profile produces code for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "armv6")]
    Armv6,
    #[serde(rename = "armv7")]
    Armv7,
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Armv6 => "armv6",
            Architecture::Armv7 => "armv7",
            Architecture::Aarch64 => "aarch64",
            Architecture::X86_64 => "x86_64",
        }
    }

    /// ELF `e_machine` value binaries for this architecture carry.
    pub fn elf_machine(&self) -> u16 {
        match self {
            Architecture::Armv6 | Architecture::Armv7 => EM_ARM,
            Architecture::Aarch64 => EM_AARCH64,
            Architecture::X86_64 => EM_X86_64,
        }
    }

    pub fn is_64_bit(&self) -> bool {
        matches!(self, Architecture::Aarch64 | Architecture::X86_64)
    }

    pub fn is_arm32(&self) -> bool {
        matches!(self, Architecture::Armv6 | Architecture::Armv7)
    }

    /// Value for `CMAKE_SYSTEM_PROCESSOR`.
    pub fn cmake_processor(&self) -> &'static str {
        match self {
            Architecture::Armv6 => "armv6l",
            Architecture::Armv7 => "armv7l",
            Architecture::Aarch64 => "aarch64",
            Architecture::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Floating-point calling convention of a 32-bit ARM target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatAbi {
    Soft,
    Hard,
}

impl FloatAbi {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloatAbi::Soft => "soft",
            FloatAbi::Hard => "hard",
        }
    }
}

impl fmt::Display for FloatAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected resource envelope of the device a target runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    Constrained,
    #[default]
    Balanced,
    Capable,
}

impl TargetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetClass::Constrained => "constrained",
            TargetClass::Balanced => "balanced",
            TargetClass::Capable => "capable",
        }
    }
}

/// C and C++ cross compiler names (or paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerPair {
    pub c: String,
    pub cxx: String,
}

/// Immutable description of one build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub id: TargetId,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub architecture: Architecture,
    #[serde(default)]
    pub float_abi: Option<FloatAbi>,
    #[serde(default)]
    pub class: TargetClass,
    pub compiler: CompilerPair,
    #[serde(default)]
    pub compile_flags: Vec<String>,
    #[serde(default)]
    pub link_flags: Vec<String>,
    /// Upper bound on concurrent compile jobs in the build step.
    pub parallelism: usize,
    /// Toolchain packages installed for this target only.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Per-target overrides of `[build.options]`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Root under which target libraries and headers are searched.
    #[serde(default)]
    pub find_root: Option<String>,
    /// Explicit strip tool; otherwise derived from the C compiler name.
    #[serde(default)]
    pub strip: Option<String>,
}

impl TargetProfile {
    fn validate(&self) -> Result<(), ProfileError> {
        if self.parallelism == 0 {
            return Err(ProfileError::ZeroParallelism(self.id.to_string()));
        }
        if self.float_abi.is_some() && !self.architecture.is_arm32() {
            return Err(ProfileError::FloatAbiUnsupported {
                target: self.id.to_string(),
                architecture: self.architecture,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ProfileTable {
    #[serde(default)]
    profile: Vec<TargetProfile>,
}

/// All known targets, in declaration order.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<TargetProfile>,
}

impl ProfileRegistry {
    /// Profiles shipped with fleet.
    pub fn builtin() -> Result<Self, ProfileError> {
        Self::from_toml(BUILTIN_PROFILES)
    }

    /// Parse a document of `[[profile]]` tables.
    pub fn from_toml(source: &str) -> Result<Self, ProfileError> {
        let table: ProfileTable = toml::from_str(source)?;
        Self::from_profiles(table.profile)
    }

    /// Build a registry, rejecting duplicate ids and invalid profiles.
    pub fn from_profiles(profiles: Vec<TargetProfile>) -> Result<Self, ProfileError> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            profile.validate()?;
            if !seen.insert(profile.id.clone()) {
                return Err(ProfileError::DuplicateId(profile.id.to_string()));
            }
        }
        Ok(ProfileRegistry { profiles })
    }

    pub fn get(&self, id: &str) -> Option<&TargetProfile> {
        self.profiles.iter().find(|p| p.id.as_str() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Select profiles by id; an empty filter selects all of them.
    ///
    /// Unknown ids are an error rather than a silent no-op.
    pub fn select(&self, filter: &[String]) -> Result<Vec<TargetProfile>, ProfileError> {
        if filter.is_empty() {
            return Ok(self.profiles.clone());
        }

        let mut selected = Vec::new();
        for requested in filter {
            let profile = self.get(requested).ok_or_else(|| ProfileError::UnknownTarget {
                requested: requested.clone(),
                available: self.ids().join(", "),
            })?;
            if !selected.iter().any(|p: &TargetProfile| p.id == profile.id) {
                selected.push(profile.clone());
            }
        }
        Ok(selected)
    }

    fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }
}
