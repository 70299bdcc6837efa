//! Test fixtures: profiles, toolchains and minimal ELF headers.

use std::path::PathBuf;

use goblin::elf::header::{EM_AARCH64, EM_ARM, EM_X86_64};

use crate::builder::toolchain::ToolchainSpec;
use crate::core::profile::{Architecture, FloatAbi, ProfileRegistry, TargetProfile};

/// The built-in `pi-zero` profile (ARMv6, soft-float, parallelism 2).
pub fn pi_zero() -> TargetProfile {
    builtin("pi-zero")
}

/// The built-in `arm64` profile (AArch64, parallelism 4).
pub fn arm64() -> TargetProfile {
    builtin("arm64")
}

pub fn builtin(id: &str) -> TargetProfile {
    ProfileRegistry::builtin()
        .unwrap()
        .get(id)
        .unwrap_or_else(|| panic!("no built-in profile `{}`", id))
        .clone()
}

/// A toolchain spec that needs nothing installed; `echo` stands in for strip.
pub fn fake_toolchain(profile: &TargetProfile) -> ToolchainSpec {
    ToolchainSpec {
        target: profile.id.clone(),
        cc: PathBuf::from(&profile.compiler.c),
        cxx: PathBuf::from(&profile.compiler.cxx),
        strip: PathBuf::from("echo"),
        architecture: profile.architecture,
        float_abi: profile.float_abi,
        compile_flags: profile.compile_flags.clone(),
        link_flags: profile.link_flags.clone(),
    }
}

/// A little-endian ELF executable header with no program or section headers.
///
/// 52 bytes for 32-bit targets, 64 bytes for 64-bit ones.
pub fn fake_elf_header(arch: Architecture, float_abi: Option<FloatAbi>) -> Vec<u8> {
    let is_64 = arch.is_64_bit();
    let machine = match arch {
        Architecture::Armv6 | Architecture::Armv7 => EM_ARM,
        Architecture::Aarch64 => EM_AARCH64,
        Architecture::X86_64 => EM_X86_64,
    };
    let flags: u32 = if arch.is_arm32() {
        // EABI version 5
        let eabi = 0x0500_0000;
        match float_abi {
            Some(FloatAbi::Soft) => eabi | 0x200,
            Some(FloatAbi::Hard) => eabi | 0x400,
            None => eabi,
        }
    } else {
        0
    };

    let mut h = vec![0x7f, b'E', b'L', b'F', if is_64 { 2 } else { 1 }, 1, 1, 0];
    h.resize(16, 0);
    h.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    h.extend_from_slice(&machine.to_le_bytes());
    h.extend_from_slice(&1u32.to_le_bytes());
    if is_64 {
        h.extend_from_slice(&0x40_0000u64.to_le_bytes()); // entry
        h.extend_from_slice(&0u64.to_le_bytes()); // phoff
        h.extend_from_slice(&0u64.to_le_bytes()); // shoff
    } else {
        h.extend_from_slice(&0x1_0000u32.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
    }
    h.extend_from_slice(&flags.to_le_bytes());
    let ehsize: u16 = if is_64 { 64 } else { 52 };
    h.extend_from_slice(&ehsize.to_le_bytes());
    // phentsize, phnum, shentsize, shnum, shstrndx
    for _ in 0..5 {
        h.extend_from_slice(&0u16.to_le_bytes());
    }
    debug_assert_eq!(h.len(), ehsize as usize);
    h
}
