//! ELF header inspection.
//!
//! Both the toolchain probe and the verification stage need to decide whether
//! a binary was produced for the architecture (and, on 32-bit ARM, the float
//! ABI) a profile declares. Only the file header is read.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use goblin::elf::header::{ELFCLASS64, EI_CLASS, EM_AARCH64, EM_ARM, EM_X86_64};
use goblin::elf::Elf;

use crate::core::profile::{Architecture, FloatAbi};

/// `e_flags` bits set by EABI5 toolchains.
const EF_ARM_ABI_FLOAT_SOFT: u32 = 0x200;
const EF_ARM_ABI_FLOAT_HARD: u32 = 0x400;

/// Size of an ELF64 file header; ELF32 headers are shorter.
const HEADER_LEN: usize = 64;

/// The identifying fields of an ELF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfIdentity {
    pub machine: u16,
    pub is_64: bool,
    pub flags: u32,
}

impl ElfIdentity {
    /// Read the header of the ELF file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut buf = Vec::with_capacity(HEADER_LEN);
        file.by_ref()
            .take(HEADER_LEN as u64)
            .read_to_end(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(&buf).with_context(|| format!("{} is not an ELF file", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Elf::parse_header(bytes).map_err(|e| anyhow!("{}", e))?;
        Ok(ElfIdentity {
            machine: header.e_machine,
            is_64: header.e_ident[EI_CLASS] == ELFCLASS64,
            flags: header.e_flags,
        })
    }

    /// Float ABI recorded in the header, for 32-bit ARM binaries that record one.
    pub fn float_abi(&self) -> Option<FloatAbi> {
        if self.machine != EM_ARM {
            return None;
        }
        if self.flags & EF_ARM_ABI_FLOAT_HARD != 0 {
            Some(FloatAbi::Hard)
        } else if self.flags & EF_ARM_ABI_FLOAT_SOFT != 0 {
            Some(FloatAbi::Soft)
        } else {
            None
        }
    }

    /// Compare against what a profile declares. Returns a description of the
    /// first mismatch.
    pub fn check(&self, architecture: Architecture, float_abi: Option<FloatAbi>) -> Result<(), String> {
        if self.machine != architecture.elf_machine() || self.is_64 != architecture.is_64_bit() {
            return Err(format!(
                "binary is {} but target expects {}",
                self.describe(),
                architecture
            ));
        }

        if let Some(expected) = float_abi {
            match self.float_abi() {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    return Err(format!(
                        "binary uses the {}-float ABI but target expects {}-float",
                        actual, expected
                    ))
                }
                None => {
                    return Err(format!(
                        "binary records no float ABI but target expects {}-float",
                        expected
                    ))
                }
            }
        }

        Ok(())
    }

    fn describe(&self) -> String {
        let name = match self.machine {
            EM_ARM => "ARM",
            EM_AARCH64 => "AArch64",
            EM_X86_64 => "x86-64",
            _ => return format!("machine {:#x}", self.machine),
        };
        format!("{} ({}-bit)", name, if self.is_64 { 64 } else { 32 })
    }
}
