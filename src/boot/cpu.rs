//! Processor features that shape the page tables.

use bitflags::bitflags;
use log_crate::debug;

use crate::consts::{Target, FOUR_GIG};
use crate::err::{BootError, Result};

bitflags! {
    #[derive(Default)]
    pub struct CpuFeatures: u32 {
        /// Large pages (PSE).
        const LARGE_PAGE = 1;
        const PAE = 1 << 1;
        /// Global pages (PGE).
        const GLOBAL = 1 << 2;
        const PAT = 1 << 3;
        const NX = 1 << 4;
        /// 64-bit long mode.
        const LONG_MODE = 1 << 5;
    }
}

/// A source of `cpuid` results.
pub trait Cpuid {
    /// Query `leaf`, returning `(eax, edx)` if the processor implements it.
    fn query(&mut self, leaf: u32) -> Option<(u32, u32)>;
}

/// The processor we're running on.
#[derive(Debug, Default)]
pub struct HostCpuid;

impl Cpuid for HostCpuid {
    fn query(&mut self, leaf: u32) -> Option<(u32, u32)> {
        crate::util::cpuid::cpuid(leaf)
    }
}

const LEAF_FEATURES: u32 = 1;
const LEAF_EXT_FEATURES: u32 = 0x8000_0001;

const EDX_PSE: u32 = 1 << 3;
const EDX_PAE: u32 = 1 << 6;
const EDX_PGE: u32 = 1 << 13;
const EDX_PAT: u32 = 1 << 16;
const EXT_EDX_NX: u32 = 1 << 20;
const EXT_EDX_LM: u32 = 1 << 29;

impl CpuFeatures {
    /// Everything bare metal paging cares about.
    pub fn probe<C: Cpuid>(cpu: &mut C) -> CpuFeatures {
        let mut f = CpuFeatures::empty();
        if let Some((_, edx)) = cpu.query(LEAF_FEATURES) {
            f.set(CpuFeatures::LARGE_PAGE, edx & EDX_PSE != 0);
            f.set(CpuFeatures::PAE, edx & EDX_PAE != 0);
            f.set(CpuFeatures::GLOBAL, edx & EDX_PGE != 0);
            f.set(CpuFeatures::PAT, edx & EDX_PAT != 0);
        }
        f |= Self::probe_extended(cpu);
        debug!("CPU features: {:?}", f);
        f
    }

    /// The extended leaf: NX and long mode.
    pub fn probe_extended<C: Cpuid>(cpu: &mut C) -> CpuFeatures {
        let mut f = CpuFeatures::empty();
        if let Some((_, edx)) = cpu.query(LEAF_EXT_FEATURES) {
            f.set(CpuFeatures::NX, edx & EXT_EDX_NX != 0);
            f.set(CpuFeatures::LONG_MODE, edx & EXT_EDX_LM != 0);
        }
        f
    }

    /// Fail if the target kernel can't run here.
    pub fn check(self, target: Target) -> Result<()> {
        if target.is_64bit() {
            if !self.contains(CpuFeatures::LONG_MODE) {
                return Err(BootError::MissingCpuFeature("64-bit long mode"));
            }
            if !self.contains(CpuFeatures::PAE) {
                return Err(BootError::MissingCpuFeature("PAE"));
            }
        }
        Ok(())
    }

    /// Decide whether a 32-bit kernel uses PAE. `force_off` comes from the
    /// command line. On bare metal (`max_mem` known), a machine with less
    /// than 4 GiB and no NX gains nothing from PAE. NX needs PAE.
    pub fn settle_pae(self, target: Target, force_off: bool, max_mem: Option<u64>) -> CpuFeatures {
        if target.is_64bit() {
            return self;
        }

        let mut f = self;
        if force_off {
            f.remove(CpuFeatures::PAE | CpuFeatures::NX | CpuFeatures::LONG_MODE);
        }
        if let Some(max_mem) = max_mem {
            if max_mem < FOUR_GIG && !f.contains(CpuFeatures::NX) {
                f.remove(CpuFeatures::PAE);
            }
        }
        if !f.contains(CpuFeatures::PAE) {
            f.remove(CpuFeatures::NX);
        }
        f
    }
}

#[cfg(test)]
pub mod test {
    use super::{CpuFeatures, Cpuid};
    use crate::consts::{Target, FOUR_GIG};
    use crate::err::BootError;

    /// Canned `cpuid` answers.
    pub struct FakeCpuid {
        pub basic_edx: u32,
        pub ext_edx: Option<u32>,
    }

    impl FakeCpuid {
        /// A modern processor.
        pub fn modern() -> FakeCpuid {
            FakeCpuid {
                basic_edx: (1 << 3) | (1 << 6) | (1 << 13) | (1 << 16),
                ext_edx: Some((1 << 20) | (1 << 29)),
            }
        }
    }

    impl Cpuid for FakeCpuid {
        fn query(&mut self, leaf: u32) -> Option<(u32, u32)> {
            match leaf {
                1 => Some((0, self.basic_edx)),
                0x8000_0001 => self.ext_edx.map(|edx| (0, edx)),
                _ => None,
            }
        }
    }

    #[test]
    fn probe() {
        let f = CpuFeatures::probe(&mut FakeCpuid::modern());
        assert_eq!(f, CpuFeatures::all());

        let old = CpuFeatures::probe(&mut FakeCpuid {
            basic_edx: 1 << 3,
            ext_edx: None,
        });
        assert_eq!(old, CpuFeatures::LARGE_PAGE);
    }

    #[test]
    fn amd64_needs_long_mode() {
        let f = CpuFeatures::PAE | CpuFeatures::LARGE_PAGE;
        assert_eq!(
            f.check(Target::Amd64),
            Err(BootError::MissingCpuFeature("64-bit long mode"))
        );
        assert_eq!(f.check(Target::I386), Ok(()));
    }

    #[test]
    fn pae_dropped_on_small_machines() {
        let f = CpuFeatures::PAE | CpuFeatures::LARGE_PAGE;
        assert_eq!(
            f.settle_pae(Target::I386, false, Some(FOUR_GIG - 1)),
            CpuFeatures::LARGE_PAGE
        );
        assert_eq!(f.settle_pae(Target::I386, false, Some(FOUR_GIG)), f);
        assert_eq!(f.settle_pae(Target::I386, false, None), f);

        let nx = f | CpuFeatures::NX;
        assert_eq!(nx.settle_pae(Target::I386, false, Some(0x1000_0000)), nx);
        assert_eq!(
            nx.settle_pae(Target::I386, true, Some(FOUR_GIG)),
            CpuFeatures::LARGE_PAGE
        );
        assert_eq!(nx.settle_pae(Target::Amd64, true, Some(0x1000_0000)), nx);
    }

    #[test]
    fn nx_needs_pae() {
        let f = CpuFeatures::NX | CpuFeatures::LARGE_PAGE;
        assert_eq!(f.settle_pae(Target::I386, false, None), CpuFeatures::LARGE_PAGE);
    }
}
