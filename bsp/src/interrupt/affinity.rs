use alloc::vec::Vec;
use smallvec::SmallVec;

use super::{IrqError, Result};
use crate::drivers::irq::SgiTarget;

#[inline]
pub const fn aff0(mpidr: u64) -> u8 {
    mpidr as u8
}

#[inline]
pub const fn aff1(mpidr: u64) -> u8 {
    (mpidr >> 8) as u8
}

#[inline]
pub const fn aff2(mpidr: u64) -> u8 {
    (mpidr >> 16) as u8
}

#[inline]
pub const fn aff3(mpidr: u64) -> u8 {
    (mpidr >> 32) as u8
}

/// One SGI per cluster covers most boards.
pub type SgiTargets = SmallVec<[SgiTarget; 4]>;

/// Logical core ids and their MPIDR affinities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    affinities: Vec<u64>,
}

impl CpuTopology {
    pub fn new(affinities: &[u64]) -> Self {
        CpuTopology {
            affinities: affinities.to_vec(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.affinities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.affinities.is_empty()
    }

    #[inline]
    pub fn affinity(&self, cpu: usize) -> Option<u64> {
        self.affinities.get(cpu).copied()
    }

    pub fn cpu_of(&self, affinity: u64) -> Option<usize> {
        self.affinities.iter().position(|&a| a == affinity)
    }

    /// Split `mask` (bit n = logical core n) into one SGI target per
    /// cluster.
    pub fn sgi_targets(&self, mask: u64) -> Result<SgiTargets> {
        let mut targets = SgiTargets::new();
        for cpu in (0..64).filter(|n| mask & (1u64 << n) != 0) {
            let mpidr = self.affinity(cpu).ok_or(IrqError::CpuNotPresent(cpu))?;
            // the target list only reaches aff0 0..=15
            if aff0(mpidr) >= 16 {
                return Err(IrqError::CpuNotPresent(cpu));
            }
            let bit = 1u16 << aff0(mpidr);
            let cluster = (aff3(mpidr), aff2(mpidr), aff1(mpidr));
            let existing = targets.iter_mut().find_map(|t| match t {
                SgiTarget::Cluster {
                    aff3,
                    aff2,
                    aff1,
                    target_list,
                } if (*aff3, *aff2, *aff1) == cluster => Some(target_list),
                _ => None,
            });
            match existing {
                Some(list) => *list |= bit,
                None => targets.push(SgiTarget::Cluster {
                    aff3: cluster.0,
                    aff2: cluster.1,
                    aff1: cluster.2,
                    target_list: bit,
                }),
            }
        }
        Ok(targets)
    }
}
