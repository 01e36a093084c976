// Resource claims and usage accounting
// Author: kelexine (https://github.com/kelexine)

use crate::config::QuotaProfile;

/// Resources one request asks to reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceClaim {
    /// Token bucket cost.
    pub tokens: u32,
    /// Estimated working memory.
    pub memory_bytes: u64,
    /// Abstract CPU weight.
    pub cpu_units: u64,
}

impl ResourceClaim {
    /// A claim that only costs tokens (plus one in-flight slot).
    pub fn tokens(cost: u32) -> Self {
        Self {
            tokens: cost,
            memory_bytes: 0,
            cpu_units: 0,
        }
    }
}

/// Which ceiling refused a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    InFlight,
    Memory,
    Cpu,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::InFlight => "in_flight",
            QuotaKind::Memory => "memory",
            QuotaKind::Cpu => "cpu",
        }
    }
}

/// Reserved resources, per owner or deployment-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub in_flight: u32,
    pub memory_bytes: u64,
    pub cpu_units: u64,
}

/// Ceilings applied to one [`Usage`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ceilings {
    pub in_flight: u32,
    pub memory_bytes: u64,
    pub cpu_units: u64,
}

impl Ceilings {
    pub fn per_owner(profile: &QuotaProfile) -> Self {
        Self {
            in_flight: profile.max_in_flight_per_owner,
            memory_bytes: profile.max_memory_bytes_per_owner,
            cpu_units: profile.max_cpu_units_per_owner,
        }
    }

    pub fn deployment(profile: &QuotaProfile) -> Self {
        Self {
            in_flight: profile.max_in_flight_total,
            memory_bytes: profile.max_memory_bytes_total,
            cpu_units: profile.max_cpu_units_total,
        }
    }
}

impl Usage {
    /// The first ceiling `claim` would break, if any.
    pub(crate) fn check(&self, claim: &ResourceClaim, ceilings: &Ceilings) -> Option<QuotaKind> {
        if self.in_flight.saturating_add(1) > ceilings.in_flight {
            return Some(QuotaKind::InFlight);
        }
        if self.memory_bytes.saturating_add(claim.memory_bytes) > ceilings.memory_bytes {
            return Some(QuotaKind::Memory);
        }
        if self.cpu_units.saturating_add(claim.cpu_units) > ceilings.cpu_units {
            return Some(QuotaKind::Cpu);
        }
        None
    }

    pub(crate) fn reserve(&mut self, claim: &ResourceClaim) {
        self.in_flight = self.in_flight.saturating_add(1);
        self.memory_bytes = self.memory_bytes.saturating_add(claim.memory_bytes);
        self.cpu_units = self.cpu_units.saturating_add(claim.cpu_units);
    }

    pub(crate) fn release(&mut self, claim: &ResourceClaim) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.memory_bytes = self.memory_bytes.saturating_sub(claim.memory_bytes);
        self.cpu_units = self.cpu_units.saturating_sub(claim.cpu_units);
    }

    pub fn is_idle(&self) -> bool {
        *self == Usage::default()
    }
}
