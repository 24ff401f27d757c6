//! C1: Fabric State — the realised assignment matrices plus the
//! declared-state vector.

use crate::config::FabricConfig;

/// Sentinel meaning "no spine assigned" — distinct from spine `0`.
pub const NO_SPINE: i32 = -1;
/// Sentinel meaning "port/trunk is free" — distinct from input `0`
/// only in that `0` *is* the free-input sentinel everywhere in this
/// engine; kept as a named constant for readability at call sites.
pub const FREE: u32 = 0;

#[derive(Debug, Clone)]
pub struct FabricState {
    config: FabricConfig,
    /// `s1[b * n + s]`: input owning ingress block `b`'s trunk to spine `s`.
    s1: Vec<u32>,
    /// `s2[s * n + e]`: input owning spine `s`'s trunk to egress block `e`.
    s2: Vec<u32>,
    /// `owner[p]`, 1-based, index 0 unused.
    owner: Vec<u32>,
    /// `spine[p]`, 1-based, index 0 unused.
    spine: Vec<i32>,
    /// Declared end-state, 1-based, index 0 unused.
    declared: Vec<u32>,
}

impl FabricState {
    pub fn new(config: FabricConfig) -> Self {
        let n = config.n();
        let max_ports = config.max_ports();
        Self {
            config,
            s1: vec![FREE; n * n],
            s2: vec![FREE; n * n],
            owner: vec![FREE; max_ports + 1],
            spine: vec![NO_SPINE; max_ports + 1],
            declared: vec![FREE; max_ports + 1],
        }
    }

    pub fn config(&self) -> FabricConfig {
        self.config
    }

    pub fn declared(&self) -> &[u32] {
        &self.declared
    }

    pub fn declared_at(&self, port: u32) -> u32 {
        self.declared[port as usize]
    }

    pub fn set_declared(&mut self, port: u32, owner: u32) {
        self.declared[port as usize] = owner;
    }

    pub fn owner_at(&self, port: u32) -> u32 {
        self.owner[port as usize]
    }

    pub fn spine_at(&self, port: u32) -> i32 {
        self.spine[port as usize]
    }

    pub fn s1_at(&self, block: usize, spine: usize) -> u32 {
        self.s1[block * self.config.n() + spine]
    }

    pub fn s2_at(&self, spine: usize, egress_block: usize) -> u32 {
        self.s2[spine * self.config.n() + egress_block]
    }

    /// Input identity's ingress block: `floor((i - 1) / N)`.
    pub fn input_block(&self, input_id: u32) -> usize {
        (input_id as usize - 1) / self.config.n()
    }

    /// Replaces the realised matrices wholesale. Always rebuild from
    /// scratch; never mutate the live fabric's matrices incrementally.
    pub fn replace_realised(
        &mut self,
        s1: Vec<u32>,
        s2: Vec<u32>,
        owner: Vec<u32>,
        spine: Vec<i32>,
    ) {
        self.s1 = s1;
        self.s2 = s2;
        self.owner = owner;
        self.spine = spine;
    }

    pub fn s1_matrix(&self) -> &[u32] {
        &self.s1
    }

    pub fn s2_matrix(&self) -> &[u32] {
        &self.s2
    }

    pub fn owner_vector(&self) -> &[u32] {
        &self.owner
    }

    pub fn spine_vector(&self) -> &[i32] {
        &self.spine
    }
}
