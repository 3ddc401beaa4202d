//! Static path loss medium
//
// https://github.com/rust-iot/sic-mac
// Copyright 2021 Ryan Kurte

use std::collections::HashMap;

use crate::NodeId;

/// Default ambient noise in dBm
pub const DEFAULT_NOISE_DBM: f64 = -100.0;

/// Symmetric per-link path loss plus ambient noise
#[derive(Debug, Clone, PartialEq)]
pub struct Medium {
    links: HashMap<(NodeId, NodeId), f64>,
    noise_dbm: f64,
}

impl Default for Medium {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_DBM)
    }
}

impl Medium {
    pub fn new(noise_dbm: f64) -> Self {
        Self {
            links: HashMap::new(),
            noise_dbm,
        }
    }

    fn key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        (a.min(b), a.max(b))
    }

    /// Connect two nodes with the provided path loss in dB
    pub fn set_link(&mut self, a: NodeId, b: NodeId, loss_db: f64) {
        self.links.insert(Self::key(a, b), loss_db);
    }

    pub fn remove_link(&mut self, a: NodeId, b: NodeId) {
        self.links.remove(&Self::key(a, b));
    }

    /// Path loss between two nodes, `None` if they cannot hear each other
    pub fn loss(&self, a: NodeId, b: NodeId) -> Option<f64> {
        if a == b {
            return None;
        }
        self.links.get(&Self::key(a, b)).cloned()
    }

    pub fn noise_dbm(&self) -> f64 {
        self.noise_dbm
    }

    pub fn set_noise_dbm(&mut self, dbm: f64) {
        self.noise_dbm = dbm;
    }
}
