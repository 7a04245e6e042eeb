//! Ordered pool of known VPNs.
//!
//! Entries are never dropped by a discovery pass: a daemon that went away
//! stays in the pool with `running = false`, and one that is seen again
//! replaces its old slot.

use crate::openvpn::vpn::Vpn;

#[derive(Debug, Clone, Default)]
pub struct VpnPool {
    vpns: Vec<Vpn>,
}

impl VpnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached records, as of the last pass.
    pub fn all(&self) -> &[Vpn] {
        &self.vpns
    }

    pub fn len(&self) -> usize {
        self.vpns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vpns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vpn> {
        self.vpns.iter()
    }

    pub fn mark_all_not_running(&mut self) {
        for vpn in &mut self.vpns {
            vpn.set_not_running();
        }
    }

    /// Replace the slot holding the same invocation, or append. Returns the
    /// position used.
    pub fn add_or_replace(&mut self, vpn: Vpn) -> usize {
        match self.vpns.iter().position(|v| v.same_invocation(&vpn)) {
            Some(i) => {
                self.vpns[i] = vpn;
                i
            }
            None => {
                self.vpns.push(vpn);
                self.vpns.len() - 1
            }
        }
    }

    pub fn push(&mut self, vpn: Vpn) {
        self.vpns.push(vpn);
        self.renumber();
    }

    /// Set each record's 1-based `human_index` to its position.
    pub fn renumber(&mut self) {
        for (i, vpn) in self.vpns.iter_mut().enumerate() {
            vpn.human_index = i + 1;
        }
    }

    pub fn position_by_portable_id(&self, id: &str) -> Option<usize> {
        self.vpns.iter().position(|v| v.portable_id == id)
    }

    pub fn by_portable_id(&self, id: &str) -> Option<&Vpn> {
        self.vpns.iter().find(|v| v.portable_id == id)
    }

    /// 1-based lookup.
    pub fn by_human_index(&self, index: usize) -> Option<&Vpn> {
        index.checked_sub(1).and_then(|i| self.vpns.get(i))
    }

    pub fn get(&self, position: usize) -> Option<&Vpn> {
        self.vpns.get(position)
    }

    pub fn servers(&self) -> Vec<&Vpn> {
        self.vpns.iter().filter(|v| v.is_server()).collect()
    }
}
