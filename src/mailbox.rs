// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RX/TX buffer pairs.
//!
//! Every participant registers one TX and one RX page with the proxy. The pages are shared with
//! and pinned by the hypervisor while mapped so that the participant can't take them back while
//! the proxy copies descriptors in and out. The proxy itself owns the only pair the secure world
//! knows about, which it maps there on the first participant map and unmaps on the last unmap.

use crate::{
    platform::{SecureWorld, Stage2},
    proxy::CallError,
    transfer::Registry,
    Error, Interface, VmHandle, PAGE_SIZE,
};
use log::warn;

/// The proxy's own RX/TX pair, shared by all participants.
#[derive(Debug)]
pub struct HypMailbox {
    pub tx_pa: u64,
    pub rx_pa: u64,
    refcnt: u16,
}

impl HypMailbox {
    pub fn new(tx_pa: u64, rx_pa: u64) -> Self {
        Self {
            tx_pa,
            rx_pa,
            refcnt: 0,
        }
    }

    pub fn refcnt(&self) -> u16 {
        self.refcnt
    }

    /// Takes a reference to the pair, mapping it into the secure world on the first one.
    pub fn map<S: SecureWorld + ?Sized>(&mut self, sw: &S, page_cnt: u32) -> Result<(), Error> {
        if self.refcnt == u16::MAX {
            return Err(Error::Busy);
        }

        self.refcnt += 1;
        if self.refcnt > 1 {
            return Ok(());
        }

        let ret = sw.invoke(Interface::RxTxMap {
            tx_addr: self.tx_pa,
            rx_addr: self.rx_pa,
            page_cnt,
            is_32bit: false,
        });

        match ret {
            Interface::Success { .. } => Ok(()),
            Interface::Error { error_code, .. } => {
                self.refcnt -= 1;
                Err(error_code)
            }
            _ => {
                warn!("Unexpected response to RXTX_MAP: {:?}", ret);
                self.refcnt -= 1;
                Err(Error::Aborted)
            }
        }
    }

    /// Drops a reference to the pair, unmapping it from the secure world on the last one.
    pub fn unmap<S: SecureWorld + ?Sized>(&mut self, sw: &S) {
        let Some(refcnt) = self.refcnt.checked_sub(1) else {
            warn!("Unbalanced unmap of the hypervisor RX/TX buffers");
            return;
        };

        self.refcnt = refcnt;
        if refcnt != 0 {
            return;
        }

        let ret = sw.invoke(Interface::RxTxUnmap { id: 0 });
        if !ret.is_success() {
            warn!("Failed to unmap the hypervisor RX/TX buffers: {:?}", ret);
        }
    }
}

/// A participant's mapped RX/TX pair. `*_pa` are the addresses the hypervisor accesses the pages
/// through and `*_ipa` the addresses the participant registered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MailboxPair {
    pub tx_pa: u64,
    pub tx_ipa: u64,
    pub rx_pa: u64,
    pub rx_ipa: u64,
}

impl MailboxPair {
    /// Shares the host's pages with the hypervisor and pins them. Any failure is reported as
    /// invalid parameters after undoing what was done.
    pub fn map_host<S: Stage2 + ?Sized>(stage2: &S, tx: u64, rx: u64) -> Result<Self, Error> {
        let tx_pfn = tx / PAGE_SIZE as u64;
        let rx_pfn = rx / PAGE_SIZE as u64;

        stage2
            .host_share_hyp(tx_pfn)
            .map_err(|_| Error::InvalidParameters)?;

        if stage2.host_share_hyp(rx_pfn).is_err() {
            undo(stage2.host_unshare_hyp(tx_pfn));
            return Err(Error::InvalidParameters);
        }

        if stage2.host_pin_shared(tx).is_err() {
            undo(stage2.host_unshare_hyp(rx_pfn));
            undo(stage2.host_unshare_hyp(tx_pfn));
            return Err(Error::InvalidParameters);
        }

        if stage2.host_pin_shared(rx).is_err() {
            stage2.host_unpin_shared(tx);
            undo(stage2.host_unshare_hyp(rx_pfn));
            undo(stage2.host_unshare_hyp(tx_pfn));
            return Err(Error::InvalidParameters);
        }

        Ok(Self {
            tx_pa: tx,
            tx_ipa: tx,
            rx_pa: rx,
            rx_ipa: rx,
        })
    }

    /// Shares a guest's pages with the hypervisor and pins them. A page that isn't resident or a
    /// lack of page table memory suspends the call.
    pub fn map_guest<S: Stage2 + ?Sized>(
        stage2: &S,
        vm: VmHandle,
        tx_ipa: u64,
        rx_ipa: u64,
    ) -> Result<Self, CallError> {
        let tx_pa = stage2
            .guest_share_hyp(vm, tx_ipa)
            .map_err(|e| guest_map_error(e, tx_ipa))?;

        let rx_pa = match stage2.guest_share_hyp(vm, rx_ipa) {
            Ok(pa) => pa,
            Err(e) => {
                undo(stage2.guest_unshare_hyp(vm, tx_ipa));
                return Err(guest_map_error(e, rx_ipa));
            }
        };

        if let Err(e) = stage2.guest_pin_shared(vm, tx_ipa, tx_pa) {
            undo(stage2.guest_unshare_hyp(vm, rx_ipa));
            undo(stage2.guest_unshare_hyp(vm, tx_ipa));
            return Err(guest_map_error(e, tx_ipa));
        }

        if let Err(e) = stage2.guest_pin_shared(vm, rx_ipa, rx_pa) {
            stage2.guest_unpin_shared(vm, tx_pa);
            undo(stage2.guest_unshare_hyp(vm, rx_ipa));
            undo(stage2.guest_unshare_hyp(vm, tx_ipa));
            return Err(guest_map_error(e, rx_ipa));
        }

        Ok(Self {
            tx_pa,
            tx_ipa,
            rx_pa,
            rx_ipa,
        })
    }

    /// Unpins both pages and returns them to their owner.
    pub fn unmap<S: Stage2 + ?Sized>(&self, stage2: &S, vm: VmHandle) {
        if vm.is_host() {
            stage2.host_unpin_shared(self.tx_pa);
            undo(stage2.host_unshare_hyp(self.tx_pa / PAGE_SIZE as u64));
            stage2.host_unpin_shared(self.rx_pa);
            undo(stage2.host_unshare_hyp(self.rx_pa / PAGE_SIZE as u64));
        } else {
            stage2.guest_unpin_shared(vm, self.tx_pa);
            undo(stage2.guest_unshare_hyp(vm, self.tx_ipa));
            stage2.guest_unpin_shared(vm, self.rx_pa);
            undo(stage2.guest_unshare_hyp(vm, self.rx_ipa));
        }
    }
}

fn guest_map_error(e: crate::platform::Stage2Error, ipa: u64) -> CallError {
    match e.hyp_request(ipa) {
        Some(request) => CallError::Suspend(request),
        None => CallError::Ffa(Error::InvalidParameters),
    }
}

fn undo(result: Result<(), crate::platform::Stage2Error>) {
    if let Err(e) = result {
        warn!("Failed to undo a stage-2 transition: {}", e);
    }
}

/// Everything the proxy tracks for one participant.
#[derive(Debug, Default)]
pub struct EndpointBuffers {
    pub pair: Option<MailboxPair>,
    pub transfers: Registry,
}

impl EndpointBuffers {
    pub fn is_mapped(&self) -> bool {
        self.pair.is_some()
    }
}
