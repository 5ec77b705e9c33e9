// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Services the proxy needs from the hypervisor it runs in.
//!
//! Page ownership is tracked by the hypervisor's stage-2 page tables. The proxy only asks for
//! pages to be marked shared (with the hypervisor itself or with the secure world) and unshared
//! again; every primitive either applies completely or leaves the page untouched.

use crate::{DecodeError, Error, Interface, VmHandle};
use log::warn;

/// Failure of a stage-2 ownership transition.
#[derive(Clone, Copy, Debug, Eq, thiserror::Error, PartialEq)]
pub enum Stage2Error {
    /// The guest page isn't resident and must be faulted in by the host first.
    #[error("Page not resident")]
    Fault,
    /// The vCPU memcache is empty and must be topped up before page tables can be updated.
    #[error("Out of page table memory")]
    NoMemory,
    /// The caller doesn't own the page in a state that allows the transition.
    #[error("Ownership transition denied")]
    Denied,
}

impl Stage2Error {
    /// The request that lets a failed guest page transition succeed when replayed, if any.
    pub fn hyp_request(self, ipa: u64) -> Option<HypRequest> {
        match self {
            Self::Fault => Some(HypRequest::PageIn { ipa }),
            Self::NoMemory => Some(HypRequest::Memcache),
            Self::Denied => None,
        }
    }
}

/// Work the host must do before a suspended guest call is replayed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HypRequest {
    /// Donate pages to the hypervisor heap.
    Heap { nr_pages: u32 },
    /// Top up the vCPU memcache.
    Memcache,
    /// Fault in the guest page at `ipa`.
    PageIn { ipa: u64 },
}

/// Synchronous calls into the secure world.
pub trait SecureWorld {
    /// Issues an SMC with `args` in x0-x7 and returns x0-x7 on return.
    fn call(&self, args: [u64; 8]) -> [u64; 8];

    /// Issues `interface` and decodes the response. Responses that don't decode are reported as
    /// [`Error::Aborted`].
    fn invoke(&self, interface: Interface) -> Interface {
        let mut args = [0; 8];
        interface.copy_to_array(&mut args);

        let ret = self.call(args);
        Interface::try_from(ret).unwrap_or_else(|e: DecodeError| {
            warn!("Undecodable response {:#x?} to {:?}: {}", ret, interface.function_id(), e);
            Interface::error(Error::Aborted)
        })
    }
}

/// Stage-2 ownership primitives.
///
/// Host pages are named by PFN, guest pages by IPA. Sharing a guest page returns the PA backing
/// it so that the proxy can hand the PA to the secure world.
pub trait Stage2 {
    fn host_share_hyp(&self, pfn: u64) -> Result<(), Stage2Error>;
    fn host_unshare_hyp(&self, pfn: u64) -> Result<(), Stage2Error>;
    /// Prevents a host page shared with the hypervisor from being unshared by the host.
    fn host_pin_shared(&self, pa: u64) -> Result<(), Stage2Error>;
    fn host_unpin_shared(&self, pa: u64);
    fn host_share_ffa(&self, pfn: u64, nr_pages: u64) -> Result<(), Stage2Error>;
    fn host_unshare_ffa(&self, pfn: u64, nr_pages: u64) -> Result<(), Stage2Error>;

    fn guest_share_hyp(&self, vm: VmHandle, ipa: u64) -> Result<u64, Stage2Error>;
    fn guest_unshare_hyp(&self, vm: VmHandle, ipa: u64) -> Result<(), Stage2Error>;
    fn guest_pin_shared(&self, vm: VmHandle, ipa: u64, pa: u64) -> Result<(), Stage2Error>;
    fn guest_unpin_shared(&self, vm: VmHandle, pa: u64);
    fn guest_share_ffa(&self, vm: VmHandle, ipa: u64) -> Result<u64, Stage2Error>;
    fn guest_unshare_ffa(&self, vm: VmHandle, ipa: u64) -> Result<(), Stage2Error>;
}

/// Access to pages mapped in the hypervisor, i.e. the proxy's own buffers and the mailbox pages
/// participants have shared with it.
pub trait HypMemory {
    fn read(&self, pa: u64, dst: &mut [u8]);
    fn write(&self, pa: u64, src: &[u8]);
}

/// The hypervisor heap.
pub trait HypHeap {
    /// Makes sure `bytes` can be allocated, or returns the number of pages the host has to donate
    /// before the allocation can succeed.
    fn reserve(&self, bytes: usize) -> Result<(), u32>;
}

/// Everything the proxy needs from the hypervisor.
pub trait Platform: SecureWorld + Stage2 + HypMemory + HypHeap {}

impl<T: SecureWorld + Stage2 + HypMemory + HypHeap> Platform for T {}
