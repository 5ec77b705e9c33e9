// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The FF-A proxy.
//!
//! Every FF-A call made by the host or a guest that involves memory management is handled here
//! instead of being forwarded as-is. Memory the caller wants to share or lend is first marked as
//! shared with the secure world in the caller's stage-2, then the (possibly rewritten) descriptor
//! is sent to the secure world from the proxy's own TX buffer. If the secure world refuses the
//! transfer the stage-2 changes are undone. On reclaim the proxy retrieves the descriptor from
//! the secure world to learn which pages to give back to the caller.
//!
//! All operations on RX/TX buffers and transfers are serialized by a single lock, held for the
//! whole operation so that failures can be rolled back.

use crate::{
    gateway,
    mailbox::{EndpointBuffers, HypMailbox, MailboxPair},
    memory_management::{
        min_transaction_size, CompositeMemRegion, ConstituentMemRegion,
        ConstituentMemRegionIterator, Handle, MemTransactionDesc,
    },
    partition_info::{AvailabilityListeners, PartitionInfoIterator, VmAvailability, V1_0_DESC_SIZE},
    platform::{HypRequest, Platform, SecureWorld},
    transfer::{Transfer, Translation},
    is_ffa_call, Error, FuncId, Interface, Version, VmHandle, FFA_PAGE_SIZE, MBOX_SIZE, PAGE_SIZE,
};
use alloc::vec::Vec;
use core::mem::size_of;
use log::{debug, info, warn};
use spin::Mutex;
use uuid::Uuid;

/// Memory donated to the proxy at boot.
#[derive(Debug)]
pub struct ProxyConfig {
    /// Number of participants, including the host.
    pub max_vms: usize,
    /// The proxy's TX buffer, mapped into the secure world on the first participant map.
    pub tx_pa: u64,
    /// The proxy's RX buffer.
    pub rx_pa: u64,
    /// Scratch buffer for descriptors. Must hold at least a mailbox worth of data and bounds the
    /// size of the descriptors that can be reclaimed.
    pub desc_buf: &'static mut [u8],
}

#[derive(Clone, Copy, Debug, Eq, thiserror::Error, PartialEq)]
pub enum InitError {
    #[error("FF-A not supported by the secure world")]
    NotSupported,
    #[error("Incompatible FF-A version {0}")]
    IncompatibleVersion(Version),
    #[error("Descriptor buffer of {0} bytes is smaller than a mailbox")]
    DescriptorBufferTooSmall(usize),
}

/// Outcome of a call that didn't produce a response from the secure world.
#[derive(Clone, Copy, Debug, Eq, thiserror::Error, PartialEq)]
pub enum CallError {
    #[error(transparent)]
    Ffa(#[from] Error),
    /// The call must be replayed once the host has serviced the request.
    #[error("Suspended on {0:?}")]
    Suspend(HypRequest),
}

impl From<crate::memory_management::Error> for CallError {
    fn from(value: crate::memory_management::Error) -> Self {
        Self::Ffa(value.into())
    }
}

/// What the hypervisor must do with a guest vCPU after a trapped SMC.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GuestExit {
    /// The response has been written to the vCPU registers.
    Handled,
    /// Forward the call to the secure world with `client_id` in x7 and return its response.
    Forward { client_id: u16 },
    /// Exit to the host to service the request, then replay the SMC.
    Suspend(HypRequest),
}

#[derive(Clone, Copy, Debug, Eq, thiserror::Error, PartialEq)]
pub enum TeardownError {
    #[error("VM destruction not acknowledged: {0}")]
    Notification(Error),
    /// A transfer couldn't be reclaimed yet, e.g. because the receiver still has access.
    #[error("Transfer {0:#x} not reclaimed, retry")]
    Retry(u64),
}

#[derive(Debug)]
struct VersionState {
    version: Version,
    negotiated: bool,
}

struct ProxyState {
    hyp: HypMailbox,
    desc_buf: &'static mut [u8],
    endpoints: Vec<EndpointBuffers>,
    listeners: AvailabilityListeners,
}

pub struct FfaProxy<P> {
    platform: P,
    state: Mutex<ProxyState>,
    version: Mutex<VersionState>,
}

/// Asks the secure world for `requested`. Returns `None` if it refuses.
fn query_version<S: SecureWorld + ?Sized>(sw: &S, requested: Version) -> Option<Version> {
    let mut args = [0; 8];
    Interface::Version {
        input_version: requested.into(),
    }
    .copy_to_array(&mut args);

    let ret = sw.call(args)[0] as u32;
    if (ret as i32) < 0 {
        None
    } else {
        Some(Version::from(ret))
    }
}

/// The 64-bit share or lend call for a descriptor already in the hypervisor's TX buffer.
fn xfer_call(fid: FuncId, total_len: u32, frag_len: u32) -> Interface {
    if fid == FuncId::MemLend64 {
        Interface::MemLend {
            total_len,
            frag_len,
            address: 0,
            page_cnt: 0,
            is_32bit: false,
        }
    } else {
        Interface::MemShare {
            total_len,
            frag_len,
            address: 0,
            page_cnt: 0,
            is_32bit: false,
        }
    }
}

/// Whether the secure world accepted the first fragment of a transfer.
fn xfer_accepted(ret: &Interface, total_len: u32, frag_len: u32) -> bool {
    if total_len != frag_len {
        matches!(ret, Interface::MemFragRx { frag_offset, .. } if *frag_offset == frag_len)
    } else {
        ret.is_success()
    }
}

/// The hypervisor pages making up each of `ranges`. Stops short of the end of a range that wraps
/// around; callers reject those with [`ConstituentMemRegionIterator::check_bounds`] first.
fn pages(ranges: impl Iterator<Item = ConstituentMemRegion>) -> impl Iterator<Item = u64> {
    ranges.flat_map(|range| {
        (0..range.page_cnt as u64)
            .map_while(move |i| range.address.checked_add(i * PAGE_SIZE as u64))
    })
}

fn heap_request(bytes: usize) -> CallError {
    CallError::Suspend(HypRequest::Heap {
        nr_pages: bytes.div_ceil(PAGE_SIZE) as u32,
    })
}

impl<P: Platform> FfaProxy<P> {
    /// Negotiates a version with the secure world. The proxy supports v1.0 and v1.1 and offers
    /// the newest version the secure world supports.
    pub fn new(platform: P, config: ProxyConfig) -> Result<Self, InitError> {
        if config.desc_buf.len() < MBOX_SIZE {
            return Err(InitError::DescriptorBufferTooSmall(config.desc_buf.len()));
        }

        let Some(remote) = query_version(&platform, Version::V1_1) else {
            info!("FF-A not supported by the secure world");
            return Err(InitError::NotSupported);
        };

        // v1.1 broke ABI compatibility with v1.0 on several structures, so a v1.x secure world
        // that can't speak v1.0 has to refuse rather than return its version.
        if remote.major() != 1 {
            return Err(InitError::IncompatibleVersion(remote));
        }

        let version = remote.min(Version::V1_1);
        info!("FF-A proxy: secure world at {}, using {}", remote, version);

        let endpoints = (0..config.max_vms)
            .map(|_| EndpointBuffers::default())
            .collect();

        Ok(Self {
            platform,
            state: Mutex::new(ProxyState {
                hyp: HypMailbox::new(config.tx_pa, config.rx_pa),
                desc_buf: config.desc_buf,
                endpoints,
                listeners: AvailabilityListeners::default(),
            }),
            version: Mutex::new(VersionState {
                version,
                negotiated: false,
            }),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The version descriptors are encoded with.
    pub fn negotiated_version(&self) -> Version {
        self.version.lock().version
    }

    pub fn has_version_negotiated(&self) -> bool {
        self.version.lock().negotiated
    }

    /// Handles `FFA_VERSION`. Returns the value for w0, which is either a version or
    /// `NOT_SUPPORTED`.
    pub fn ffa_version(&self, input_version: u32) -> u32 {
        let requested = Version::from(input_version);
        if requested.major() != 1 {
            return Version::NOT_SUPPORTED;
        }

        let mut state = self.version.lock();
        if state.negotiated {
            return state.version.into();
        }

        // A downgrade has to be accepted by the secure world as well
        if requested.minor() < state.version.minor() {
            if query_version(&self.platform, requested).is_none() {
                return Version::NOT_SUPPORTED;
            }

            state.version = requested;
        }

        if let Err(e) = self.post_init() {
            warn!("FF-A post-init checks failed: {}", e);
            return Version::NOT_SUPPORTED;
        }

        state.negotiated = true;
        info!("FF-A version {} negotiated", state.version);
        state.version.into()
    }

    /// Checks that the secure world can work with the proxy once a version is agreed.
    fn post_init(&self) -> Result<(), InitError> {
        match self.platform.invoke(Interface::IdGet) {
            Interface::Success { result_regs, .. } if result_regs[0] == VmHandle::HOST.0 as u64 => {}
            Interface::Success { result_regs, .. } => {
                warn!("Unexpected FF-A ID {:#x} for the hypervisor", result_regs[0]);
                return Err(InitError::NotSupported);
            }
            _ => return Err(InitError::NotSupported),
        }

        let ret = self.platform.invoke(Interface::Features {
            feat_id: FuncId::RxTxMap64.into(),
            input_properties: 0,
        });

        let Interface::Success { result_regs, .. } = ret else {
            return Err(InitError::NotSupported);
        };

        let min_rxtx_size = match result_regs[0] & 0b11 {
            0 => 4 * 1024,
            1 => 64 * 1024,
            2 => 16 * 1024,
            _ => return Err(InitError::NotSupported),
        };

        if min_rxtx_size > MBOX_SIZE {
            return Err(InitError::NotSupported);
        }

        Ok(())
    }

    /// Handles `FFA_FEATURES` for the calls the proxy has an opinion on. Returns `None` if the
    /// query should be answered by the secure world.
    pub fn features(&self, feat_id: u32) -> Option<Interface> {
        let fid = FuncId::try_from(feat_id).ok()?;

        if !fid.is_supported() {
            return Some(Interface::error(Error::NotSupported));
        }

        match fid {
            // No support for dynamically allocated buffers
            FuncId::MemShare32 | FuncId::MemShare64 | FuncId::MemLend32 | FuncId::MemLend64 => {
                Some(Interface::success32_prop(0))
            }
            _ => None,
        }
    }

    /// Registers the RX/TX pair of `vm`.
    pub fn rxtx_map(
        &self,
        vm: VmHandle,
        tx: u64,
        rx: u64,
        page_cnt: u32,
    ) -> Result<Interface, CallError> {
        if page_cnt as usize != MBOX_SIZE / FFA_PAGE_SIZE {
            return Err(Error::InvalidParameters.into());
        }

        if tx % PAGE_SIZE as u64 != 0 || rx % PAGE_SIZE as u64 != 0 {
            return Err(Error::InvalidParameters.into());
        }

        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            endpoints,
            listeners,
            ..
        } = &mut *guard;

        let endpoint = endpoints
            .get_mut(vm.index())
            .ok_or(Error::InvalidParameters)?;

        listeners.notify(&self.platform, vm, VmAvailability::Created)?;

        if endpoint.is_mapped() {
            return Err(Error::Denied.into());
        }

        // The proxy's buffers go to the secure world before the caller's are mapped here
        hyp.map(&self.platform, page_cnt)?;

        let pair = if vm.is_host() {
            MailboxPair::map_host(&self.platform, tx, rx).map_err(CallError::from)
        } else {
            MailboxPair::map_guest(&self.platform, vm, tx, rx)
        };

        match pair {
            Ok(pair) => {
                endpoint.pair = Some(pair);
                Ok(Interface::success32_noargs())
            }
            Err(e) => {
                hyp.unmap(&self.platform);
                Err(e)
            }
        }
    }

    /// Unregisters the RX/TX pair of `vm`.
    pub fn rxtx_unmap(&self, vm: VmHandle, id: u32) -> Result<Interface, CallError> {
        if id != VmHandle::HOST.0 as u32 {
            return Err(Error::InvalidParameters.into());
        }

        let mut guard = self.state.lock();
        let ProxyState { hyp, endpoints, .. } = &mut *guard;

        let pair = endpoints
            .get_mut(vm.index())
            .and_then(|endpoint| endpoint.pair.take())
            .ok_or(Error::InvalidParameters)?;

        pair.unmap(&self.platform, vm);
        hyp.unmap(&self.platform);

        Ok(Interface::success32_noargs())
    }

    /// Handles `FFA_MEM_SHARE` and `FFA_MEM_LEND`, reissued to the secure world as the 64-bit
    /// call `fid`. The response of the secure world is returned as-is.
    pub fn mem_xfer(
        &self,
        vm: VmHandle,
        fid: FuncId,
        total_len: u32,
        frag_len: u32,
        address: u64,
        page_cnt: u32,
    ) -> Result<Interface, CallError> {
        if address != 0 || page_cnt != 0 || frag_len > total_len || frag_len as usize > MBOX_SIZE
        {
            return Err(Error::InvalidParameters.into());
        }

        let version = self.negotiated_version();
        if (frag_len as usize) < min_transaction_size(version) {
            return Err(Error::InvalidParameters.into());
        }

        // Guests can't use the fragmentation API
        if !vm.is_host() && total_len != frag_len {
            return Err(Error::InvalidParameters.into());
        }

        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            desc_buf,
            endpoints,
            ..
        } = &mut *guard;

        let endpoint = endpoints
            .get_mut(vm.index())
            .ok_or(Error::InvalidParameters)?;
        let pair = endpoint.pair.ok_or(Error::InvalidParameters)?;

        let buf = &mut desc_buf[..MBOX_SIZE];
        let frag = frag_len as usize;
        self.platform.read(pair.tx_pa, &mut buf[..frag]);

        let desc = MemTransactionDesc::unpack(&buf[..frag], version)?;
        let mut composite = CompositeMemRegion::unpack(&buf[..frag], desc.composite_offset)?;
        let nr_ranges = composite.constituents_in_fragment(frag)?;
        let ranges =
            ConstituentMemRegionIterator::new(&buf[..frag], composite.constituents_offset(), nr_ranges)?;
        ranges.check_bounds()?;

        if vm.is_host() {
            gateway::share_ranges_checked(&self.platform, ranges.clone())?;

            self.platform.write(hyp.tx_pa, &buf[..frag]);
            let ret = self.platform.invoke(xfer_call(fid, total_len, frag_len));

            if !xfer_accepted(&ret, total_len, frag_len) {
                if let Err(e) = gateway::unshare_ranges_checked(&self.platform, ranges) {
                    warn!("Failed to roll back rejected transfer: {}", e);
                }
            }

            return Ok(ret);
        }

        ranges.check_page_count(composite.total_page_count)?;

        // Each page becomes its own constituent and the result has to fit in the TX buffer
        if composite.expanded_size() > MBOX_SIZE {
            return Err(Error::InvalidParameters.into());
        }

        let nr_pages = composite.total_page_count as usize;
        self.platform
            .reserve(nr_pages * size_of::<Translation>() + size_of::<Transfer>())
            .map_err(|nr_pages| CallError::Suspend(HypRequest::Heap { nr_pages }))?;
        let mut transfer = Transfer::with_capacity(nr_pages)
            .map_err(|_| heap_request(nr_pages * size_of::<Translation>()))?;
        endpoint
            .transfers
            .try_reserve()
            .map_err(|_| heap_request(size_of::<Transfer>()))?;

        for ipa in pages(ranges) {
            match self.platform.guest_share_ffa(vm, ipa) {
                Ok(pa) => transfer.translations.push(Translation { ipa, pa }),
                Err(e) => {
                    transfer.unshare_all(&self.platform, vm);
                    return Err(match e.hyp_request(ipa) {
                        Some(request) => CallError::Suspend(request),
                        None => Error::Denied.into(),
                    });
                }
            }
        }

        let translated = transfer.translations.iter().map(|t| ConstituentMemRegion {
            address: t.pa,
            page_cnt: 1,
        });
        let new_len = match composite.write_constituents(buf, translated) {
            Ok(len) => len as u32,
            Err(e) => {
                transfer.unshare_all(&self.platform, vm);
                return Err(e.into());
            }
        };

        self.platform.write(hyp.tx_pa, &buf[..new_len as usize]);
        let ret = self.platform.invoke(xfer_call(fid, new_len, new_len));

        if !xfer_accepted(&ret, new_len, new_len) {
            transfer.unshare_all(&self.platform, vm);
            return Ok(ret);
        }

        if let Interface::Success { result_regs, .. } = ret {
            transfer.handle = Handle::from([result_regs[0] as u32, result_regs[1] as u32]);
        }
        endpoint.transfers.insert(transfer);

        Ok(ret)
    }

    /// Retrieves the full descriptor of `handle` into the scratch buffer. Returns its length and
    /// composite offset, or the response to hand back to the caller.
    fn retrieve(
        &self,
        hyp: &HypMailbox,
        desc_buf: &mut [u8],
        handle: Handle,
        version: Version,
    ) -> Result<(usize, usize), Interface> {
        let req_len = MemTransactionDesc::pack_retrieve_req(handle, version, desc_buf)
            .map_err(|_| Interface::error(Error::Aborted))?;
        self.platform.write(hyp.tx_pa, &desc_buf[..req_len]);

        let ret = self.platform.invoke(Interface::MemRetrieveReq {
            total_len: req_len as u32,
            frag_len: req_len as u32,
            address: 0,
            page_cnt: 0,
            is_32bit: false,
        });

        let Interface::MemRetrieveResp {
            total_len,
            frag_len,
        } = ret
        else {
            return Err(ret);
        };

        let total = total_len as usize;
        let frag = frag_len as usize;

        if frag == 0 || frag > MBOX_SIZE || frag > total {
            warn!("Bogus retrieve response for {:#x}: {:?}", handle.0, ret);
            self.rx_release();
            return Err(Interface::error(Error::Aborted));
        }

        if total > desc_buf.len() {
            self.rx_release();
            return Err(Interface::error(Error::NoMemory));
        }

        self.platform.read(hyp.rx_pa, &mut desc_buf[..frag]);
        self.rx_release();

        let mut frag_off = frag;
        while frag_off < total {
            let ret = self.platform.invoke(Interface::MemFragRx {
                handle,
                frag_offset: frag_off as u32,
                endpoint_id: VmHandle::HOST.0,
            });

            let Interface::MemFragTx { frag_len, .. } = ret else {
                return Err(Interface::error(Error::InvalidParameters));
            };

            let frag = frag_len as usize;
            if frag == 0 || frag > MBOX_SIZE || frag > total - frag_off {
                warn!("Bogus fragment of {:#x} at {:#x}: {:?}", handle.0, frag_off, ret);
                self.rx_release();
                return Err(Interface::error(Error::Aborted));
            }

            self.platform
                .read(hyp.rx_pa, &mut desc_buf[frag_off..frag_off + frag]);
            self.rx_release();
            frag_off += frag;
        }

        match MemTransactionDesc::unpack(&desc_buf[..total], version) {
            Ok(desc) => Ok((total, desc.composite_offset)),
            Err(e) => {
                warn!("Malformed retrieve response for {:#x}: {}", handle.0, e);
                Err(Interface::error(Error::Aborted))
            }
        }
    }

    fn rx_release(&self) {
        let ret = self.platform.invoke(Interface::RxRelease { vm_id: 0 });
        if !ret.is_success() {
            warn!("Failed to release the hypervisor RX buffer: {:?}", ret);
        }
    }

    /// Handles `FFA_MEM_RECLAIM`.
    pub fn mem_reclaim(
        &self,
        vm: VmHandle,
        handle: Handle,
        flags: u32,
    ) -> Result<Interface, CallError> {
        let version = self.negotiated_version();

        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            desc_buf,
            endpoints,
            ..
        } = &mut *guard;

        let owner = if vm.is_host() {
            let owner = endpoints
                .iter()
                .position(|e| e.transfers.contains(handle))
                .map(|i| VmHandle(i as u16));

            // The host must not be able to reclaim memory a guest shared
            if let Some(owner) = owner {
                warn!("Host reclaiming transfer {:#x} owned by {:?}", handle.0, owner);
            }
            owner
        } else {
            let endpoint = endpoints.get(vm.index()).ok_or(Error::InvalidParameters)?;
            if !endpoint.transfers.contains(handle) {
                return Err(Error::InvalidParameters.into());
            }
            Some(vm)
        };

        let (total, composite_offset) = match self.retrieve(hyp, desc_buf, handle, version) {
            Ok(ret) => ret,
            Err(response) => return Ok(response),
        };

        let buf = &desc_buf[..total];
        let ranges = match CompositeMemRegion::unpack(buf, composite_offset)
            .and_then(|composite| composite.constituents(buf))
            .and_then(|ranges| ranges.check_bounds().map(|()| ranges))
        {
            Ok(ranges) => ranges,
            Err(e) => {
                warn!("Malformed descriptor for {:#x}: {}", handle.0, e);
                return Ok(Interface::error(Error::Aborted));
            }
        };

        let ret = self.platform.invoke(Interface::MemReclaim { handle, flags });
        if !ret.is_success() {
            return Ok(ret);
        }

        // The secure world gave the memory back, so the caller must get it back too
        match owner {
            Some(owner) => {
                if let Some(mut transfer) = endpoints[owner.index()].transfers.remove(handle) {
                    transfer.unshare_pages(&self.platform, owner, pages(ranges));
                    if !transfer.translations.is_empty() {
                        warn!(
                            "{} pages of {:#x} not reported by the secure world",
                            transfer.translations.len(),
                            handle.0
                        );
                        transfer.unshare_all(&self.platform, owner);
                    }
                }
            }
            None => {
                if let Err(e) = gateway::unshare_ranges_checked(&self.platform, ranges) {
                    warn!("Failed to unshare reclaimed transfer {:#x}: {}", handle.0, e);
                }
            }
        }

        Ok(ret)
    }

    /// Handles `FFA_MEM_FRAG_TX` from the host, carrying more constituents of a transfer.
    pub fn mem_frag_tx(
        &self,
        vm: VmHandle,
        handle: Handle,
        frag_len: u32,
        endpoint_id: u16,
    ) -> Result<Interface, CallError> {
        if !vm.is_host() {
            return Err(Error::InvalidParameters.into());
        }

        let frag = frag_len as usize;
        if frag > MBOX_SIZE || frag % ConstituentMemRegion::SIZE != 0 {
            return Err(Error::InvalidParameters.into());
        }

        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            desc_buf,
            endpoints,
            ..
        } = &mut *guard;

        let pair = endpoints
            .get(vm.index())
            .and_then(|endpoint| endpoint.pair)
            .ok_or(Error::InvalidParameters)?;

        let buf = &mut desc_buf[..frag];
        self.platform.read(pair.tx_pa, buf);
        let ranges = ConstituentMemRegionIterator::from_fragment(buf)?;
        ranges.check_bounds()?;

        if gateway::share_ranges_checked(&self.platform, ranges.clone()).is_err() {
            // Abort the whole transaction. Pages of earlier fragments stay shared as their
            // constituents are gone.
            let ret = self.platform.invoke(Interface::MemReclaim { handle, flags: 0 });
            if !ret.is_success() {
                warn!("Failed to abort transfer {:#x}: {:?}", handle.0, ret);
            }
            return Ok(ret);
        }

        self.platform.write(hyp.tx_pa, buf);
        let ret = self.platform.invoke(Interface::MemFragTx {
            handle,
            frag_len,
            endpoint_id,
        });

        if !matches!(ret, Interface::Success { .. } | Interface::MemFragRx { .. }) {
            if let Err(e) = gateway::unshare_ranges_checked(&self.platform, ranges) {
                warn!("Failed to roll back rejected fragment: {}", e);
            }
        }

        Ok(ret)
    }

    /// Handles `FFA_PARTITION_INFO_GET`, copying the descriptors into the caller's RX buffer.
    pub fn partition_info_get(
        &self,
        vm: VmHandle,
        uuid: Uuid,
        flags: u32,
    ) -> Result<Interface, CallError> {
        let version = self.negotiated_version();

        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            desc_buf,
            endpoints,
            listeners,
        } = &mut *guard;

        let endpoint = endpoints.get(vm.index()).ok_or(Error::InvalidParameters)?;
        let pair = endpoint.pair.ok_or(Error::Busy)?;

        let ret = self
            .platform
            .invoke(Interface::PartitionInfoGet { uuid, flags });

        let Interface::Success { result_regs, .. } = ret else {
            return Ok(ret);
        };

        let count = result_regs[0] as usize;
        if count == 0 {
            return Ok(ret);
        }

        let desc_size = if version >= Version::V1_1 {
            // Only the count was requested
            if flags & 0b1 != 0 {
                return Ok(ret);
            }
            result_regs[1] as usize
        } else {
            V1_0_DESC_SIZE
        };

        let copy_size = match count.checked_mul(desc_size) {
            Some(size) if size <= MBOX_SIZE => size,
            _ => return Ok(Interface::error(Error::Aborted)),
        };

        let buf = &mut desc_buf[..copy_size];
        self.platform.read(hyp.rx_pa, buf);
        self.platform.write(pair.rx_pa, buf);

        if listeners.is_empty() {
            match PartitionInfoIterator::new(version, buf, count, desc_size) {
                Ok(partitions) => listeners.register(partitions),
                Err(e) => warn!("Can't parse partition info: {}", e),
            }
        }

        Ok(ret)
    }

    /// Reclaims everything `vm` shared with the secure world and unmaps its RX/TX pair, before
    /// the VM is destroyed.
    pub fn reclaim_guest_pages(&self, vm: VmHandle) -> Result<(), TeardownError> {
        let mut guard = self.state.lock();
        let ProxyState {
            hyp,
            endpoints,
            listeners,
            ..
        } = &mut *guard;

        let Some(endpoint) = endpoints.get_mut(vm.index()) else {
            warn!("Teardown of unknown {:?}", vm);
            return Ok(());
        };

        if !endpoint.is_mapped() {
            return Ok(());
        }

        listeners
            .notify(&self.platform, vm, VmAvailability::Destroyed)
            .map_err(TeardownError::Notification)?;

        if !endpoint.transfers.is_empty() {
            debug!("{:?}: reclaiming {} transfers", vm, endpoint.transfers.len());
        }

        while let Some(handle) = endpoint.transfers.last_handle() {
            let ret = self
                .platform
                .invoke(Interface::MemReclaim { handle, flags: 0 });
            if !ret.is_success() {
                warn!("{:?}: reclaim of {:#x} failed: {:?}", vm, handle.0, ret);
                return Err(TeardownError::Retry(handle.0));
            }

            if let Some(mut transfer) = endpoint.transfers.remove(handle) {
                transfer.unshare_all(&self.platform, vm);
            }
        }

        if let Some(pair) = endpoint.pair.take() {
            pair.unmap(&self.platform, vm);
            hyp.unmap(&self.platform);
        }

        Ok(())
    }

    /// Runs the handler of a memory management or discovery call made by `vm`. Returns `None`
    /// for calls the proxy doesn't handle.
    fn dispatch(&self, vm: VmHandle, call: Interface) -> Option<Result<Interface, CallError>> {
        let ret = match call {
            Interface::Features { feat_id, .. } => return self.features(feat_id).map(Ok),
            Interface::Version { input_version } => Ok(Interface::VersionOut {
                output_version: self.ffa_version(input_version),
            }),
            Interface::RxTxMap {
                tx_addr,
                rx_addr,
                page_cnt,
                is_32bit: false,
            } => self.rxtx_map(vm, tx_addr, rx_addr, page_cnt),
            Interface::RxTxUnmap { id } => self.rxtx_unmap(vm, id),
            Interface::MemShare {
                total_len,
                frag_len,
                address,
                page_cnt,
                ..
            } => self.mem_xfer(vm, FuncId::MemShare64, total_len, frag_len, address, page_cnt),
            Interface::MemLend {
                total_len,
                frag_len,
                address,
                page_cnt,
                ..
            } => self.mem_xfer(vm, FuncId::MemLend64, total_len, frag_len, address, page_cnt),
            Interface::MemReclaim { handle, flags } => self.mem_reclaim(vm, handle, flags),
            Interface::MemFragTx {
                handle,
                frag_len,
                endpoint_id,
            } => self.mem_frag_tx(vm, handle, frag_len, endpoint_id),
            Interface::PartitionInfoGet { uuid, flags } => self.partition_info_get(vm, uuid, flags),
            Interface::IdGet if !vm.is_host() => Ok(Interface::success32_prop(vm.0 as u32)),
            _ => {
                let fid = call.function_id()?;
                if fid.is_supported() {
                    return None;
                }
                Ok(Interface::error(Error::NotSupported))
            }
        };

        Some(ret)
    }

    /// Handles an SMC trapped from the host. Returns false if the call must be forwarded to the
    /// secure world unmodified, otherwise the response is in x0-x3.
    pub fn handle_host_call(&self, regs: &mut [u64; 8]) -> bool {
        let func_id = regs[0];

        // Non-FF-A calls like vendor power management SMCs are trusted to not give access to
        // arbitrary memory
        if !is_ffa_call(func_id) {
            return false;
        }

        let args = [regs[1], regs[2], regs[3], regs[4]];

        if !self.has_version_negotiated() && func_id != u32::from(FuncId::Version) as u64 {
            set_response(regs, &Interface::error(Error::InvalidParameters));
            debug!("FF-A host call {:#x} {:#x?} before version negotiation", func_id, args);
            return true;
        }

        let ret = Interface::try_from(*regs)
            .ok()
            .and_then(|call| self.dispatch(VmHandle::HOST, call));

        let Some(ret) = ret else {
            debug!("FF-A host call {:#x} {:#x?} forwarded", func_id, args);
            return false;
        };

        let response = match ret {
            Ok(response) => response,
            Err(CallError::Ffa(e)) => Interface::error(e),
            Err(CallError::Suspend(request)) => {
                warn!("Host call {:#x} can't be suspended on {:?}", func_id, request);
                Interface::error(Error::Aborted)
            }
        };

        set_response(regs, &response);
        debug!(
            "FF-A host call {:#x} {:#x?} handled: {:?}",
            func_id, args, response
        );

        true
    }

    /// Handles an SMC trapped from guest `vm`.
    pub fn handle_guest_call(&self, vm: VmHandle, regs: &mut [u64; 8]) -> GuestExit {
        if vm.is_host() || vm.index() >= self.state.lock().endpoints.len() {
            warn!("FF-A call from unknown {:?}", vm);
            set_response(regs, &Interface::error(Error::InvalidParameters));
            return GuestExit::Handled;
        }

        let ret = if is_ffa_call(regs[0]) {
            Interface::try_from(*regs)
                .ok()
                .and_then(|call| self.dispatch(vm, call))
        } else {
            None
        };

        match ret {
            None => {
                regs[7] = vm.0 as u64;
                GuestExit::Forward { client_id: vm.0 }
            }
            Some(Err(CallError::Suspend(request))) => GuestExit::Suspend(request),
            Some(Err(CallError::Ffa(e))) => {
                set_response(regs, &Interface::error(e));
                GuestExit::Handled
            }
            Some(Ok(response)) => {
                set_response(regs, &response);
                GuestExit::Handled
            }
        }
    }
}

/// Writes `response` to x0-x3, leaving x4-x7 untouched.
fn set_response(regs: &mut [u64; 8], response: &Interface) {
    let mut ret = [0; 8];
    response.copy_to_array(&mut ret);
    regs[..4].copy_from_slice(&ret[..4]);
}
