// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Simulated hypervisor and secure world for tests.
//!
//! Physical memory is a sparse map of zero-filled pages. Stage-2 state is tracked per page with
//! the same all-or-nothing semantics as the real primitives. The secure world keeps every
//! transaction it accepted so that tests can check what it was sent.

use crate::{
    ffa_v1_0, ffa_v1_1,
    memory_management::Handle,
    platform::{HypHeap, HypMemory, SecureWorld, Stage2, Stage2Error},
    Error, FuncId, Interface, Version, VmHandle, PAGE_SIZE,
};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::cell::RefCell;
use zerocopy::IntoBytes;

pub const HYP_TX_PA: u64 = 0xf000_0000;
pub const HYP_RX_PA: u64 = 0xf000_1000;

/// Handles allocated by the simulated secure world start here.
pub const FIRST_HANDLE: u64 = 0x1_0000_0001;

const PAGE: u64 = PAGE_SIZE as u64;

#[derive(Clone, Copy, Debug, Default)]
struct HostPage {
    hyp_shared: bool,
    ffa_shared: bool,
}

#[derive(Clone, Copy, Debug)]
struct GuestPage {
    pa: u64,
    hyp_shared: bool,
    ffa_shared: bool,
}

#[derive(Debug)]
struct Transaction {
    descriptor: Vec<u8>,
    total_len: usize,
}

#[derive(Debug)]
struct State {
    memory: BTreeMap<u64, Vec<u8>>,
    host_pages: BTreeMap<u64, HostPage>,
    denied_host_pages: BTreeSet<u64>,
    pinned: BTreeSet<u64>,
    guest_pages: BTreeMap<(u16, u64), GuestPage>,
    memcache_empty: bool,
    heap_shortfall: Option<u32>,

    calls: Vec<FuncId>,
    failures: Vec<(FuncId, Error)>,
    scripted: Vec<(FuncId, Interface)>,
    version: Option<Version>,
    hyp_id: u64,
    rxtx_min_size: u64,
    rxtx_mapped: bool,
    next_handle: u64,
    transactions: BTreeMap<u64, Transaction>,
    denied_reclaims: BTreeSet<u64>,
    retrieve_frag_size: usize,
    retrieving: Option<u64>,
    availability: Vec<(u16, u32, u64)>,
    direct_resp_status: BTreeMap<u16, Error>,
    partitions: Vec<u8>,
    partition_count: usize,
    partition_desc_size: usize,
}

pub struct MockPlatform {
    state: RefCell<State>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                memory: BTreeMap::new(),
                host_pages: BTreeMap::new(),
                denied_host_pages: BTreeSet::new(),
                pinned: BTreeSet::new(),
                guest_pages: BTreeMap::new(),
                memcache_empty: false,
                heap_shortfall: None,
                calls: Vec::new(),
                failures: Vec::new(),
                scripted: Vec::new(),
                version: Some(Version::V1_1),
                hyp_id: 0,
                rxtx_min_size: 0,
                rxtx_mapped: false,
                next_handle: FIRST_HANDLE,
                transactions: BTreeMap::new(),
                denied_reclaims: BTreeSet::new(),
                retrieve_frag_size: PAGE_SIZE,
                retrieving: None,
                availability: Vec::new(),
                direct_resp_status: BTreeMap::new(),
                partitions: Vec::new(),
                partition_count: 0,
                partition_desc_size: 0,
            }),
        }
    }

    /// Makes every stage-2 transition of the host page at `pa` fail.
    pub fn deny_host_page(&self, pa: u64) {
        self.state.borrow_mut().denied_host_pages.insert(pa);
    }

    pub fn host_ffa_shared_count(&self) -> usize {
        self.state
            .borrow()
            .host_pages
            .values()
            .filter(|p| p.ffa_shared)
            .count()
    }

    pub fn host_page_ffa_shared(&self, pa: u64) -> bool {
        self.host_page(pa).ffa_shared
    }

    pub fn host_page_hyp_shared(&self, pa: u64) -> bool {
        self.host_page(pa).hyp_shared
    }

    /// Whether the page at `pa` is pinned, for host and guest pages alike.
    pub fn host_page_pinned(&self, pa: u64) -> bool {
        self.state.borrow().pinned.contains(&pa)
    }

    fn host_page(&self, pa: u64) -> HostPage {
        self.state
            .borrow()
            .host_pages
            .get(&(pa / PAGE))
            .copied()
            .unwrap_or_default()
    }

    /// Makes the guest page at `ipa` resident, backed by `pa`.
    pub fn map_guest_page(&self, vm: VmHandle, ipa: u64, pa: u64) {
        self.state.borrow_mut().guest_pages.insert(
            (vm.0, ipa),
            GuestPage {
                pa,
                hyp_shared: false,
                ffa_shared: false,
            },
        );
    }

    pub fn guest_page_ffa_shared(&self, vm: VmHandle, ipa: u64) -> bool {
        self.guest_page(vm, ipa).is_some_and(|p| p.ffa_shared)
    }

    pub fn guest_page_hyp_shared(&self, vm: VmHandle, ipa: u64) -> bool {
        self.guest_page(vm, ipa).is_some_and(|p| p.hyp_shared)
    }

    pub fn guest_ffa_shared_count(&self, vm: VmHandle) -> usize {
        self.state
            .borrow()
            .guest_pages
            .iter()
            .filter(|((id, _), p)| *id == vm.0 && p.ffa_shared)
            .count()
    }

    fn guest_page(&self, vm: VmHandle, ipa: u64) -> Option<GuestPage> {
        self.state.borrow().guest_pages.get(&(vm.0, ipa)).copied()
    }

    pub fn set_memcache_empty(&self, empty: bool) {
        self.state.borrow_mut().memcache_empty = empty;
    }

    /// Makes the next heap reservation fail, asking for `nr_pages`.
    pub fn set_heap_shortfall(&self, nr_pages: u32) {
        self.state.borrow_mut().heap_shortfall = Some(nr_pages);
    }

    /// Number of calls the secure world received with function ID `fid`.
    pub fn calls_to(&self, fid: FuncId) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|&&f| f == fid)
            .count()
    }

    pub fn spmc_rxtx_mapped(&self) -> bool {
        self.state.borrow().rxtx_mapped
    }

    /// Makes the next call with function ID `fid` fail with `error`.
    pub fn fail_next(&self, fid: FuncId, error: Error) {
        self.state.borrow_mut().failures.push((fid, error));
    }

    /// Makes the next call with function ID `fid` return `response` instead of being handled.
    pub fn respond_next(&self, fid: FuncId, response: Interface) {
        self.state.borrow_mut().scripted.push((fid, response));
    }

    /// Sets the version the secure world reports, `None` for a secure world without FF-A.
    pub fn set_spmc_version(&self, version: Option<Version>) {
        self.state.borrow_mut().version = version;
    }

    pub fn set_hyp_id(&self, id: u64) {
        self.state.borrow_mut().hyp_id = id;
    }

    /// Sets the minimum RX/TX buffer size encoding returned by `FFA_FEATURES(FFA_RXTX_MAP)`.
    pub fn set_rxtx_min_size(&self, encoding: u64) {
        self.state.borrow_mut().rxtx_min_size = encoding;
    }

    pub fn set_retrieve_frag_size(&self, size: usize) {
        self.state.borrow_mut().retrieve_frag_size = size;
    }

    pub fn deny_reclaim(&self, handle: u64) {
        self.state.borrow_mut().denied_reclaims.insert(handle);
    }

    /// The descriptor of an accepted transaction, as the secure world received it.
    pub fn transaction(&self, handle: u64) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .transactions
            .get(&handle)
            .map(|t| t.descriptor.clone())
    }

    pub fn transaction_count(&self) -> usize {
        self.state.borrow().transactions.len()
    }

    /// Destination, flags and VM handle of every VM availability message sent.
    pub fn availability_messages(&self) -> Vec<(u16, u32, u64)> {
        self.state.borrow().availability.clone()
    }

    /// Makes partition `sp_id` respond to direct requests with `status`.
    pub fn set_direct_resp_status(&self, sp_id: u16, status: Error) {
        self.state.borrow_mut().direct_resp_status.insert(sp_id, status);
    }

    /// Sets the descriptors returned by `FFA_PARTITION_INFO_GET`.
    pub fn set_partitions(&self, descriptors: Vec<u8>, count: usize, desc_size: usize) {
        let mut state = self.state.borrow_mut();
        state.partitions = descriptors;
        state.partition_count = count;
        state.partition_desc_size = desc_size;
    }

    fn read_bytes(&self, pa: u64, dst: &mut [u8]) {
        let state = self.state.borrow();
        for (i, b) in dst.iter_mut().enumerate() {
            let addr = pa + i as u64;
            *b = state
                .memory
                .get(&(addr / PAGE))
                .map_or(0, |page| page[(addr % PAGE) as usize]);
        }
    }

    fn write_bytes(&self, pa: u64, src: &[u8]) {
        let mut state = self.state.borrow_mut();
        for (i, &b) in src.iter().enumerate() {
            let addr = pa + i as u64;
            state
                .memory
                .entry(addr / PAGE)
                .or_insert_with(|| alloc::vec![0; PAGE_SIZE])[(addr % PAGE) as usize] = b;
        }
    }

    fn read_vec(&self, pa: u64, len: usize) -> Vec<u8> {
        let mut buf = alloc::vec![0; len];
        self.read_bytes(pa, &mut buf);
        buf
    }

    fn handle_success(handle: u64) -> Interface {
        let [lo, hi]: [u32; 2] = Handle(handle).into();
        Interface::Success {
            target_info: 0,
            result_regs: [lo as u64, hi as u64, 0, 0, 0, 0],
            is_32bit: true,
        }
    }

    fn mem_xfer(&self, total_len: u32, frag_len: u32) -> Interface {
        if !self.spmc_rxtx_mapped() {
            return Interface::error(Error::Denied);
        }

        let descriptor = self.read_vec(HYP_TX_PA, frag_len as usize);
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.transactions.insert(
            handle,
            Transaction {
                descriptor,
                total_len: total_len as usize,
            },
        );

        if total_len == frag_len {
            Self::handle_success(handle)
        } else {
            Interface::MemFragRx {
                handle: Handle(handle),
                frag_offset: frag_len,
                endpoint_id: 0,
            }
        }
    }

    fn frag_tx(&self, handle: Handle, frag_len: u32) -> Interface {
        let fragment = self.read_vec(HYP_TX_PA, frag_len as usize);
        let mut state = self.state.borrow_mut();
        let Some(transaction) = state.transactions.get_mut(&handle.0) else {
            return Interface::error(Error::InvalidParameters);
        };

        transaction.descriptor.extend_from_slice(&fragment);
        let received = transaction.descriptor.len();

        if received > transaction.total_len {
            Interface::error(Error::InvalidParameters)
        } else if received == transaction.total_len {
            Self::handle_success(handle.0)
        } else {
            Interface::MemFragRx {
                handle,
                frag_offset: received as u32,
                endpoint_id: 0,
            }
        }
    }

    /// Copies the fragment of the transaction being retrieved at `offset` into the RX buffer.
    fn send_fragment(&self, handle: u64, offset: usize) -> Option<usize> {
        let fragment = {
            let state = self.state.borrow();
            let descriptor = &state.transactions.get(&handle)?.descriptor;
            let end = descriptor.len().min(offset + state.retrieve_frag_size);
            descriptor.get(offset..end)?.to_vec()
        };

        self.write_bytes(HYP_RX_PA, &fragment);
        Some(fragment.len())
    }

    fn retrieve_req(&self, len: u32) -> Interface {
        let req = self.read_vec(HYP_TX_PA, len as usize);
        let Some(handle) = req
            .get(8..16)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
        else {
            return Interface::error(Error::InvalidParameters);
        };

        let Some(total_len) = self
            .state
            .borrow()
            .transactions
            .get(&handle)
            .map(|t| t.descriptor.len())
        else {
            return Interface::error(Error::InvalidParameters);
        };

        let Some(frag_len) = self.send_fragment(handle, 0) else {
            return Interface::error(Error::InvalidParameters);
        };
        self.state.borrow_mut().retrieving = Some(handle);

        Interface::MemRetrieveResp {
            total_len: total_len as u32,
            frag_len: frag_len as u32,
        }
    }

    fn frag_rx(&self, handle: Handle, frag_offset: u32) -> Interface {
        if self.state.borrow().retrieving != Some(handle.0) {
            return Interface::error(Error::InvalidParameters);
        }

        match self.send_fragment(handle.0, frag_offset as usize) {
            Some(frag_len) => Interface::MemFragTx {
                handle,
                frag_len: frag_len as u32,
                endpoint_id: 0,
            },
            None => Interface::error(Error::InvalidParameters),
        }
    }

    fn reclaim(&self, handle: Handle) -> Interface {
        let mut state = self.state.borrow_mut();
        if state.denied_reclaims.contains(&handle.0) {
            return Interface::error(Error::Denied);
        }

        match state.transactions.remove(&handle.0) {
            Some(_) => Interface::success32_noargs(),
            None => Interface::error(Error::InvalidParameters),
        }
    }

    fn direct_req(&self, dst_id: u16, flags: u32, args: [u64; 5]) -> Interface {
        let mut state = self.state.borrow_mut();
        state.availability.push((dst_id, flags, args[2]));
        let status = state
            .direct_resp_status
            .get(&dst_id)
            .map_or(0, |&e| i32::from(e));

        Interface::MsgSendDirectResp {
            src_id: dst_id,
            dst_id: 0,
            flags: 0,
            args: [status as u32 as u64, 0, 0, 0, 0],
            is_32bit: true,
        }
    }

    fn partition_info_get(&self, flags: u32) -> Interface {
        let (descriptors, count, desc_size) = {
            let state = self.state.borrow();
            (
                state.partitions.clone(),
                state.partition_count,
                state.partition_desc_size,
            )
        };

        if flags & 0b1 == 0 {
            self.write_bytes(HYP_RX_PA, &descriptors);
        }

        Interface::Success {
            target_info: 0,
            result_regs: [count as u64, desc_size as u64, 0, 0, 0, 0],
            is_32bit: true,
        }
    }

    fn respond(&self, call: Interface) -> Interface {
        match call {
            Interface::IdGet => Interface::success32_prop(self.state.borrow().hyp_id as u32),
            Interface::Features { feat_id, .. } if feat_id == u32::from(FuncId::RxTxMap64) => {
                Interface::success32_prop(self.state.borrow().rxtx_min_size as u32)
            }
            Interface::Features { .. } => Interface::error(Error::NotSupported),
            Interface::RxTxMap { .. } => {
                let mut state = self.state.borrow_mut();
                if state.rxtx_mapped {
                    return Interface::error(Error::Denied);
                }
                state.rxtx_mapped = true;
                Interface::success32_noargs()
            }
            Interface::RxTxUnmap { .. } => {
                let mut state = self.state.borrow_mut();
                if !state.rxtx_mapped {
                    return Interface::error(Error::InvalidParameters);
                }
                state.rxtx_mapped = false;
                Interface::success32_noargs()
            }
            Interface::RxRelease { .. } => Interface::success32_noargs(),
            Interface::MemShare {
                total_len,
                frag_len,
                ..
            }
            | Interface::MemLend {
                total_len,
                frag_len,
                ..
            } => self.mem_xfer(total_len, frag_len),
            Interface::MemFragTx {
                handle, frag_len, ..
            } => self.frag_tx(handle, frag_len),
            Interface::MemRetrieveReq { total_len, .. } => self.retrieve_req(total_len),
            Interface::MemFragRx {
                handle,
                frag_offset,
                ..
            } => self.frag_rx(handle, frag_offset),
            Interface::MemReclaim { handle, .. } => self.reclaim(handle),
            Interface::MsgSendDirectReq {
                dst_id,
                flags,
                args,
                ..
            } => self.direct_req(dst_id, flags, args),
            Interface::PartitionInfoGet { flags, .. } => self.partition_info_get(flags),
            _ => Interface::error(Error::NotSupported),
        }
    }
}

impl SecureWorld for MockPlatform {
    fn call(&self, args: [u64; 8]) -> [u64; 8] {
        let mut ret = [0; 8];

        let call = match Interface::try_from(args) {
            Ok(call) => call,
            Err(_) => {
                Interface::error(Error::NotSupported).copy_to_array(&mut ret);
                return ret;
            }
        };

        let Some(fid) = call.function_id() else {
            Interface::error(Error::NotSupported).copy_to_array(&mut ret);
            return ret;
        };

        let (failure, scripted) = {
            let mut state = self.state.borrow_mut();
            state.calls.push(fid);
            let failure = state.failures.iter().position(|&(f, _)| f == fid);
            let failure = failure.map(|i| state.failures.remove(i).1);
            let scripted = state.scripted.iter().position(|&(f, _)| f == fid);
            (failure, scripted.map(|i| state.scripted.remove(i).1))
        };

        if let Interface::Version { .. } = call {
            let version = self.state.borrow().version;
            ret[0] = match (failure, version) {
                (None, Some(version)) => u32::from(version) as u64,
                _ => Version::NOT_SUPPORTED as u64,
            };
            return ret;
        }

        let response = match (failure, scripted) {
            (Some(error), _) => Interface::error(error),
            (None, Some(response)) => response,
            (None, None) => self.respond(call),
        };

        response.copy_to_array(&mut ret);
        ret
    }
}

impl Stage2 for MockPlatform {
    fn host_share_hyp(&self, pfn: u64) -> Result<(), Stage2Error> {
        let mut state = self.state.borrow_mut();
        if state.denied_host_pages.contains(&(pfn * PAGE)) {
            return Err(Stage2Error::Denied);
        }

        let page = state.host_pages.entry(pfn).or_default();
        if page.hyp_shared || page.ffa_shared {
            return Err(Stage2Error::Denied);
        }
        page.hyp_shared = true;
        Ok(())
    }

    fn host_unshare_hyp(&self, pfn: u64) -> Result<(), Stage2Error> {
        let mut state = self.state.borrow_mut();
        if state.pinned.contains(&(pfn * PAGE)) {
            return Err(Stage2Error::Denied);
        }

        match state.host_pages.get_mut(&pfn) {
            Some(page) if page.hyp_shared => {
                page.hyp_shared = false;
                Ok(())
            }
            _ => Err(Stage2Error::Denied),
        }
    }

    fn host_pin_shared(&self, pa: u64) -> Result<(), Stage2Error> {
        if !self.host_page(pa).hyp_shared {
            return Err(Stage2Error::Denied);
        }

        self.state.borrow_mut().pinned.insert(pa);
        Ok(())
    }

    fn host_unpin_shared(&self, pa: u64) {
        self.state.borrow_mut().pinned.remove(&pa);
    }

    fn host_share_ffa(&self, pfn: u64, nr_pages: u64) -> Result<(), Stage2Error> {
        let mut state = self.state.borrow_mut();
        let available = (pfn..pfn + nr_pages).all(|p| {
            let page = state.host_pages.get(&p).copied().unwrap_or_default();
            !state.denied_host_pages.contains(&(p * PAGE)) && !page.hyp_shared && !page.ffa_shared
        });

        if !available {
            return Err(Stage2Error::Denied);
        }

        for p in pfn..pfn + nr_pages {
            state.host_pages.entry(p).or_default().ffa_shared = true;
        }
        Ok(())
    }

    fn host_unshare_ffa(&self, pfn: u64, nr_pages: u64) -> Result<(), Stage2Error> {
        let mut state = self.state.borrow_mut();
        let shared = (pfn..pfn + nr_pages)
            .all(|p| state.host_pages.get(&p).is_some_and(|page| page.ffa_shared));

        if !shared {
            return Err(Stage2Error::Denied);
        }

        for p in pfn..pfn + nr_pages {
            state.host_pages.entry(p).or_default().ffa_shared = false;
        }
        Ok(())
    }

    fn guest_share_hyp(&self, vm: VmHandle, ipa: u64) -> Result<u64, Stage2Error> {
        let mut state = self.state.borrow_mut();
        if state.memcache_empty {
            return Err(Stage2Error::NoMemory);
        }

        let page = state
            .guest_pages
            .get_mut(&(vm.0, ipa))
            .ok_or(Stage2Error::Fault)?;
        if page.hyp_shared || page.ffa_shared {
            return Err(Stage2Error::Denied);
        }
        page.hyp_shared = true;
        Ok(page.pa)
    }

    fn guest_unshare_hyp(&self, vm: VmHandle, ipa: u64) -> Result<(), Stage2Error> {
        let mut state = self.state.borrow_mut();
        let page = state
            .guest_pages
            .get(&(vm.0, ipa))
            .copied()
            .ok_or(Stage2Error::Fault)?;
        if !page.hyp_shared || state.pinned.contains(&page.pa) {
            return Err(Stage2Error::Denied);
        }

        if let Some(page) = state.guest_pages.get_mut(&(vm.0, ipa)) {
            page.hyp_shared = false;
        }
        Ok(())
    }

    fn guest_pin_shared(&self, vm: VmHandle, ipa: u64, pa: u64) -> Result<(), Stage2Error> {
        match self.guest_page(vm, ipa) {
            Some(page) if page.hyp_shared && page.pa == pa => {
                self.state.borrow_mut().pinned.insert(pa);
                Ok(())
            }
            _ => Err(Stage2Error::Denied),
        }
    }

    fn guest_unpin_shared(&self, _vm: VmHandle, pa: u64) {
        self.state.borrow_mut().pinned.remove(&pa);
    }

    fn guest_share_ffa(&self, vm: VmHandle, ipa: u64) -> Result<u64, Stage2Error> {
        let mut state = self.state.borrow_mut();
        if state.memcache_empty {
            return Err(Stage2Error::NoMemory);
        }

        let page = state
            .guest_pages
            .get_mut(&(vm.0, ipa))
            .ok_or(Stage2Error::Fault)?;
        if page.hyp_shared || page.ffa_shared {
            return Err(Stage2Error::Denied);
        }
        page.ffa_shared = true;
        Ok(page.pa)
    }

    fn guest_unshare_ffa(&self, vm: VmHandle, ipa: u64) -> Result<(), Stage2Error> {
        match self.state.borrow_mut().guest_pages.get_mut(&(vm.0, ipa)) {
            Some(page) if page.ffa_shared => {
                page.ffa_shared = false;
                Ok(())
            }
            _ => Err(Stage2Error::Denied),
        }
    }
}

impl HypMemory for MockPlatform {
    fn read(&self, pa: u64, dst: &mut [u8]) {
        self.read_bytes(pa, dst);
    }

    fn write(&self, pa: u64, src: &[u8]) {
        self.write_bytes(pa, src);
    }
}

impl HypHeap for MockPlatform {
    fn reserve(&self, _bytes: usize) -> Result<(), u32> {
        match self.state.borrow_mut().heap_shortfall.take() {
            Some(nr_pages) => Err(nr_pages),
            None => Ok(()),
        }
    }
}

/// v1.0 partition info descriptors for `(partition ID, properties)` pairs.
pub fn partition_info_v1_0(partitions: &[(u16, u32)]) -> Vec<u8> {
    partitions
        .iter()
        .flat_map(|&(partition_id, partition_props)| {
            ffa_v1_0::partition_info_descriptor {
                partition_id,
                exec_ctx_count: 1,
                partition_props,
            }
            .as_bytes()
            .to_vec()
        })
        .collect()
}

/// v1.1 partition info descriptors for `(partition ID, properties)` pairs, each with a UUID
/// derived from its ID.
pub fn partition_info_v1_1(partitions: &[(u16, u32)]) -> Vec<u8> {
    partitions
        .iter()
        .flat_map(|&(partition_id, partition_props)| {
            let mut uuid = [0u8; 16];
            uuid[..2].copy_from_slice(&partition_id.to_le_bytes());
            uuid[15] = 0xff;

            ffa_v1_1::partition_info_descriptor {
                partition_id,
                exec_ctx_count_or_proxy_id: 1,
                partition_props,
                uuid,
            }
            .as_bytes()
            .to_vec()
        })
        .collect()
}
