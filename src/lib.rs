// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FF-A memory sharing proxy.
//!
//! Sits between the normal world (the host and its guest VMs) and the secure world memory
//! manager, and filters every FF-A memory management call so that a caller can only make pages
//! it owns visible to the secure world. Each accepted transfer is reflected in the caller's
//! stage-2 page tables before it is forwarded, and rolled back if the secure world refuses it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt::{self, Debug, Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use uuid::Uuid;

mod ffa_v1_0;
mod ffa_v1_1;
pub mod gateway;
pub mod mailbox;
pub mod memory_management;
pub mod partition_info;
pub mod platform;
pub mod proxy;
pub mod transfer;

#[cfg(test)]
mod mock;

pub use proxy::{CallError, FfaProxy, GuestExit, InitError, ProxyConfig, TeardownError};

/// Size of the pages described by FF-A memory region descriptors.
pub const FFA_PAGE_SIZE: usize = 4096;

/// Translation granule of the hypervisor's stage-2 page tables.
pub const PAGE_SIZE: usize = 4096;

/// Number of hypervisor pages backing each RX or TX buffer.
pub const MBOX_NR_PAGES: usize = 1;

/// Capacity of one RX or TX buffer in bytes.
pub const MBOX_SIZE: usize = MBOX_NR_PAGES * PAGE_SIZE;

/// FF-A v1.1, Table 12.2: Error status codes
#[derive(Clone, Copy, Debug, Eq, Error, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum Error {
    #[error("Not supported")]
    NotSupported = -1,
    #[error("Invalid parameters")]
    InvalidParameters = -2,
    #[error("No memory")]
    NoMemory = -3,
    #[error("Busy")]
    Busy = -4,
    #[error("Interrupted")]
    Interrupted = -5,
    #[error("Denied")]
    Denied = -6,
    #[error("Retry")]
    Retry = -7,
    #[error("Aborted")]
    Aborted = -8,
    #[error("No data")]
    NoData = -9,
}

/// An integer couldn't be converted to a [`FuncId`] because it is not a recognised function.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("Unrecognised function ID {0:#x} for FF-A")]
pub struct UnrecognisedFunctionIdError(u32);

/// Register contents that don't decode into an [`Interface`].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    UnrecognisedFunctionId(#[from] UnrecognisedFunctionIdError),
    #[error("Unrecognised error code {0}")]
    UnrecognisedErrorCode(i32),
}

/// FF-A v1.1: Function IDs
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[num_enum(error_type(name = UnrecognisedFunctionIdError, constructor = UnrecognisedFunctionIdError))]
#[repr(u32)]
pub enum FuncId {
    Error = 0x84000060,
    Success32 = 0x84000061,
    Success64 = 0xc4000061,
    Version = 0x84000063,
    Features = 0x84000064,
    RxRelease = 0x84000065,
    RxTxMap32 = 0x84000066,
    RxTxMap64 = 0xc4000066,
    RxTxUnmap = 0x84000067,
    PartitionInfoGet = 0x84000068,
    IdGet = 0x84000069,
    MsgPoll = 0x8400006a,
    MsgWait = 0x8400006b,
    MsgSend = 0x8400006e,
    MsgSendDirectReq32 = 0x8400006f,
    MsgSendDirectReq64 = 0xc400006f,
    MsgSendDirectResp32 = 0x84000070,
    MsgSendDirectResp64 = 0xc4000070,
    MemDonate32 = 0x84000071,
    MemDonate64 = 0xc4000071,
    MemLend32 = 0x84000072,
    MemLend64 = 0xc4000072,
    MemShare32 = 0x84000073,
    MemShare64 = 0xc4000073,
    MemRetrieveReq32 = 0x84000074,
    MemRetrieveReq64 = 0xc4000074,
    MemRetrieveResp = 0x84000075,
    MemRelinquish = 0x84000076,
    MemReclaim = 0x84000077,
    MemOpPause = 0x84000078,
    MemOpResume = 0x84000079,
    MemFragRx = 0x8400007a,
    MemFragTx = 0x8400007b,
}

impl FuncId {
    /// Returns true for calls the proxy never lets through, whether or not it handles them
    /// itself.
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            // Memory management calls reserved for the secure world or not implemented
            FuncId::MemRetrieveReq64
                | FuncId::MemRetrieveResp
                | FuncId::MemRelinquish
                | FuncId::MemOpPause
                | FuncId::MemOpResume
                | FuncId::MemFragRx
                | FuncId::MemDonate64
                // Indirect messaging through the RX/TX buffers
                | FuncId::MsgSend
                | FuncId::MsgPoll
                | FuncId::MsgWait
                // 32-bit variants of 64-bit calls
                | FuncId::MsgSendDirectResp32
                | FuncId::RxTxMap32
                | FuncId::MemDonate32
                | FuncId::MemRetrieveReq32
        )
    }
}

const SMCCC_FAST_CALL: u64 = 1 << 31;
const SMCCC_OWNER_SHIFT: u64 = 24;
const SMCCC_OWNER_MASK: u64 = 0x3f;
const SMCCC_OWNER_STANDARD: u64 = 4;
const SMCCC_FUNC_MASK: u64 = 0xffff;
const FFA_MIN_FUNC_NUM: u64 = 0x60;
const FFA_MAX_FUNC_NUM: u64 = 0xff;

/// Returns true if `func_id` lies in the function number range reserved for FF-A.
pub fn is_ffa_call(func_id: u64) -> bool {
    let func_num = func_id & SMCCC_FUNC_MASK;

    func_id >> 32 == 0
        && func_id & SMCCC_FAST_CALL != 0
        && (func_id >> SMCCC_OWNER_SHIFT) & SMCCC_OWNER_MASK == SMCCC_OWNER_STANDARD
        && (FFA_MIN_FUNC_NUM..=FFA_MAX_FUNC_NUM).contains(&func_num)
}

/// Normal world participant: the host (handle 0) or one of its protected guests.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VmHandle(pub u16);

impl VmHandle {
    /// "ID value 0 must be returned at the Non-secure physical FF-A instance". The host shares
    /// it.
    pub const HOST: Self = Self(0);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Interface {
    Error {
        target_info: u32,
        error_code: Error,
    },
    Success {
        target_info: u32,
        result_regs: [u64; 6],
        is_32bit: bool,
    },
    Version {
        input_version: u32,
    },
    VersionOut {
        output_version: u32,
    },
    Features {
        feat_id: u32,
        input_properties: u32,
    },
    RxRelease {
        vm_id: u32,
    },
    RxTxMap {
        tx_addr: u64,
        rx_addr: u64,
        page_cnt: u32,
        is_32bit: bool,
    },
    RxTxUnmap {
        id: u32,
    },
    PartitionInfoGet {
        uuid: Uuid,
        flags: u32,
    },
    IdGet,
    MsgPoll,
    MsgWait,
    MsgSend {
        sender_receiver: u32,
        size: u32,
    },
    MsgSendDirectReq {
        src_id: u16,
        dst_id: u16,
        flags: u32,
        args: [u64; 5],
        is_32bit: bool,
    },
    MsgSendDirectResp {
        src_id: u16,
        dst_id: u16,
        flags: u32,
        args: [u64; 5],
        is_32bit: bool,
    },
    MemDonate {
        total_len: u32,
        frag_len: u32,
        address: u64,
        page_cnt: u32,
        is_32bit: bool,
    },
    MemLend {
        total_len: u32,
        frag_len: u32,
        address: u64,
        page_cnt: u32,
        is_32bit: bool,
    },
    MemShare {
        total_len: u32,
        frag_len: u32,
        address: u64,
        page_cnt: u32,
        is_32bit: bool,
    },
    MemRetrieveReq {
        total_len: u32,
        frag_len: u32,
        address: u64,
        page_cnt: u32,
        is_32bit: bool,
    },
    MemRetrieveResp {
        total_len: u32,
        frag_len: u32,
    },
    MemRelinquish,
    MemReclaim {
        handle: memory_management::Handle,
        flags: u32,
    },
    MemOpPause {
        handle: memory_management::Handle,
    },
    MemOpResume {
        handle: memory_management::Handle,
    },
    MemFragRx {
        handle: memory_management::Handle,
        frag_offset: u32,
        endpoint_id: u16,
    },
    MemFragTx {
        handle: memory_management::Handle,
        frag_len: u32,
        endpoint_id: u16,
    },
}

impl TryFrom<[u64; 8]> for Interface {
    type Error = DecodeError;

    fn try_from(regs: [u64; 8]) -> Result<Self, DecodeError> {
        let fid = FuncId::try_from(regs[0] as u32)?;

        let msg = match fid {
            FuncId::Error => {
                let code = regs[2] as i32;
                Self::Error {
                    target_info: regs[1] as u32,
                    error_code: Error::try_from(code)
                        .map_err(|_| DecodeError::UnrecognisedErrorCode(code))?,
                }
            }
            FuncId::Success32 | FuncId::Success64 => {
                let target_info = regs[1] as u32;
                let mut result_regs = [regs[2], regs[3], regs[4], regs[5], regs[6], regs[7]];
                let is_32bit = fid == FuncId::Success32;

                if is_32bit {
                    result_regs.iter_mut().for_each(|r| *r &= u32::MAX as u64);
                }

                Self::Success {
                    target_info,
                    result_regs,
                    is_32bit,
                }
            }
            FuncId::Version => Self::Version {
                input_version: regs[1] as u32,
            },
            FuncId::Features => Self::Features {
                feat_id: regs[1] as u32,
                input_properties: regs[2] as u32,
            },
            FuncId::RxRelease => Self::RxRelease {
                vm_id: regs[1] as u32,
            },
            FuncId::RxTxMap32 | FuncId::RxTxMap64 => {
                let mut tx_addr = regs[1];
                let mut rx_addr = regs[2];
                let page_cnt = regs[3] as u32;
                let is_32bit = fid == FuncId::RxTxMap32;

                if is_32bit {
                    tx_addr &= u32::MAX as u64;
                    rx_addr &= u32::MAX as u64;
                }

                Self::RxTxMap {
                    tx_addr,
                    rx_addr,
                    page_cnt,
                    is_32bit,
                }
            }
            FuncId::RxTxUnmap => Self::RxTxUnmap { id: regs[1] as u32 },
            FuncId::PartitionInfoGet => {
                let uuid_words = [
                    regs[1] as u32,
                    regs[2] as u32,
                    regs[3] as u32,
                    regs[4] as u32,
                ];
                let mut bytes: [u8; 16] = [0; 16];
                for (i, b) in uuid_words.iter().flat_map(|w| w.to_le_bytes()).enumerate() {
                    bytes[i] = b;
                }
                Self::PartitionInfoGet {
                    uuid: Uuid::from_bytes(bytes),
                    flags: regs[5] as u32,
                }
            }
            FuncId::IdGet => Self::IdGet,
            FuncId::MsgPoll => Self::MsgPoll,
            FuncId::MsgWait => Self::MsgWait,
            FuncId::MsgSend => Self::MsgSend {
                sender_receiver: regs[1] as u32,
                size: regs[3] as u32,
            },
            FuncId::MsgSendDirectReq32 | FuncId::MsgSendDirectReq64 => {
                let (src_id, dst_id, flags, args, is_32bit) = direct_msg_fields(fid, regs);
                Self::MsgSendDirectReq {
                    src_id,
                    dst_id,
                    flags,
                    args,
                    is_32bit,
                }
            }
            FuncId::MsgSendDirectResp32 | FuncId::MsgSendDirectResp64 => {
                let (src_id, dst_id, flags, args, is_32bit) = direct_msg_fields(fid, regs);
                Self::MsgSendDirectResp {
                    src_id,
                    dst_id,
                    flags,
                    args,
                    is_32bit,
                }
            }
            FuncId::MemDonate32 | FuncId::MemDonate64 => {
                let (total_len, frag_len, address, page_cnt, is_32bit) =
                    mem_xfer_fields(fid, FuncId::MemDonate32, regs);
                Self::MemDonate {
                    total_len,
                    frag_len,
                    address,
                    page_cnt,
                    is_32bit,
                }
            }
            FuncId::MemLend32 | FuncId::MemLend64 => {
                let (total_len, frag_len, address, page_cnt, is_32bit) =
                    mem_xfer_fields(fid, FuncId::MemLend32, regs);
                Self::MemLend {
                    total_len,
                    frag_len,
                    address,
                    page_cnt,
                    is_32bit,
                }
            }
            FuncId::MemShare32 | FuncId::MemShare64 => {
                let (total_len, frag_len, address, page_cnt, is_32bit) =
                    mem_xfer_fields(fid, FuncId::MemShare32, regs);
                Self::MemShare {
                    total_len,
                    frag_len,
                    address,
                    page_cnt,
                    is_32bit,
                }
            }
            FuncId::MemRetrieveReq32 | FuncId::MemRetrieveReq64 => {
                let (total_len, frag_len, address, page_cnt, is_32bit) =
                    mem_xfer_fields(fid, FuncId::MemRetrieveReq32, regs);
                Self::MemRetrieveReq {
                    total_len,
                    frag_len,
                    address,
                    page_cnt,
                    is_32bit,
                }
            }
            FuncId::MemRetrieveResp => Self::MemRetrieveResp {
                total_len: regs[1] as u32,
                frag_len: regs[2] as u32,
            },
            FuncId::MemRelinquish => Self::MemRelinquish,
            FuncId::MemReclaim => Self::MemReclaim {
                handle: memory_management::Handle::from([regs[1] as u32, regs[2] as u32]),
                flags: regs[3] as u32,
            },
            FuncId::MemOpPause => Self::MemOpPause {
                handle: memory_management::Handle::from([regs[1] as u32, regs[2] as u32]),
            },
            FuncId::MemOpResume => Self::MemOpResume {
                handle: memory_management::Handle::from([regs[1] as u32, regs[2] as u32]),
            },
            FuncId::MemFragRx => Self::MemFragRx {
                handle: memory_management::Handle::from([regs[1] as u32, regs[2] as u32]),
                frag_offset: regs[3] as u32,
                endpoint_id: regs[4] as u16,
            },
            FuncId::MemFragTx => Self::MemFragTx {
                handle: memory_management::Handle::from([regs[1] as u32, regs[2] as u32]),
                frag_len: regs[3] as u32,
                endpoint_id: regs[4] as u16,
            },
        };

        Ok(msg)
    }
}

fn direct_msg_fields(fid: FuncId, regs: [u64; 8]) -> (u16, u16, u32, [u64; 5], bool) {
    let src_id = (regs[1] >> 16) as u16;
    let dst_id = regs[1] as u16;
    let flags = regs[2] as u32;
    let mut args = [regs[3], regs[4], regs[5], regs[6], regs[7]];
    let is_32bit = matches!(
        fid,
        FuncId::MsgSendDirectReq32 | FuncId::MsgSendDirectResp32
    );

    if is_32bit {
        args.iter_mut().for_each(|a| *a &= u32::MAX as u64);
    }

    (src_id, dst_id, flags, args, is_32bit)
}

fn mem_xfer_fields(fid: FuncId, fid_32: FuncId, regs: [u64; 8]) -> (u32, u32, u64, u32, bool) {
    let total_len = regs[1] as u32;
    let frag_len = regs[2] as u32;
    let mut address = regs[3];
    let page_cnt = regs[4] as u32;
    let is_32bit = fid == fid_32;

    if is_32bit {
        address &= u32::MAX as u64;
    }

    (total_len, frag_len, address, page_cnt, is_32bit)
}

impl Interface {
    /// Returns the function ID for the call, if it has one.
    pub fn function_id(&self) -> Option<FuncId> {
        match self {
            Interface::Error { .. } => Some(FuncId::Error),
            Interface::Success {
                is_32bit: false, ..
            } => Some(FuncId::Success64),
            Interface::Success { is_32bit: true, .. } => Some(FuncId::Success32),
            Interface::Version { .. } => Some(FuncId::Version),
            Interface::VersionOut { .. } => None,
            Interface::Features { .. } => Some(FuncId::Features),
            Interface::RxRelease { .. } => Some(FuncId::RxRelease),
            Interface::RxTxMap {
                is_32bit: false, ..
            } => Some(FuncId::RxTxMap64),
            Interface::RxTxMap { is_32bit: true, .. } => Some(FuncId::RxTxMap32),
            Interface::RxTxUnmap { .. } => Some(FuncId::RxTxUnmap),
            Interface::PartitionInfoGet { .. } => Some(FuncId::PartitionInfoGet),
            Interface::IdGet => Some(FuncId::IdGet),
            Interface::MsgPoll => Some(FuncId::MsgPoll),
            Interface::MsgWait => Some(FuncId::MsgWait),
            Interface::MsgSend { .. } => Some(FuncId::MsgSend),
            Interface::MsgSendDirectReq {
                is_32bit: false, ..
            } => Some(FuncId::MsgSendDirectReq64),
            Interface::MsgSendDirectReq { is_32bit: true, .. } => Some(FuncId::MsgSendDirectReq32),
            Interface::MsgSendDirectResp {
                is_32bit: false, ..
            } => Some(FuncId::MsgSendDirectResp64),
            Interface::MsgSendDirectResp { is_32bit: true, .. } => {
                Some(FuncId::MsgSendDirectResp32)
            }
            Interface::MemDonate {
                is_32bit: false, ..
            } => Some(FuncId::MemDonate64),
            Interface::MemDonate { is_32bit: true, .. } => Some(FuncId::MemDonate32),
            Interface::MemLend {
                is_32bit: false, ..
            } => Some(FuncId::MemLend64),
            Interface::MemLend { is_32bit: true, .. } => Some(FuncId::MemLend32),
            Interface::MemShare {
                is_32bit: false, ..
            } => Some(FuncId::MemShare64),
            Interface::MemShare { is_32bit: true, .. } => Some(FuncId::MemShare32),
            Interface::MemRetrieveReq {
                is_32bit: false, ..
            } => Some(FuncId::MemRetrieveReq64),
            Interface::MemRetrieveReq { is_32bit: true, .. } => Some(FuncId::MemRetrieveReq32),
            Interface::MemRetrieveResp { .. } => Some(FuncId::MemRetrieveResp),
            Interface::MemRelinquish => Some(FuncId::MemRelinquish),
            Interface::MemReclaim { .. } => Some(FuncId::MemReclaim),
            Interface::MemOpPause { .. } => Some(FuncId::MemOpPause),
            Interface::MemOpResume { .. } => Some(FuncId::MemOpResume),
            Interface::MemFragRx { .. } => Some(FuncId::MemFragRx),
            Interface::MemFragTx { .. } => Some(FuncId::MemFragTx),
        }
    }

    pub fn copy_to_array(&self, a: &mut [u64; 8]) {
        a.fill(0);
        if let Some(function_id) = self.function_id() {
            a[0] = u32::from(function_id) as u64;
        }

        match *self {
            Interface::Error {
                target_info,
                error_code,
            } => {
                a[1] = target_info as u64;
                a[2] = i32::from(error_code) as u32 as u64;
            }
            Interface::Success {
                target_info,
                result_regs,
                is_32bit,
            } => {
                a[1] = target_info as u64;
                for (dst, src) in a[2..].iter_mut().zip(result_regs) {
                    *dst = if is_32bit { src & u32::MAX as u64 } else { src };
                }
            }
            Interface::Version { input_version } => {
                a[1] = input_version as u64;
            }
            Interface::VersionOut { output_version } => {
                a[0] = output_version as u64;
            }
            Interface::Features {
                feat_id,
                input_properties,
            } => {
                a[1] = feat_id as u64;
                a[2] = input_properties as u64;
            }
            Interface::RxRelease { vm_id } => {
                a[1] = vm_id as u64;
            }
            Interface::RxTxMap {
                tx_addr,
                rx_addr,
                page_cnt,
                is_32bit,
            } => {
                a[3] = page_cnt as u64;
                if is_32bit {
                    a[1] = tx_addr & u32::MAX as u64;
                    a[2] = rx_addr & u32::MAX as u64;
                } else {
                    a[1] = tx_addr;
                    a[2] = rx_addr;
                }
            }
            Interface::RxTxUnmap { id } => {
                a[1] = id as u64;
            }
            Interface::PartitionInfoGet { uuid, flags } => {
                let bytes = uuid.as_bytes();
                a[1] = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
                a[2] = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as u64;
                a[3] = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as u64;
                a[4] = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as u64;
                a[5] = flags as u64;
            }
            Interface::IdGet
            | Interface::MsgPoll
            | Interface::MsgWait
            | Interface::MemRelinquish => {}
            Interface::MsgSend {
                sender_receiver,
                size,
            } => {
                a[1] = sender_receiver as u64;
                a[3] = size as u64;
            }
            Interface::MsgSendDirectReq {
                src_id,
                dst_id,
                flags,
                args,
                is_32bit,
            }
            | Interface::MsgSendDirectResp {
                src_id,
                dst_id,
                flags,
                args,
                is_32bit,
            } => {
                a[1] = (src_id as u64) << 16 | dst_id as u64;
                a[2] = flags as u64;
                for (dst, src) in a[3..].iter_mut().zip(args) {
                    *dst = if is_32bit { src & u32::MAX as u64 } else { src };
                }
            }
            Interface::MemDonate {
                total_len,
                frag_len,
                address,
                page_cnt,
                is_32bit,
            }
            | Interface::MemLend {
                total_len,
                frag_len,
                address,
                page_cnt,
                is_32bit,
            }
            | Interface::MemShare {
                total_len,
                frag_len,
                address,
                page_cnt,
                is_32bit,
            }
            | Interface::MemRetrieveReq {
                total_len,
                frag_len,
                address,
                page_cnt,
                is_32bit,
            } => {
                a[1] = total_len as u64;
                a[2] = frag_len as u64;
                a[4] = page_cnt as u64;
                if is_32bit {
                    a[3] = address & u32::MAX as u64;
                } else {
                    a[3] = address;
                }
            }
            Interface::MemRetrieveResp {
                total_len,
                frag_len,
            } => {
                a[1] = total_len as u64;
                a[2] = frag_len as u64;
            }
            Interface::MemReclaim { handle, flags } => {
                let handle_regs: [u32; 2] = handle.into();
                a[1] = handle_regs[0] as u64;
                a[2] = handle_regs[1] as u64;
                a[3] = flags as u64;
            }
            Interface::MemOpPause { handle } | Interface::MemOpResume { handle } => {
                let handle_regs: [u32; 2] = handle.into();
                a[1] = handle_regs[0] as u64;
                a[2] = handle_regs[1] as u64;
            }
            Interface::MemFragRx {
                handle,
                frag_offset: frag_value,
                endpoint_id,
            }
            | Interface::MemFragTx {
                handle,
                frag_len: frag_value,
                endpoint_id,
            } => {
                let handle_regs: [u32; 2] = handle.into();
                a[1] = handle_regs[0] as u64;
                a[2] = handle_regs[1] as u64;
                a[3] = frag_value as u64;
                a[4] = endpoint_id as u64;
            }
        }
    }

    /// Helper function to create an FFA_SUCCESS interface without any arguments
    pub fn success32_noargs() -> Self {
        Self::Success {
            target_info: 0,
            result_regs: [0, 0, 0, 0, 0, 0],
            is_32bit: true,
        }
    }

    /// Helper function to create an FFA_SUCCESS interface carrying a single property word in w2.
    pub fn success32_prop(prop: u32) -> Self {
        Self::Success {
            target_info: 0,
            result_regs: [prop as u64, 0, 0, 0, 0, 0],
            is_32bit: true,
        }
    }

    /// Helper function to create an FFA_ERROR interface.
    pub fn error(error_code: Error) -> Self {
        Self::Error {
            target_info: 0,
            error_code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Interface::Success { .. })
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Version(pub u16, pub u16);

impl Version {
    pub const V1_0: Self = Self(1, 0);
    pub const V1_1: Self = Self(1, 1);

    /// Returned in w0 instead of a version when the requested version can't be honoured.
    pub const NOT_SUPPORTED: u32 = Error::NotSupported as i32 as u32;

    pub fn major(self) -> u16 {
        self.0
    }

    pub fn minor(self) -> u16 {
        self.1
    }
}

impl From<u32> for Version {
    fn from(val: u32) -> Self {
        Self((val >> 16) as u16, val as u16)
    }
}

impl From<Version> for u32 {
    fn from(v: Version) -> Self {
        (v.0 as u32) << 16 | v.1 as u32
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}
