// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partition discovery and VM availability messages.
//!
//! Secure partitions can ask to be told about every VM the hypervisor creates or destroys. The
//! proxy learns which partitions want this from the first successful `FFA_PARTITION_INFO_GET`
//! it forwards and from then on sends them a framework message whenever a participant maps or
//! tears down its buffers.

use crate::{ffa_v1_0, ffa_v1_1, platform::SecureWorld, Interface, Version, VmHandle};
use core::mem::size_of;
use log::warn;
use thiserror::Error;
use uuid::Uuid;
use zerocopy::FromBytes;

/// Maximum number of partitions that can register for VM availability messages.
pub const MAX_REGISTERED_SP_IDS: usize = 8;

/// Rich error types returned by this module. Should be converted to [`crate::Error`] when used
/// with the `FFA_ERROR` interface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid buffer size")]
    InvalidBufferSize,
    #[error("Descriptor size {0} too small for FF-A {1}")]
    InvalidDescriptorSize(usize, Version),
}

impl From<Error> for crate::Error {
    fn from(_value: Error) -> Self {
        Self::InvalidParameters
    }
}

/// Properties of a partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionProperties {
    /// The partition supports receipt of direct requests.
    pub support_direct_req_rec: bool,
    /// The partition can send direct requests.
    pub support_direct_req_send: bool,
    /// The partition can send and receive indirect messages.
    pub support_indirect_msg: bool,
    /// The partition supports receipt of notifications.
    pub support_notif_rec: bool,
    /// The partition must be informed about each VM that is created by the Hypervisor.
    pub subscribe_vm_created: bool,
    /// The partition must be informed about each VM that is destroyed by the Hypervisor.
    pub subscribe_vm_destroyed: bool,
    /// The partition runs in the AArch64 execution state.
    pub is_aarch64: bool,
}

impl PartitionProperties {
    const SUPPORT_DIRECT_REQ_REC_SHIFT: usize = 0;
    const SUPPORT_DIRECT_REQ_SEND_SHIFT: usize = 1;
    const SUPPORT_INDIRECT_MSG_SHIFT: usize = 2;
    const SUPPORT_NOTIF_REC_SHIFT: usize = 3;
    const SUBSCRIBE_VM_CREATED_SHIFT: usize = 6;
    const SUBSCRIBE_VM_DESTROYED_SHIFT: usize = 7;
    const IS_AARCH64_SHIFT: usize = 8;

    /// Partitions are only registered for VM availability messages if they subscribe to both.
    pub fn subscribes_vm_availability(&self) -> bool {
        self.subscribe_vm_created && self.subscribe_vm_destroyed
    }
}

impl From<u32> for PartitionProperties {
    fn from(prop_bits: u32) -> Self {
        let bit = |shift: usize| (prop_bits >> shift) & 0b1 == 1;

        Self {
            support_direct_req_rec: bit(Self::SUPPORT_DIRECT_REQ_REC_SHIFT),
            support_direct_req_send: bit(Self::SUPPORT_DIRECT_REQ_SEND_SHIFT),
            support_indirect_msg: bit(Self::SUPPORT_INDIRECT_MSG_SHIFT),
            support_notif_rec: bit(Self::SUPPORT_NOTIF_REC_SHIFT),
            subscribe_vm_created: bit(Self::SUBSCRIBE_VM_CREATED_SHIFT),
            subscribe_vm_destroyed: bit(Self::SUBSCRIBE_VM_DESTROYED_SHIFT),
            is_aarch64: bit(Self::IS_AARCH64_SHIFT),
        }
    }
}

/// Partition information descriptor, returned by the `FFA_PARTITION_INFO_GET` interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub partition_id: u16,
    pub exec_ctx_count: u16,
    pub props: PartitionProperties,
    /// Only present from FF-A v1.1.
    pub uuid: Option<Uuid>,
}

/// Size of each descriptor in a v1.0 response, which doesn't report it.
pub const V1_0_DESC_SIZE: usize = size_of::<ffa_v1_0::partition_info_descriptor>();

/// Iterator of partition information descriptors.
pub struct PartitionInfoIterator<'a> {
    version: Version,
    buf: &'a [u8],
    desc_size: usize,
    offset: usize,
    count: usize,
}

impl<'a> PartitionInfoIterator<'a> {
    /// Create an iterator of `count` descriptors of `desc_size` bytes each from a buffer.
    pub fn new(
        version: Version,
        buf: &'a [u8],
        count: usize,
        desc_size: usize,
    ) -> Result<Self, Error> {
        let min_size = if version >= Version::V1_1 {
            size_of::<ffa_v1_1::partition_info_descriptor>()
        } else {
            V1_0_DESC_SIZE
        };

        if desc_size < min_size {
            return Err(Error::InvalidDescriptorSize(desc_size, version));
        }

        let Some(total_size) = count.checked_mul(desc_size) else {
            return Err(Error::InvalidBufferSize);
        };

        if buf.len() < total_size {
            return Err(Error::InvalidBufferSize);
        }

        Ok(Self {
            version,
            buf,
            desc_size,
            offset: 0,
            count,
        })
    }
}

impl Iterator for PartitionInfoIterator<'_> {
    type Item = PartitionInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == 0 {
            return None;
        }

        let desc_bytes = self.buf.get(self.offset..self.offset + self.desc_size)?;
        self.offset += self.desc_size;
        self.count -= 1;

        if self.version >= Version::V1_1 {
            let (desc_raw, _) = ffa_v1_1::partition_info_descriptor::ref_from_prefix(desc_bytes).ok()?;

            Some(PartitionInfo {
                partition_id: desc_raw.partition_id,
                exec_ctx_count: desc_raw.exec_ctx_count_or_proxy_id,
                props: desc_raw.partition_props.into(),
                uuid: Some(Uuid::from_bytes(desc_raw.uuid)),
            })
        } else {
            let (desc_raw, _) = ffa_v1_0::partition_info_descriptor::ref_from_prefix(desc_bytes).ok()?;

            Some(PartitionInfo {
                partition_id: desc_raw.partition_id,
                exec_ctx_count: desc_raw.exec_ctx_count,
                props: desc_raw.partition_props.into(),
                uuid: None,
            })
        }
    }
}

/// VM lifecycle event reported to subscribed partitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VmAvailability {
    Created,
    Destroyed,
}

impl VmAvailability {
    const FRAMEWORK_MSG: u32 = 1 << 31;
    const VM_CREATED: u32 = 0b100;
    const VM_DESTROYED: u32 = 0b110;

    /// Value of the direct message flags identifying the framework message.
    pub fn msg_flags(self) -> u32 {
        Self::FRAMEWORK_MSG
            | match self {
                Self::Created => Self::VM_CREATED,
                Self::Destroyed => Self::VM_DESTROYED,
            }
    }
}

/// Partitions registered for VM availability messages.
#[derive(Debug, Default)]
pub struct AvailabilityListeners {
    ids: [u16; MAX_REGISTERED_SP_IDS],
    len: usize,
}

impl AvailabilityListeners {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ids(&self) -> &[u16] {
        &self.ids[..self.len]
    }

    /// Registers the subscribing partitions among the first [`MAX_REGISTERED_SP_IDS`]
    /// descriptors. Does nothing once any partition is registered.
    pub fn register<I: IntoIterator<Item = PartitionInfo>>(&mut self, partitions: I) {
        if !self.is_empty() {
            return;
        }

        for partition in partitions.into_iter().take(MAX_REGISTERED_SP_IDS) {
            if partition.props.subscribes_vm_availability() {
                self.ids[self.len] = partition.partition_id;
                self.len += 1;
            }
        }
    }

    /// Tells every registered partition about `event`, stopping at the first one that doesn't
    /// acknowledge it.
    pub fn notify<S: SecureWorld + ?Sized>(
        &self,
        sw: &S,
        vm: VmHandle,
        event: VmAvailability,
    ) -> Result<(), crate::Error> {
        for &sp_id in self.ids() {
            let ret = sw.invoke(Interface::MsgSendDirectReq {
                src_id: VmHandle::HOST.0,
                dst_id: sp_id,
                flags: event.msg_flags(),
                args: [0, 0, vm.0 as u64, 0, 0],
                is_32bit: true,
            });

            let Interface::MsgSendDirectResp {
                args: [status, ..],
                is_32bit: true,
                ..
            } = ret
            else {
                warn!("Partition {:#x} didn't respond to {:?} of {:?}: {:?}", sp_id, event, vm, ret);
                return Err(crate::Error::InvalidParameters);
            };

            let status = status as u32 as i32;
            if status != 0 {
                return Err(crate::Error::try_from(status).unwrap_or(crate::Error::Aborted));
            }
        }

        Ok(())
    }
}
