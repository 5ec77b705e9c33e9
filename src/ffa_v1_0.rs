// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FF-A v1.0 wire layouts. The composite and constituent descriptors are unchanged in v1.1 and
//! live in `ffa_v1_1`.

#![allow(non_camel_case_types)]

use zerocopy_derive::*;

/// v1.0 Table 5.19: Lend, donate or share memory transaction descriptor
#[derive(Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub(crate) struct memory_transaction_descriptor {
    /// Offset 0, length 2: ID of the Owner endpoint
    pub(crate) sender_endpoint_id: u16,
    /// Offset 2, length 1: Memory region attributes
    pub(crate) memory_region_attributes: u8,
    /// Offset 3, length 1: Reserved (MBZ)
    pub(crate) reserved1: u8,
    /// Offset 4, length 4: Flags
    pub(crate) flags: u32,
    /// Offset 8, length 8: Globally unique Handle to identify a memory region
    pub(crate) handle: u64,
    /// Offset 16, length 8: Tag
    pub(crate) tag: u64,
    /// Offset 24, length 4: Reserved (MBZ)
    pub(crate) reserved2: u32,
    /// Offset 28, length 4: Count of endpoint memory access descriptors. The array follows the
    /// header directly.
    pub(crate) endpoint_mem_access_desc_count: u32,
}

/// v1.0 Table 8.25: Partition information descriptor
#[derive(Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub(crate) struct partition_info_descriptor {
    /// Offset 0, length 2: 16-bit ID of the partition
    pub(crate) partition_id: u16,
    /// Offset 2, length 2: Number of execution contexts implemented by this partition
    pub(crate) exec_ctx_count: u16,
    /// Offset 4, length 4: Flags to determine partition properties
    pub(crate) partition_props: u32,
}
