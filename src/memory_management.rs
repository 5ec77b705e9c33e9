// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory transaction descriptor codec.
//!
//! The proxy never trusts a descriptor it copies out of a caller's TX buffer. Everything here
//! works on a byte buffer holding (a fragment of) the descriptor and validates every offset it
//! follows against the length of that buffer. Only descriptors with a single receiver endpoint
//! are accepted, which is what the secure world supports for transfers from the normal world.
//!
//! The header layout changed between FF-A v1.0 and v1.1: v1.0 places the endpoint memory access
//! descriptor array right after a 32 byte header, while v1.1 uses a 48 byte header that declares
//! the offset of the array itself. The composite and constituent descriptors are the same in
//! both versions.

use crate::{
    ffa_v1_0,
    ffa_v1_1::{
        composite_memory_region_descriptor, constituent_memory_region_descriptor,
        endpoint_memory_access_descriptor, memory_transaction_descriptor,
    },
    Version, FFA_PAGE_SIZE,
};
use core::mem::size_of;
use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes};

/// Rich error types returned by this module. Converted to [`crate::Error::InvalidParameters`]
/// when reported to a caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid buffer size")]
    InvalidBufferSize,
    #[error("Malformed descriptor")]
    MalformedDescriptor,
    #[error("Invalid endpoint count {0}")]
    UnsupportedEndpointCount(u32),
    #[error("Endpoint memory access descriptor array offset {0:#x} overlaps the header")]
    InvalidEndpointArrayOffset(u32),
    #[error("Missing composite memory region descriptor")]
    MissingComposite,
    #[error("Composite offset {0:#x} out of bounds")]
    CompositeOutOfBounds(usize),
    #[error("Fragment ends {0} bytes into a constituent descriptor")]
    PartialConstituent(usize),
    #[error("Page count {actual} doesn't match the composite total {expected}")]
    PageCountMismatch { expected: u32, actual: u64 },
    #[error("Range of {page_cnt} pages at {address:#x} wraps around the address space")]
    RangeOverflow { address: u64, page_cnt: u32 },
}

impl From<Error> for crate::Error {
    fn from(_value: Error) -> Self {
        Self::InvalidParameters
    }
}

/// Memory region handle, used to identify a composite memory region description.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl From<[u32; 2]> for Handle {
    fn from(value: [u32; 2]) -> Self {
        Self(((value[1] as u64) << 32) | value[0] as u64)
    }
}

impl From<Handle> for [u32; 2] {
    fn from(value: Handle) -> Self {
        [value.0 as u32, (value.0 >> 32) as u32]
    }
}

/// Size of the transaction descriptor header in the given version of the ABI.
pub fn header_size(version: Version) -> usize {
    if version >= Version::V1_1 {
        size_of::<memory_transaction_descriptor>()
    } else {
        size_of::<ffa_v1_0::memory_transaction_descriptor>()
    }
}

/// Smallest fragment that can carry a header and one endpoint memory access descriptor.
pub fn min_transaction_size(version: Version) -> usize {
    header_size(version) + size_of::<endpoint_memory_access_descriptor>()
}

/// Constituent memory region descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConstituentMemRegion {
    pub address: u64,
    pub page_cnt: u32,
}

impl ConstituentMemRegion {
    pub const SIZE: usize = size_of::<constituent_memory_region_descriptor>();

    /// Address of the last page of the range, or `None` if the range wraps around.
    pub fn last_page(&self) -> Option<u64> {
        let offset = (self.page_cnt.max(1) as u64 - 1) * FFA_PAGE_SIZE as u64;
        self.address.checked_add(offset)
    }
}

/// Iterator of constituent memory region descriptors.
#[derive(Clone)]
pub struct ConstituentMemRegionIterator<'a> {
    buf: &'a [u8],
    offset: usize,
    count: usize,
}

impl<'a> ConstituentMemRegionIterator<'a> {
    /// Create an iterator of `count` constituent memory region descriptors starting at `offset`.
    pub fn new(buf: &'a [u8], offset: usize, count: usize) -> Result<Self, Error> {
        let Some(total_size) = count
            .checked_mul(ConstituentMemRegion::SIZE)
            .and_then(|x| x.checked_add(offset))
        else {
            return Err(Error::InvalidBufferSize);
        };

        if buf.len() < total_size {
            return Err(Error::InvalidBufferSize);
        }

        Ok(Self { buf, offset, count })
    }

    /// Iterate over a bare array of constituents, as sent in the fragments following the first
    /// one. The buffer must hold a whole number of descriptors.
    pub fn from_fragment(buf: &'a [u8]) -> Result<Self, Error> {
        let remainder = buf.len() % ConstituentMemRegion::SIZE;
        if remainder != 0 {
            return Err(Error::PartialConstituent(remainder));
        }

        Self::new(buf, 0, buf.len() / ConstituentMemRegion::SIZE)
    }

    /// Checks that the page counts of the remaining constituents add up to `total_page_count`.
    pub fn check_page_count(&self, total_page_count: u32) -> Result<(), Error> {
        let actual: u64 = self.clone().map(|c| c.page_cnt as u64).sum();

        if actual != total_page_count as u64 {
            return Err(Error::PageCountMismatch {
                expected: total_page_count,
                actual,
            });
        }

        Ok(())
    }

    /// Checks that none of the remaining constituents wraps around the address space.
    pub fn check_bounds(&self) -> Result<(), Error> {
        match self.clone().find(|c| c.last_page().is_none()) {
            Some(c) => Err(Error::RangeOverflow {
                address: c.address,
                page_cnt: c.page_cnt,
            }),
            None => Ok(()),
        }
    }
}

impl Iterator for ConstituentMemRegionIterator<'_> {
    type Item = ConstituentMemRegion;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == 0 {
            return None;
        }

        let offset = self.offset;
        self.offset += ConstituentMemRegion::SIZE;
        self.count -= 1;

        let desc_raw = constituent_memory_region_descriptor::ref_from_bytes(
            self.buf.get(offset..offset + ConstituentMemRegion::SIZE)?,
        )
        .ok()?;

        Some(ConstituentMemRegion {
            address: desc_raw.address,
            page_cnt: desc_raw.page_count,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.count, Some(self.count))
    }
}

impl ExactSizeIterator for ConstituentMemRegionIterator<'_> {}

/// Composite memory region descriptor header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompositeMemRegion {
    /// Offset of the descriptor from the start of the transaction descriptor.
    pub offset: usize,
    pub total_page_count: u32,
    pub address_range_count: u32,
}

impl CompositeMemRegion {
    const CONSTITUENT_ARRAY_OFFSET: usize = size_of::<composite_memory_region_descriptor>();

    /// Reads the composite descriptor located `offset` bytes into `buf`.
    pub fn unpack(buf: &[u8], offset: usize) -> Result<Self, Error> {
        let Some(desc_bytes) = offset
            .checked_add(Self::CONSTITUENT_ARRAY_OFFSET)
            .and_then(|end| buf.get(offset..end))
        else {
            return Err(Error::CompositeOutOfBounds(offset));
        };

        let Ok(desc_raw) = composite_memory_region_descriptor::ref_from_bytes(desc_bytes) else {
            return Err(Error::MalformedDescriptor);
        };

        Ok(Self {
            offset,
            total_page_count: desc_raw.total_page_count,
            address_range_count: desc_raw.address_range_count,
        })
    }

    /// Offset of the first constituent descriptor.
    pub fn constituents_offset(&self) -> usize {
        self.offset + Self::CONSTITUENT_ARRAY_OFFSET
    }

    /// Number of constituents held by a fragment of `frag_len` bytes, regardless of what the
    /// composite header claims. The fragment must end on a descriptor boundary.
    pub fn constituents_in_fragment(&self, frag_len: usize) -> Result<usize, Error> {
        let Some(ranges_size) = frag_len.checked_sub(self.constituents_offset()) else {
            return Err(Error::CompositeOutOfBounds(self.offset));
        };

        let remainder = ranges_size % ConstituentMemRegion::SIZE;
        if remainder != 0 {
            return Err(Error::PartialConstituent(remainder));
        }

        Ok(ranges_size / ConstituentMemRegion::SIZE)
    }

    /// Iterator over the constituents the composite header declares.
    pub fn constituents<'a>(&self, buf: &'a [u8]) -> Result<ConstituentMemRegionIterator<'a>, Error> {
        ConstituentMemRegionIterator::new(
            buf,
            self.constituents_offset(),
            self.address_range_count as usize,
        )
    }

    /// Size of the descriptor once every page is described by its own constituent.
    pub fn expanded_size(&self) -> usize {
        self.constituents_offset() + self.total_page_count as usize * ConstituentMemRegion::SIZE
    }

    /// Replaces the constituent array with `regions`, updates the range count in the composite
    /// header and returns the new end of the descriptor. `total_page_count` is left untouched.
    pub fn write_constituents<I>(&mut self, buf: &mut [u8], regions: I) -> Result<usize, Error>
    where
        I: ExactSizeIterator<Item = ConstituentMemRegion>,
    {
        let count = regions.len();
        let Some(end) = count
            .checked_mul(ConstituentMemRegion::SIZE)
            .and_then(|x| x.checked_add(self.constituents_offset()))
        else {
            return Err(Error::InvalidBufferSize);
        };

        if buf.len() < end {
            return Err(Error::InvalidBufferSize);
        }

        let mut offset = self.constituents_offset();
        for region in regions {
            let desc_raw = constituent_memory_region_descriptor {
                address: region.address,
                page_count: region.page_cnt,
                reserved: 0,
            };

            desc_raw
                .write_to_prefix(&mut buf[offset..])
                .map_err(|_| Error::InvalidBufferSize)?;
            offset += ConstituentMemRegion::SIZE;
        }

        self.address_range_count = count as u32;

        let composite_raw = composite_memory_region_descriptor {
            total_page_count: self.total_page_count,
            address_range_count: self.address_range_count,
            reserved: 0,
        };

        composite_raw
            .write_to_prefix(&mut buf[self.offset..])
            .map_err(|_| Error::InvalidBufferSize)?;

        Ok(end)
    }
}

/// Memory transaction descriptor with a single receiver, as accepted from a sender or returned
/// by the secure world in a retrieve response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemTransactionDesc {
    pub sender_id: u16,
    pub flags: u32,
    pub handle: Handle,
    pub tag: u64,
    pub receiver_id: u16,
    /// Offset of the composite memory region descriptor, never 0.
    pub composite_offset: usize,
}

impl MemTransactionDesc {
    /// Parses the header and the endpoint memory access descriptor at the start of `buf`. The
    /// composite descriptor itself may lie beyond the end of `buf`.
    pub fn unpack(buf: &[u8], version: Version) -> Result<Self, Error> {
        let (mut desc, endpoint_count, emad_offset) = if version >= Version::V1_1 {
            let Ok((desc_raw, _)) = memory_transaction_descriptor::ref_from_prefix(buf) else {
                return Err(Error::InvalidBufferSize);
            };

            let array_offset = desc_raw.endpoint_mem_access_desc_array_offset;
            if (array_offset as usize) < size_of::<memory_transaction_descriptor>() {
                return Err(Error::InvalidEndpointArrayOffset(array_offset));
            }

            let desc = Self {
                sender_id: desc_raw.sender_endpoint_id,
                flags: desc_raw.flags,
                handle: Handle(desc_raw.handle),
                tag: desc_raw.tag,
                ..Default::default()
            };

            (
                desc,
                desc_raw.endpoint_mem_access_desc_count,
                array_offset as usize,
            )
        } else {
            let Ok((desc_raw, _)) = ffa_v1_0::memory_transaction_descriptor::ref_from_prefix(buf)
            else {
                return Err(Error::InvalidBufferSize);
            };

            let desc = Self {
                sender_id: desc_raw.sender_endpoint_id,
                flags: desc_raw.flags,
                handle: Handle(desc_raw.handle),
                tag: desc_raw.tag,
                ..Default::default()
            };

            (
                desc,
                desc_raw.endpoint_mem_access_desc_count,
                size_of::<ffa_v1_0::memory_transaction_descriptor>(),
            )
        };

        if endpoint_count != 1 {
            return Err(Error::UnsupportedEndpointCount(endpoint_count));
        }

        let Some(emad_bytes) = buf.get(emad_offset..) else {
            return Err(Error::InvalidBufferSize);
        };

        let Ok((emad_raw, _)) = endpoint_memory_access_descriptor::ref_from_prefix(emad_bytes)
        else {
            return Err(Error::InvalidBufferSize);
        };

        // An offset of 0 refers the receiver to the region identified by the handle, which
        // doesn't describe any memory to transfer.
        if emad_raw.composite_offset == 0 {
            return Err(Error::MissingComposite);
        }

        desc.receiver_id = emad_raw.access_perm_desc.endpoint_id;
        desc.composite_offset = emad_raw.composite_offset as usize;

        Ok(desc)
    }

    /// Serializes the retrieve request the hypervisor sends on behalf of a sender to resolve
    /// `handle`: a bare header with sender 0 and no receivers. Returns the request length.
    pub fn pack_retrieve_req(handle: Handle, version: Version, buf: &mut [u8]) -> Result<usize, Error> {
        let len = header_size(version);
        let Some(req) = buf.get_mut(..len) else {
            return Err(Error::InvalidBufferSize);
        };

        req.fill(0);

        if version >= Version::V1_1 {
            let desc_raw = memory_transaction_descriptor {
                handle: handle.0,
                ..Default::default()
            };
            desc_raw
                .write_to_prefix(req)
                .map_err(|_| Error::InvalidBufferSize)?;
        } else {
            let desc_raw = ffa_v1_0::memory_transaction_descriptor {
                handle: handle.0,
                ..Default::default()
            };
            desc_raw
                .write_to_prefix(req)
                .map_err(|_| Error::InvalidBufferSize)?;
        }

        Ok(len)
    }
}
