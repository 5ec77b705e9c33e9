// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parses a share descriptor from the test data like the proxy does for a guest, then rewrites
//! its constituents one page per descriptor.

#![no_main]

use ffa_proxy::memory_management::{
    CompositeMemRegion, ConstituentMemRegion, ConstituentMemRegionIterator, MemTransactionDesc,
};
use ffa_proxy::{Version, MBOX_SIZE, PAGE_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, data)) = data.split_first() else {
        return;
    };

    let version = if selector & 1 == 0 {
        Version::V1_0
    } else {
        Version::V1_1
    };

    let len = data.len().min(MBOX_SIZE);
    let mut buf = [0; MBOX_SIZE];
    buf[..len].copy_from_slice(&data[..len]);

    let Ok(desc) = MemTransactionDesc::unpack(&buf[..len], version) else {
        return;
    };
    let Ok(mut composite) = CompositeMemRegion::unpack(&buf[..len], desc.composite_offset) else {
        return;
    };
    let Ok(count) = composite.constituents_in_fragment(len) else {
        return;
    };
    let Ok(ranges) = ConstituentMemRegionIterator::new(&buf[..len], composite.constituents_offset(), count)
    else {
        return;
    };

    if ranges.check_page_count(composite.total_page_count).is_err()
        || ranges.check_bounds().is_err()
        || composite.expanded_size() > MBOX_SIZE
    {
        return;
    }

    let pages: Vec<ConstituentMemRegion> = ranges
        .flat_map(|range| {
            (0..range.page_cnt as u64).map(move |i| ConstituentMemRegion {
                address: range.address + i * PAGE_SIZE as u64,
                page_cnt: 1,
            })
        })
        .collect();

    let end = composite
        .write_constituents(&mut buf, pages.iter().copied())
        .expect("expanded descriptor must fit");
    assert_eq!(end, composite.expanded_size());

    let reread = CompositeMemRegion::unpack(&buf[..end], desc.composite_offset).unwrap();
    assert!(reread.constituents(&buf[..end]).unwrap().eq(pages));
});
