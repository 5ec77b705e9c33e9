// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Range-wise stage-2 transitions of host pages for transfers to the secure world.

use crate::{
    memory_management::ConstituentMemRegion, platform::Stage2, Error, FFA_PAGE_SIZE, PAGE_SIZE,
};
use log::warn;

/// Hypervisor pages covered by `range`, or `None` if it doesn't cover whole pages.
fn range_pages(range: &ConstituentMemRegion) -> Option<(u64, u64)> {
    let size = range.page_cnt as u64 * FFA_PAGE_SIZE as u64;

    if size % PAGE_SIZE as u64 != 0 {
        return None;
    }

    Some((range.address / PAGE_SIZE as u64, size / PAGE_SIZE as u64))
}

/// Shares each range with the secure world in order, stopping at the first one that fails.
/// Returns the number of ranges shared.
pub fn share_ranges<S, I>(stage2: &S, ranges: I) -> usize
where
    S: Stage2 + ?Sized,
    I: IntoIterator<Item = ConstituentMemRegion>,
{
    ranges
        .into_iter()
        .take_while(|range| {
            range_pages(range).is_some_and(|(pfn, nr)| stage2.host_share_ffa(pfn, nr).is_ok())
        })
        .count()
}

/// Inverse of [`share_ranges`].
pub fn unshare_ranges<S, I>(stage2: &S, ranges: I) -> usize
where
    S: Stage2 + ?Sized,
    I: IntoIterator<Item = ConstituentMemRegion>,
{
    ranges
        .into_iter()
        .take_while(|range| {
            range_pages(range).is_some_and(|(pfn, nr)| stage2.host_unshare_ffa(pfn, nr).is_ok())
        })
        .count()
}

/// Shares all of `ranges` or none of them.
pub fn share_ranges_checked<S, I>(stage2: &S, ranges: I) -> Result<(), Error>
where
    S: Stage2 + ?Sized,
    I: Iterator<Item = ConstituentMemRegion> + Clone,
{
    let requested = ranges.clone().count();
    let shared = share_ranges(stage2, ranges.clone());

    if shared != requested {
        let undone = unshare_ranges(stage2, ranges.take(shared));
        if undone != shared {
            warn!("Failed to unshare {} of {} ranges", shared - undone, shared);
        }
        return Err(Error::Denied);
    }

    Ok(())
}

/// Unshares all of `ranges` or none of them.
pub fn unshare_ranges_checked<S, I>(stage2: &S, ranges: I) -> Result<(), Error>
where
    S: Stage2 + ?Sized,
    I: Iterator<Item = ConstituentMemRegion> + Clone,
{
    let requested = ranges.clone().count();
    let unshared = unshare_ranges(stage2, ranges.clone());

    if unshared != requested {
        let redone = share_ranges(stage2, ranges.take(unshared));
        if redone != unshared {
            warn!("Failed to reshare {} of {} ranges", unshared - redone, unshared);
        }
        return Err(Error::Denied);
    }

    Ok(())
}
