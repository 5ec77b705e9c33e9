// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping of transfers made on behalf of guests.
//!
//! Guests describe memory by IPA but the secure world is handed PAs, one constituent per page.
//! To undo a transfer the proxy has to map each PA the secure world reports back to the IPA it was
//! shared from, so every page shared for a guest is recorded as a [`Translation`] in the
//! [`Transfer`] it belongs to. Transfers are kept in a per-guest [`Registry`] keyed by the handle
//! the secure world allocated.

use crate::{memory_management::Handle, platform::Stage2, VmHandle};
use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use log::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Translation {
    pub ipa: u64,
    pub pa: u64,
}

/// Transfer committed by the secure world on behalf of a guest.
#[derive(Debug, Default)]
pub struct Transfer {
    pub handle: Handle,
    pub translations: Vec<Translation>,
}

impl Transfer {
    /// Creates a transfer with room for `nr_pages` translations.
    pub fn with_capacity(nr_pages: usize) -> Result<Self, TryReserveError> {
        let mut translations = Vec::new();
        translations.try_reserve_exact(nr_pages)?;

        Ok(Self {
            handle: Handle::default(),
            translations,
        })
    }

    /// Removes and returns the translation of `pa`.
    pub fn take_translation(&mut self, pa: u64) -> Option<Translation> {
        let index = self.translations.iter().position(|t| t.pa == pa)?;
        Some(self.translations.swap_remove(index))
    }

    /// Unshares the IPA behind each of `pas` from the secure world, dropping its translation.
    /// PAs without a translation are logged and skipped.
    pub fn unshare_pages<S, I>(&mut self, stage2: &S, vm: VmHandle, pas: I)
    where
        S: Stage2 + ?Sized,
        I: IntoIterator<Item = u64>,
    {
        for pa in pas {
            let Some(translation) = self.take_translation(pa) else {
                warn!("{:?}: no translation of PA {:#x} in transfer {:#x}", vm, pa, self.handle.0);
                continue;
            };

            if let Err(e) = stage2.guest_unshare_ffa(vm, translation.ipa) {
                warn!("{:?}: failed to unshare IPA {:#x}: {}", vm, translation.ipa, e);
            }
        }
    }

    /// Unshares every page still recorded in the transfer.
    pub fn unshare_all<S: Stage2 + ?Sized>(&mut self, stage2: &S, vm: VmHandle) {
        for translation in self.translations.drain(..) {
            if let Err(e) = stage2.guest_unshare_ffa(vm, translation.ipa) {
                warn!("{:?}: failed to unshare IPA {:#x}: {}", vm, translation.ipa, e);
            }
        }
    }
}

/// Open transfers of one participant.
#[derive(Debug, Default)]
pub struct Registry {
    transfers: Vec<Transfer>,
}

impl Registry {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.transfers.iter().any(|t| t.handle == handle)
    }

    /// Makes sure the next [`Registry::insert`] doesn't allocate.
    pub fn try_reserve(&mut self) -> Result<(), TryReserveError> {
        self.transfers.try_reserve(1)
    }

    /// Records a committed transfer. The secure world allocates handles, so a duplicate means it
    /// is handing out a handle that is still in use.
    pub fn insert(&mut self, transfer: Transfer) {
        if self.contains(transfer.handle) {
            warn!("Duplicate transfer handle {:#x}", transfer.handle.0);
        }

        self.transfers.push(transfer);
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Transfer> {
        let index = self.transfers.iter().position(|t| t.handle == handle)?;
        Some(self.transfers.swap_remove(index))
    }

    /// Handle of the most recently recorded transfer.
    pub fn last_handle(&self) -> Option<Handle> {
        self.transfers.last().map(|t| t.handle)
    }
}
