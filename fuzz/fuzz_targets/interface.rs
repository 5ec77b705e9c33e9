// SPDX-FileCopyrightText: Copyright The ffa-proxy Contributors.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Converting from 8 registers to an `Interface` then back to 8 registers. Check if original and
//! the processed register values match.

#![no_main]

use ffa_proxy::Interface;
use libfuzzer_sys::fuzz_target;
use zerocopy::transmute;

fuzz_target!(|data: &[u8]| {
    const REG_COUNT: usize = 8;
    const SIZE: usize = core::mem::size_of::<u64>() * REG_COUNT;

    if data.len() < SIZE {
        return;
    }

    let data_bytes: [u8; SIZE] = data[0..SIZE].try_into().unwrap();
    let mut regs_in: [u64; REG_COUNT] = transmute!(data_bytes);

    // Mask function ID to 32 bits
    regs_in[0] &= 0x0000_0000_ffff_ffff;

    if let Ok(interface) = Interface::try_from(regs_in) {
        let mut regs_out = [0; REG_COUNT];
        interface.copy_to_array(&mut regs_out);

        // Decoding ignores SBZ bits and the upper half of 32-bit calls, encoding clears them
        for (reg_in, reg_out) in regs_in.iter().zip(regs_out) {
            if *reg_in & reg_out != reg_out {
                panic!(
                    "Register values are not matching: {:?}\n in: {:#x?}\nout{:#x?}\n",
                    interface, regs_in, regs_out
                );
            }
        }

        assert_eq!(Interface::try_from(regs_out).ok(), Some(interface));
    }
});
