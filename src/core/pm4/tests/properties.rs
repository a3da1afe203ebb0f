// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Property tests for packet walking and register writes

use proptest::prelude::*;

use crate::core::gpu::registers::{
    CONFIG_REG_BASE, CONTEXT_REG_BASE, REGISTER_COUNT, SH_REG_BASE, UCONFIG_REG_BASE,
};
use crate::core::pm4::{CommandProcessor, PacketIter, PacketWriter};
use crate::core::renderer::RecordingRenderer;
use crate::core::test_support::context;

fn background(i: usize) -> u32 {
    (i as u32).wrapping_mul(0x9E37_79B9) | 1
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nop_stream_advances_by_count_plus_two(counts in prop::collection::vec(0u32..200, 1..40)) {
        let mut pw = PacketWriter::new();
        for &count in &counts {
            pw.nop(count as usize + 1);
        }
        let words = pw.finish();

        let mut iter = PacketIter::new(&words);
        let mut expected_offset = 0;
        for &count in &counts {
            let packet = iter.next().unwrap().unwrap();
            prop_assert_eq!(packet.offset, expected_offset);
            prop_assert_eq!(packet.header.count, count);
            expected_offset += count as usize + 2;
        }
        prop_assert!(iter.next().is_none());
        prop_assert_eq!(iter.position(), words.len());
        prop_assert_eq!(expected_offset, words.len());

        let (mut ctx, _) = context();
        let mut renderer = RecordingRenderer::default();
        let stats = CommandProcessor::new().process(&mut ctx, &mut renderer, &words).unwrap();
        prop_assert_eq!(stats.packets, counts.len() as u64);
        prop_assert_eq!(stats.draws, 0);
    }

    #[test]
    fn set_reg_writes_exactly_its_range(
        class in 0usize..4,
        offset in 0u32..0x200,
        payload in prop::collection::vec(any::<u32>(), 1..32),
    ) {
        let base = [CONFIG_REG_BASE, SH_REG_BASE, CONTEXT_REG_BASE, UCONFIG_REG_BASE][class];
        let start = base + offset;

        let (mut ctx, _) = context();
        let pattern: Vec<u32> = (0..REGISTER_COUNT).map(background).collect();
        ctx.regs.write_range(0, &pattern).unwrap();

        let mut pw = PacketWriter::new();
        match class {
            0 => pw.set_config_reg(start, &payload),
            1 => pw.set_sh_reg(start, &payload),
            2 => pw.set_context_reg(start, &payload),
            _ => pw.set_uconfig_reg(start, &payload),
        };

        let mut renderer = RecordingRenderer::default();
        CommandProcessor::new().process(&mut ctx, &mut renderer, pw.as_slice()).unwrap();

        let range = start as usize..start as usize + payload.len();
        for i in 0..REGISTER_COUNT {
            let expected = if range.contains(&i) {
                payload[i - range.start]
            } else {
                background(i)
            };
            prop_assert_eq!(ctx.regs.read(i as u32), expected, "register 0x{:X}", i);
        }
    }
}
