#![no_main]
use libfuzzer_sys::fuzz_target;
use tierpool::{PoolBlock, PoolConfig, TieredPool};

// Each 4-byte chunk is one operation: opcode, 16-bit size, slot.
fuzz_target!(|data: &[u8]| {
    let Ok(pool) = TieredPool::new(
        PoolConfig {
            tiny_cell_size: 64,
            tiny_cells: 8,
            small_threshold: 512,
            small_capacity: 4,
            medium_threshold: 2048,
            medium_capacity: 2,
            ..PoolConfig::default()
        },
        tierpool::LibcHeap,
    ) else {
        return;
    };
    let mut slots: Vec<Option<(PoolBlock<'_, _>, u8)>> = (0..16).map(|_| None).collect();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let slot = chunk[3] as usize % slots.len();
        let tag = chunk[3] | 1;

        if let Some((block, old)) = &slots[slot] {
            assert!(block.as_slice().iter().all(|b| b == old), "block damaged");
        }

        match chunk[0] % 4 {
            0 => {
                if let Some(mut block) = PoolBlock::allocate(&pool, size) {
                    block.fill(tag);
                    slots[slot] = Some((block, tag));
                }
            }
            1 => slots[slot] = None,
            2 => {
                if let Some((block, old)) = slots[slot].take() {
                    match block.resize(size) {
                        Ok(mut block) => {
                            block.fill(old);
                            slots[slot] = Some((block, old));
                        }
                        Err(block) => slots[slot] = Some((block, old)),
                    }
                }
            }
            _ => {
                let alignment = 1usize << (chunk[1] % 13);
                if let Some(mut block) = PoolBlock::aligned(&pool, size, alignment) {
                    assert_eq!(block.as_ptr().addr() % alignment, 0);
                    block.fill(tag);
                    slots[slot] = Some((block, tag));
                }
            }
        }
    }

    drop(slots);
    let snap = pool.snapshot();
    assert_eq!(snap.tiny_free, snap.tiny_cells);
    assert_eq!(snap.counters.total_allocations, snap.counters.total_releases);
});
