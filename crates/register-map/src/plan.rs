//! Batching of catalog reads into as few Modbus requests as possible.

use crate::{Region, RegisterMap};

/// Protocol ceiling for FC03/FC04 reads.
pub const MAX_REGISTERS_PER_READ: u16 = 125;
/// Protocol ceiling for FC01/FC02 reads.
pub const MAX_BITS_PER_READ: u16 = 2000;

/// One Modbus read request covering a run of catalog entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBlock {
    pub region: Region,
    pub start: u16,
    pub count: u16,
    /// Catalog keys decoded from this block, in address order.
    pub keys: Vec<String>,
}

/// Group defs per region, sort by address, and merge runs whose gap does not
/// exceed `max_gap` addresses. Blocks never cross the per-request ceiling.
pub fn build_read_plan(map: &RegisterMap, max_gap: u16) -> Vec<ReadBlock> {
    let mut blocks = Vec::new();

    for region in [
        Region::Coil,
        Region::DiscreteInput,
        Region::Holding,
        Region::Input,
    ] {
        let mut defs: Vec<_> = map.iter().filter(|def| def.region == region).collect();
        if defs.is_empty() {
            continue;
        }
        defs.sort_by_key(|def| def.address);

        let limit = if region.is_bit() {
            MAX_BITS_PER_READ
        } else {
            MAX_REGISTERS_PER_READ
        };

        let mut current: Option<ReadBlock> = None;
        for def in defs {
            let span = def.word_span();
            let def_end = u32::from(def.address) + u32::from(span);

            if let Some(block) = current.as_mut() {
                let block_end = u32::from(block.start) + u32::from(block.count);
                let gap = u32::from(def.address).saturating_sub(block_end);
                let merged_count = def_end - u32::from(block.start);
                if gap <= u32::from(max_gap) && merged_count <= u32::from(limit) {
                    block.count = merged_count as u16;
                    block.keys.push(def.key.clone());
                    continue;
                }
            }
            if let Some(block) = current.take() {
                blocks.push(block);
            }

            current = Some(ReadBlock {
                region,
                start: def.address,
                count: span,
                keys: vec![def.key.clone()],
            });
        }
        if let Some(block) = current {
            blocks.push(block);
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataType, RegisterDef, RegisterMap};

    fn input(key: &str, address: u16, data_type: DataType) -> RegisterDef {
        RegisterDef::new(key, key, address, Region::Input, data_type)
    }

    #[test]
    fn merges_contiguous_and_gapped_runs() {
        let map = RegisterMap::new(vec![
            input("a", 100, DataType::Float32),
            input("b", 102, DataType::Float32),
            input("c", 110, DataType::Uint16),
        ])
        .expect("map");

        let plan = build_read_plan(&map, 8);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].start, 100);
        assert_eq!(plan[0].count, 11);
        assert_eq!(plan[0].keys, vec!["a", "b", "c"]);

        let plan = build_read_plan(&map, 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].count, 4);
        assert_eq!(plan[1].start, 110);
    }

    #[test]
    fn splits_regions_and_respects_limit() {
        let map = RegisterMap::new(vec![
            RegisterDef::new("sw", "sw", 0, Region::Coil, DataType::Bool),
            input("far", 0, DataType::Uint16),
            input("away", 200, DataType::Uint16),
        ])
        .expect("map");

        let plan = build_read_plan(&map, 500);
        // Coils stay separate from input registers; 0..=200 exceeds 125 words.
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|block| block.count <= MAX_REGISTERS_PER_READ
            || block.region.is_bit()));
    }
}
