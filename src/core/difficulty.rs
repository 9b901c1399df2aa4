use crate::config::ChainParams;
use crate::core::Block;
use crate::error::{BlockchainError, Result};
use log::info;

const SECONDS_PER_MINUTE: i64 = 60;

/// Moving-window difficulty estimator, recalculated every `difficulty_interval` blocks
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// Difficulty for the block that will follow `blocks[0]`.
    ///
    /// `blocks` is the chain newest first, as returned by `Blockchain::all_blocks`.
    pub fn next_difficulty(params: &ChainParams, blocks: &[Block]) -> Result<u32> {
        let last = match blocks.first() {
            Some(block) => block,
            None => return Ok(params.default_difficulty),
        };

        let interval = params.difficulty_interval;
        if last.get_height() % interval != 0 {
            return Ok(last.get_difficulty());
        }

        let start = blocks.get((interval - 1) as usize).ok_or_else(|| {
            BlockchainError::StorageCorruption(format!(
                "Chain at height {} has only {} reachable blocks",
                last.get_height(),
                blocks.len()
            ))
        })?;

        let next = Self::recalculate(params, last, start);
        info!(
            "Difficulty recalculated at height {}: {} -> {next}",
            last.get_height(),
            last.get_difficulty()
        );
        Ok(next)
    }

    // Integer minutes, truncated twice, exactly as coarse as intended
    fn recalculate(params: &ChainParams, last: &Block, start: &Block) -> u32 {
        let actual_minutes = (last.get_timestamp() - start.get_timestamp()) / SECONDS_PER_MINUTE;
        let avg_minutes_per_block = actual_minutes / (params.difficulty_interval as i64 - 1);
        let current = last.get_difficulty();

        if avg_minutes_per_block <= params.target_minutes_per_block - params.tolerance_minutes {
            current + 1
        } else if avg_minutes_per_block
            >= params.target_minutes_per_block + params.tolerance_minutes
        {
            current.saturating_sub(1)
        } else {
            current
        }
    }
}
