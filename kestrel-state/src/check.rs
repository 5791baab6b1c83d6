//! Header verification: proof of work, difficulty schedule, timestamps.

use chrono::{DateTime, Utc};

use kestrel_chain::{
    block::{self, StoredBlock},
    parameters::Network,
    work::difficulty::{retarget, ExpandedDifficulty, RETARGET_INTERVAL},
};

use crate::store::HeaderDb;
use crate::ChainError;

/// Check that `header`'s hash satisfies its own target and that the target
/// is within the network's limit.
///
/// Note: hash/target comparisons are 256-bit integer comparisons; greater
/// values represent *less* work.
pub(crate) fn proof_of_work_is_valid(
    header: &block::Header,
    network: Network,
) -> Result<(), ChainError> {
    let hash = header.hash();
    let target = header
        .difficulty_threshold
        .to_expanded()
        .ok_or(ChainError::InvalidDifficulty(hash))?;

    if target > ExpandedDifficulty::target_difficulty_limit(network) {
        return Err(ChainError::InvalidDifficulty(hash));
    }
    if hash > target {
        return Err(ChainError::ProofOfWork(hash));
    }
    Ok(())
}

/// Check `header`'s nBits against the difficulty adjustment schedule.
///
/// On a retarget boundary the new target is derived from the length of the
/// period just ended, with the adjustment ratio clamped to [1/4, 4]; on any
/// other height the bits must not change. Regtest never retargets.
pub(crate) fn difficulty_schedule_is_valid(
    db: &HeaderDb,
    parent: &StoredBlock,
    header: &block::Header,
    network: Network,
) -> Result<(), ChainError> {
    if !network.retargets() {
        return Ok(());
    }

    let height = match parent.height.next() {
        Some(height) => height,
        None => return Err(ChainError::Corrupt("parent height at maximum")),
    };

    let expected = if height.0 % RETARGET_INTERVAL == 0 {
        // The period being closed started RETARGET_INTERVAL - 1 blocks
        // above the parent.
        let period_start = db
            .ancestor(parent, RETARGET_INTERVAL - 1)?
            .ok_or(ChainError::Corrupt("retarget period reaches below genesis"))?;

        let timespan = parent
            .header
            .time
            .signed_duration_since(period_start.header.time)
            .num_seconds();

        let parent_target = parent
            .header
            .difficulty_threshold
            .to_expanded()
            .ok_or(ChainError::InvalidDifficulty(parent.hash()))?;

        retarget(parent_target, timespan, network)
    } else {
        parent.header.difficulty_threshold
    };

    if header.difficulty_threshold != expected {
        return Err(ChainError::BadRetarget {
            hash: header.hash(),
            actual: header.difficulty_threshold.0,
            expected: expected.0,
        });
    }
    Ok(())
}

/// Check `header`'s time against the median of its previous eleven
/// ancestors and against the local clock.
pub(crate) fn time_is_valid(
    db: &HeaderDb,
    parent: &StoredBlock,
    header: &block::Header,
    now: DateTime<Utc>,
) -> Result<(), ChainError> {
    let hash = header.hash();

    header
        .time_is_valid_at(now)
        .map_err(|source| ChainError::Time(hash, source))?;

    let mut ancestor_times = Vec::with_capacity(11);
    let mut cursor = Some(*parent);
    while let Some(ancestor) = cursor {
        ancestor_times.push(ancestor.header.time);
        if ancestor_times.len() == 11 || ancestor.height == block::Height(0) {
            break;
        }
        cursor = db.get(&ancestor.header.previous_block_hash)?;
    }

    header
        .time_is_past_median(&mut ancestor_times)
        .map_err(|source| ChainError::Time(hash, source))
}
