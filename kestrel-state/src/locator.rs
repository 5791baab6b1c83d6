//! Block locator construction.

use kestrel_chain::block;

/// The heights a `getheaders` locator samples: the last ten blocks, then
/// exponentially sparser steps back to genesis.
///
/// The remote peer scans the locator for the first hash it knows, so dense
/// recent coverage finds the fork point of a short reorg cheaply while the
/// exponential tail bounds the list at ~32 entries for any chain length.
pub fn block_locator_heights(tip_height: block::Height) -> Vec<block::Height> {
    let mut heights = Vec::new();
    let mut step = 1u32;
    let mut height = tip_height.0 as i64;

    while height > 0 {
        heights.push(block::Height(height as u32));
        if heights.len() >= 10 {
            step = step.saturating_mul(2);
        }
        height -= step as i64;
    }
    heights.push(block::Height(0));
    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_chain_is_dense() {
        let heights = block_locator_heights(block::Height(5));
        assert_eq!(
            heights,
            vec![
                block::Height(5),
                block::Height(4),
                block::Height(3),
                block::Height(2),
                block::Height(1),
                block::Height(0)
            ]
        );
    }

    #[test]
    fn long_chain_is_logarithmic() {
        let heights = block_locator_heights(block::Height(700_000));
        assert_eq!(heights.first(), Some(&block::Height(700_000)));
        assert_eq!(heights.last(), Some(&block::Height(0)));
        // Ten dense entries then doubling steps.
        assert_eq!(heights[9], block::Height(700_000 - 9));
        assert_eq!(heights[10], block::Height(700_000 - 9 - 2));
        assert!(heights.len() < 45);

        // Strictly decreasing.
        for pair in heights.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn genesis_only() {
        assert_eq!(block_locator_heights(block::Height(0)), vec![block::Height(0)]);
    }
}
