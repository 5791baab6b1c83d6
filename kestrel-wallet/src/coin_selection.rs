//! Coin selection and the fee solver.
//!
//! `solve` works through the three fee categories in order and returns the
//! first that produces a valid funding: an exact zero-fee match, a dusty
//! change folded into the fee, or a normal change output with the fee
//! recomputed to a fixed point as input growth enlarges the transaction.

use std::convert::TryFrom;

use kestrel_chain::amount::{Amount, NonNegative};
use kestrel_chain::transparent::{Address, OutPoint, Output, Script};

use crate::fee::{
    self, estimate_size, fee_for_size, DEFAULT_FEE_PER_KB, MIN_NONDUST_OUTPUT,
    REFERENCE_DEFAULT_MIN_TX_FEE,
};
use crate::WalletError;

/// A payment to assemble.
#[derive(Clone, Debug)]
pub struct SendRequest {
    /// The outputs the caller wants, in order.
    pub outputs: Vec<Output>,
    /// Change destination; a fresh internal address when `None`.
    pub change_address: Option<Address>,
    /// An explicit fee floor. The solver may raise it, never lower it.
    pub fee: Option<Amount<NonNegative>>,
    /// Fee rate; [`DEFAULT_FEE_PER_KB`] when `None`.
    pub fee_per_kb: Option<Amount<NonNegative>>,
    /// Enforce the reference minimum fee when any output is below one
    /// cent.
    pub ensure_min_required_fee: bool,
    /// Allow spending unconfirmed (pending) outputs.
    pub allow_unconfirmed: bool,
}

impl SendRequest {
    /// A payment of `amount` to `address` with default policies.
    pub fn to(address: &Address, amount: Amount<NonNegative>) -> SendRequest {
        SendRequest {
            outputs: vec![Output {
                value: amount,
                lock_script: address.lock_script(),
            }],
            change_address: None,
            fee: None,
            fee_per_kb: None,
            ensure_min_required_fee: true,
            allow_unconfirmed: false,
        }
    }
}

/// A spendable output the wallet controls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// The output's location.
    pub outpoint: OutPoint,
    /// Its value.
    pub value: Amount<NonNegative>,
    /// Confirmation depth; zero for pending outputs.
    pub depth: u32,
    /// The lock script, used to find the signing key.
    pub lock_script: Script,
}

impl Candidate {
    fn priority_weight(&self) -> u128 {
        self.value.as_sat() as u128 * self.depth as u128
    }
}

/// Which category the solver settled on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeeCategory {
    /// Inputs match the payment exactly; high priority rides for free.
    ExactNoChange,
    /// Change was dust, so it became fee instead of an output.
    ChangeFoldedToFee,
    /// A normal change output.
    WithChange,
}

/// A funded payment plan.
#[derive(Clone, Debug)]
pub struct Solution {
    /// How it was funded.
    pub category: FeeCategory,
    /// The inputs to spend, in selection order.
    pub selected: Vec<Candidate>,
    /// The fee paid.
    pub fee: Amount<NonNegative>,
    /// The change to return, when a change output is wanted.
    pub change: Option<Amount<NonNegative>>,
}

fn sat(value: i64) -> Amount<NonNegative> {
    Amount::try_from(value).expect("small constant is in range")
}

/// Order candidates for selection: highest priority (value × depth) first,
/// largest value breaking ties.
fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.priority_weight()
            .cmp(&a.priority_weight())
            .then(b.value.cmp(&a.value))
    });
}

/// Accumulate sorted candidates until they cover `target`.
fn select(candidates: &[Candidate], target: Amount<NonNegative>) -> Option<(Vec<Candidate>, i64)> {
    let mut total: i64 = 0;
    let mut selected = Vec::new();
    for candidate in candidates {
        if total >= target.as_sat() {
            break;
        }
        total += candidate.value.as_sat();
        selected.push(candidate.clone());
    }
    if total >= target.as_sat() {
        Some((selected, total))
    } else {
        None
    }
}

/// Total priority of a selection funding a transaction of `size` bytes.
fn selection_priority(selected: &[Candidate], size: usize) -> u64 {
    let weight: u128 = selected.iter().map(Candidate::priority_weight).sum();
    (weight / size.max(1) as u128) as u64
}

/// Solve the funding problem for `request` over `candidates`.
pub fn solve(
    mut candidates: Vec<Candidate>,
    request: &SendRequest,
) -> Result<Solution, WalletError> {
    if !request.allow_unconfirmed {
        candidates.retain(|candidate| candidate.depth > 0);
    }
    sort_candidates(&mut candidates);

    let target = kestrel_chain::transparent::output_total(&request.outputs)?;
    let available: i64 = candidates.iter().map(|c| c.value.as_sat()).sum();

    let fee_per_kb = request.fee_per_kb.unwrap_or_else(|| sat(DEFAULT_FEE_PER_KB));
    let small_payment = request
        .outputs
        .iter()
        .any(|output| output.value.as_sat() < kestrel_chain::amount::CENT);

    // Category 1: an exact match with enough priority rides free — but an
    // explicit fee or mandatory minimum rules the free path out.
    if request.fee.is_none() && !(request.ensure_min_required_fee && small_payment) {
        if let Some((selected, total)) = select(&candidates, target) {
            if total == target.as_sat() {
                let size = estimate_size(selected.len(), request.outputs.len());
                if selection_priority(&selected, size) >= fee::FREE_PRIORITY_THRESHOLD {
                    return Ok(Solution {
                        category: FeeCategory::ExactNoChange,
                        selected,
                        fee: Amount::zero(),
                        change: None,
                    });
                }
            }
        }
    }

    // Categories 2 and 3: iterate fee and selection to a fixed point. The
    // loop is bounded: each round either the fee or the input count grows,
    // and both are capped.
    let mut fee = request.fee.unwrap_or_else(Amount::zero);
    let mut fee_includes_minimum = false;
    for _ in 0..candidates.len() + 4 {
        let needed = target.checked_add(fee)?;
        let (selected, total) = match select(&candidates, needed) {
            Some(found) => found,
            None => {
                let shortfall = needed.as_sat() - available;
                // Distinguish "can pay, can't fee" from plain poverty.
                let missing_min_fee = available >= target.as_sat() && fee_includes_minimum;
                return Err(WalletError::InsufficientFunds {
                    shortfall: Amount::try_from(shortfall)?,
                    missing_min_fee,
                });
            }
        };

        // Assume a change output for sizing; dropping it only shrinks the
        // transaction, which never invalidates the fee.
        let size = estimate_size(selected.len(), request.outputs.len() + 1);

        // The reference minimum fee applies when any output — including
        // the change this selection would produce — is below one cent.
        let provisional_change = total - target.as_sat() - fee.as_sat();
        let minimum_triggered = request.ensure_min_required_fee
            && (small_payment
                || (provisional_change > 0
                    && provisional_change < kestrel_chain::amount::CENT));
        let minimum = if minimum_triggered {
            sat(REFERENCE_DEFAULT_MIN_TX_FEE)
        } else {
            Amount::zero()
        };

        let required_fee = [
            request.fee.unwrap_or_else(Amount::zero),
            fee_for_size(size, fee_per_kb),
            minimum,
        ]
        .iter()
        .copied()
        .max()
        .expect("three candidates");

        if required_fee > fee {
            fee = required_fee;
            fee_includes_minimum = minimum_triggered && minimum >= required_fee;
            continue;
        }

        let change = total - target.as_sat() - fee.as_sat();
        debug_assert!(change >= 0, "selection covered target plus fee");

        if change == 0 {
            return Ok(Solution {
                category: FeeCategory::ChangeFoldedToFee,
                selected,
                fee,
                change: None,
            });
        }

        // Category 2: sub-dust change becomes fee only when the change
        // output's own marginal fee exceeds what it would carry. With
        // per-started-kilobyte pricing that marginal fee is zero unless
        // the output pushes the size over a kilobyte boundary, in which
        // case a dusty change output is pure waste.
        let size_without_change = estimate_size(selected.len(), request.outputs.len());
        let marginal_change_fee = fee_for_size(size, fee_per_kb).as_sat()
            - fee_for_size(size_without_change, fee_per_kb).as_sat();
        if change < MIN_NONDUST_OUTPUT && change < marginal_change_fee {
            return Ok(Solution {
                category: FeeCategory::ChangeFoldedToFee,
                selected,
                fee: fee.checked_add(Amount::try_from(change)?)?,
                change: None,
            });
        }

        return Ok(Solution {
            category: FeeCategory::WithChange,
            selected,
            fee,
            change: Some(Amount::try_from(change)?),
        });
    }

    // The fixed point always lands within the bound; reaching here means
    // the candidate set kept shrinking underneath us.
    Err(WalletError::InsufficientFunds {
        shortfall: Amount::zero(),
        missing_min_fee: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chain::amount::COIN;
    use kestrel_chain::transaction;

    fn candidate(index: u32, value: i64, depth: u32) -> Candidate {
        Candidate {
            outpoint: OutPoint {
                hash: transaction::Hash([index as u8; 32]),
                index,
            },
            value: sat(value),
            depth,
            lock_script: Script(vec![0x51]),
        }
    }

    fn request(amount: i64) -> SendRequest {
        SendRequest {
            outputs: vec![Output {
                value: sat(amount),
                lock_script: Script(vec![0x51]),
            }],
            change_address: None,
            fee: None,
            fee_per_kb: None,
            ensure_min_required_fee: false,
            allow_unconfirmed: false,
        }
    }

    #[test]
    fn exact_match_is_free() {
        // Deep confirmation: priority comfortably above the free
        // threshold.
        let candidates = vec![candidate(1, COIN, 1000)];
        let solution = solve(candidates, &request(COIN)).unwrap();
        assert_eq!(solution.category, FeeCategory::ExactNoChange);
        assert_eq!(solution.fee, Amount::zero());
        assert_eq!(solution.change, None);
    }

    #[test]
    fn exact_match_without_priority_pays_fee() {
        // Depth zero gives zero priority; the free path must not trigger.
        let mut req = request(COIN);
        req.allow_unconfirmed = true;
        let candidates = vec![candidate(1, COIN, 0), candidate(2, COIN, 0)];
        let solution = solve(candidates, &req).unwrap();
        assert_ne!(solution.category, FeeCategory::ExactNoChange);
        assert!(solution.fee > Amount::zero());
    }

    #[test]
    fn normal_change_output() {
        let candidates = vec![candidate(1, COIN, 10)];
        let solution = solve(candidates, &request(COIN / 2)).unwrap();
        assert_eq!(solution.category, FeeCategory::WithChange);
        let change = solution.change.unwrap();
        assert_eq!(
            change.as_sat() + solution.fee.as_sat() + COIN / 2,
            COIN
        );
    }

    #[test]
    fn sub_dust_change_kept_when_marginal_fee_is_zero() {
        // Candidate exceeds target + size fee by 300 sats: below the dust
        // bound, but the change output doesn't push the size over a
        // kilobyte boundary, so its marginal fee is zero and the change
        // stays an output.
        let fee = 1000;
        let extra = 300;
        let candidates = vec![candidate(1, COIN + fee + extra, 10)];
        let solution = solve(candidates, &request(COIN)).unwrap();
        assert_eq!(solution.category, FeeCategory::WithChange);
        assert_eq!(solution.change, Some(sat(extra)));
        assert_eq!(solution.fee, sat(fee));
    }

    #[test]
    fn dust_change_folds_when_marginal_fee_exceeds_it() {
        // Six inputs and three payments put the no-change size at exactly
        // one kilobyte; the change output would start a second one, so its
        // marginal fee (one full rate unit) dwarfs the 300-sat change.
        let candidates: Vec<Candidate> =
            (0..6).map(|i| candidate(i, 1_000_000, 10)).collect();
        let request = SendRequest {
            outputs: vec![
                Output {
                    value: sat(2_000_000),
                    lock_script: Script(vec![0x51]),
                },
                Output {
                    value: sat(2_000_000),
                    lock_script: Script(vec![0x52]),
                },
                Output {
                    value: sat(1_997_700),
                    lock_script: Script(vec![0x53]),
                },
            ],
            change_address: None,
            fee: None,
            fee_per_kb: Some(sat(1000)),
            ensure_min_required_fee: false,
            allow_unconfirmed: false,
        };

        let solution = solve(candidates, &request).unwrap();
        assert_eq!(solution.category, FeeCategory::ChangeFoldedToFee);
        assert_eq!(solution.selected.len(), 6);
        assert_eq!(solution.change, None);
        // The two-kilobyte size fee plus the folded 300-sat change.
        assert_eq!(solution.fee, sat(2300));
    }

    #[test]
    fn unconfirmed_excluded_by_default() {
        let candidates = vec![candidate(1, COIN, 0)];
        assert!(matches!(
            solve(candidates.clone(), &request(COIN / 2)),
            Err(WalletError::InsufficientFunds { .. })
        ));

        let mut req = request(COIN / 2);
        req.allow_unconfirmed = true;
        assert!(solve(candidates, &req).is_ok());
    }

    #[test]
    fn min_fee_applies_to_small_outputs() {
        let mut req = request(CENT_MINUS_ONE);
        req.ensure_min_required_fee = true;
        let candidates = vec![candidate(1, COIN, 10)];
        let solution = solve(candidates, &req).unwrap();
        assert!(solution.fee >= sat(REFERENCE_DEFAULT_MIN_TX_FEE));
    }

    const CENT_MINUS_ONE: i64 = kestrel_chain::amount::CENT - 1;

    #[test]
    fn min_fee_not_added_when_disabled() {
        let mut req = request(CENT_MINUS_ONE);
        req.ensure_min_required_fee = false;
        let candidates = vec![candidate(1, COIN, 10)];
        let solution = solve(candidates, &req).unwrap();
        assert!(solution.fee < sat(REFERENCE_DEFAULT_MIN_TX_FEE));
    }

    #[test]
    fn explicit_fee_is_a_floor() {
        let mut req = request(COIN / 2);
        req.fee = Some(sat(50_000));
        let candidates = vec![candidate(1, COIN, 10)];
        let solution = solve(candidates, &req).unwrap();
        assert!(solution.fee >= sat(50_000));
    }

    #[test]
    fn fee_growth_pulls_in_more_inputs() {
        // Paying 2000 sats with 1100-sat coins: the first selection covers
        // the target but not target+fee, so the solver must widen.
        let candidates: Vec<Candidate> =
            (0..10).map(|i| candidate(i, 1100, 10)).collect();
        let mut req = request(2000);
        req.fee_per_kb = Some(sat(1000));
        let solution = solve(candidates, &req).unwrap();
        let total: i64 = solution.selected.iter().map(|c| c.value.as_sat()).sum();
        assert!(total >= 2000 + solution.fee.as_sat());
        assert!(solution.selected.len() >= 3);
    }

    #[test]
    fn monotone_in_fee_rate() {
        // If a request succeeds at some rate, it succeeds at any lower one.
        let candidates: Vec<Candidate> = (0..5).map(|i| candidate(i, COIN, 5)).collect();
        for rate in [10_000i64, 5_000, 1_000, 0].iter() {
            let mut req = request(3 * COIN);
            req.fee_per_kb = Some(sat(*rate));
            assert!(solve(candidates.clone(), &req).is_ok(), "rate {}", rate);
        }
    }

    #[test]
    fn shortfall_is_reported() {
        let candidates = vec![candidate(1, 1000, 5)];
        match solve(candidates, &request(5000)) {
            Err(WalletError::InsufficientFunds {
                shortfall,
                missing_min_fee,
            }) => {
                assert!(shortfall.as_sat() >= 4000);
                assert!(!missing_min_fee);
            }
            other => panic!("expected insufficient funds, got {:?}", other.map(|_| ())),
        }
    }
}
