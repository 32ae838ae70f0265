use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::UserId;

/// Settlement money split: `platform_fee + Σ winner amounts = total_pot`,
/// exactly, in integer units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub platform_fee: Amount,
    pub prize_pool: Amount,
    /// Winner payouts in the order the results were given.
    pub winner_amounts: Vec<(UserId, Amount)>,
}

/// `floor(total_pot × percent / 100)`.
pub fn platform_fee(total_pot: &Amount, percent: u32) -> Amount {
    total_pot.percent_floor(percent)
}

/// Even split of the prize pool. The remainder (`prize_pool mod n`
/// units) goes one unit each to the first winners in result order, so
/// the sum is exact and any two payouts differ by at most one unit.
pub fn split_evenly(prize_pool: &Amount, winners: &[UserId]) -> Vec<(UserId, Amount)> {
    let n = winners.len() as u64;
    let share = prize_pool.div_floor(n);
    let remainder = prize_pool.rem(n);
    winners
        .iter()
        .enumerate()
        .map(|(idx, user_id)| {
            let mut amount = share.clone();
            if (idx as u64) < remainder {
                amount += &Amount::from(1);
            }
            (user_id.clone(), amount)
        })
        .collect()
}

/// Explicit payouts must cover every winner and sum to the prize pool.
pub fn validate_explicit(
    prize_pool: &Amount,
    winner_amounts: &[(UserId, Amount)],
) -> Result<(), HubError> {
    let total: Amount = winner_amounts.iter().map(|(_, amount)| amount).sum();
    if &total != prize_pool {
        return Err(HubError::validation_field(
            "results",
            format!("explicit winAmounts sum to {total}, prize pool is {prize_pool}"),
        ));
    }
    Ok(())
}
