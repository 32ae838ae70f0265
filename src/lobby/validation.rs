use crate::amount::Amount;
use crate::catalog::Contract;
use crate::error::HubError;

/// A lobby only ever gathers players for a contract they could execute.
pub fn ensure_contract_joinable(contract: &Contract) -> Result<(), HubError> {
    if !contract.is_active {
        return Err(HubError::GameNotActive);
    }
    Ok(())
}

/// Advisory funds precheck at admission. Nothing is locked here; the
/// authoritative lock happens at execute time.
pub fn ensure_entry_fee_covered(
    available: &Amount,
    contract: &Contract,
) -> Result<(), HubError> {
    if available < &contract.entry_fee {
        return Err(HubError::InsufficientFunds {
            required: contract.entry_fee.clone(),
            available: available.clone(),
        });
    }
    Ok(())
}
