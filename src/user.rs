use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::HubError;
use crate::ids::{ExternalAuthId, UserId};

pub const DISPLAY_NAME_MIN: usize = 3;
pub const DISPLAY_NAME_MAX: usize = 20;

/// A hub account. Created on first successful authentication for a new
/// external subject; never deleted. Balances are mutated only through the
/// contract engine and the deposit flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub external_auth_id: ExternalAuthId,
    pub display_name: String,
    pub balance: Amount,
    pub locked_balance: Amount,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// `balance − locked`; derived, never stored independently.
    pub fn available_balance(&self) -> Amount {
        self.balance
            .checked_sub(&self.locked_balance)
            .unwrap_or_else(Amount::zero)
    }
}

/// The (total, locked) pair a conditional balance update compares against
/// and the shape every balance write takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceState {
    pub balance: Amount,
    pub locked: Amount,
}

impl BalanceState {
    pub fn of(user: &User) -> Self {
        Self {
            balance: user.balance.clone(),
            locked: user.locked_balance.clone(),
        }
    }

    /// Invariants enforced at every write; a violation is a programmer
    /// error and must fail the enclosing transaction.
    pub fn check_invariants(&self) -> Result<(), HubError> {
        if self.locked > self.balance {
            return Err(HubError::internal(
                "balance invariant violated: locked exceeds total",
            ));
        }
        Ok(())
    }
}

/// Row data for provisioning a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_auth_id: ExternalAuthId,
    pub display_name: String,
}

pub fn validate_display_name(name: &str) -> Result<(), HubError> {
    let len = name.chars().count();
    if !(DISPLAY_NAME_MIN..=DISPLAY_NAME_MAX).contains(&len) {
        return Err(HubError::validation_field(
            "displayName",
            format!("must be {DISPLAY_NAME_MIN}-{DISPLAY_NAME_MAX} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(HubError::validation_field(
            "displayName",
            "may only contain letters, digits, underscore and hyphen",
        ));
    }
    Ok(())
}
