use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::engine::{CancelOutcome, ExecuteOutcome, SettleOutcome, SettleResultInput};
use crate::ids::{ContractId, LobbyId, SessionId, UserId};
use crate::ledger::{EntryType, LedgerEntry};
use crate::lobby::{JoinLobbyOutput, Lobby, LobbyStatus};
use crate::session::SessionStatus;
use crate::user::User;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: Amount,
    pub locked_balance: Amount,
    pub available_balance: Amount,
}

impl BalanceResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            balance: user.balance.clone(),
            locked_balance: user.locked_balance.clone(),
            available_balance: user.available_balance(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryDto {
    pub entry_id: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryDto {
    pub fn from_entry(entry: LedgerEntry) -> Self {
        Self {
            entry_id: entry.entry_id.to_string(),
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            session_id: entry.session_id,
            description: entry.description,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub data: Vec<LedgerEntryDto>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub contract_id: ContractId,
    /// External subject identifiers, as known to the game backend.
    pub player_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlayerDto {
    pub user_id: UserId,
    pub amount_locked: Amount,
    pub is_winner: bool,
    pub win_amount: Amount,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub session_id: SessionId,
    pub session_token: String,
    pub status: SessionStatus,
    pub players: Vec<SessionPlayerDto>,
    pub total_pot: Amount,
    pub expires_at: DateTime<Utc>,
}

impl ExecuteResponse {
    pub fn from_outcome(outcome: ExecuteOutcome) -> Self {
        let session = outcome.session;
        Self {
            session_id: session.session_id,
            session_token: outcome.session_token,
            status: session.status,
            players: session
                .players
                .into_iter()
                .map(|p| SessionPlayerDto {
                    user_id: p.user_id,
                    amount_locked: p.amount_locked,
                    is_winner: p.is_winner,
                    win_amount: p.win_amount,
                })
                .collect(),
            total_pot: session.total_pot,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResultDto {
    pub player_id: UserId,
    pub is_winner: bool,
    #[serde(default)]
    pub win_amount: Option<Amount>,
}

impl SettleResultDto {
    pub fn into_input(self) -> SettleResultInput {
        SettleResultInput {
            player_id: self.player_id,
            is_winner: self.is_winner,
            win_amount: self.win_amount,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub session_token: String,
    pub results: Vec<SettleResultDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerDto {
    pub player_id: UserId,
    pub win_amount: Amount,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub session_id: SessionId,
    pub winners: Vec<WinnerDto>,
    pub platform_fee_collected: Amount,
}

impl SettleResponse {
    pub fn from_outcome(outcome: SettleOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            winners: outcome
                .winners
                .into_iter()
                .map(|(player_id, win_amount)| WinnerDto {
                    player_id,
                    win_amount,
                })
                .collect(),
            platform_fee_collected: outcome.platform_fee,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub session_token: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub session_id: SessionId,
    pub refunded_players: Vec<UserId>,
}

impl CancelResponse {
    pub fn from_outcome(outcome: CancelOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            refunded_players: outcome.refunded_players,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyListQuery {
    pub contract_id: Option<ContractId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummaryDto {
    pub lobby_id: LobbyId,
    pub contract_id: ContractId,
    pub status: LobbyStatus,
    pub player_count: usize,
    pub created_at: DateTime<Utc>,
}

impl LobbySummaryDto {
    pub fn from_lobby(lobby: &Lobby) -> Self {
        Self {
            lobby_id: lobby.lobby_id.clone(),
            contract_id: lobby.contract_id.clone(),
            status: lobby.status,
            player_count: lobby.players.len(),
            created_at: lobby.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyRequest {
    pub contract_id: ContractId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyResponse {
    pub lobby_id: LobbyId,
    pub contract_id: ContractId,
    pub status: LobbyStatus,
    pub position: usize,
    pub player_count: usize,
    pub is_ready: bool,
}

impl JoinLobbyResponse {
    pub fn from_output(output: JoinLobbyOutput) -> Self {
        Self {
            lobby_id: output.lobby.lobby_id.clone(),
            contract_id: output.lobby.contract_id.clone(),
            status: output.lobby.status,
            position: output.position,
            player_count: output.lobby.players.len(),
            is_ready: output.is_ready,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveLobbyResponse {
    pub success: bool,
    pub lobby_id: LobbyId,
}
