use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::catalog::Contract;
use crate::error::HubError;
use crate::ids::{ContractId, LobbyId, UserId};

use super::types::{Lobby, LobbyPlayer, LobbyStatus};

/// Owns lobby rows and membership. Compound operations are atomic so the
/// capacity bound and the one-lobby-per-user rule hold at every
/// observable instant.
#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn find(&self, lobby_id: &LobbyId) -> Result<Option<Lobby>, HubError>;

    async fn list(&self, contract_id: Option<&ContractId>) -> Result<Vec<Lobby>, HubError>;

    async fn find_active_by_user(&self, user_id: &UserId) -> Result<Option<Lobby>, HubError>;

    /// Find-or-create the `WAITING` lobby for a contract and admit the
    /// player. A lobby that reaches `max_players` transitions to
    /// `STARTING` within the same operation, so `WAITING` always implies
    /// spare capacity.
    async fn admit(&self, contract: &Contract, player: LobbyPlayer) -> Result<Lobby, HubError>;

    /// Remove the user from their current lobby; an emptied lobby is
    /// closed within the same operation.
    async fn remove_player(&self, user_id: &UserId) -> Result<Lobby, HubError>;

    async fn set_status(&self, lobby_id: &LobbyId, status: LobbyStatus)
        -> Result<Lobby, HubError>;

    /// The non-closed lobby currently gathering or playing a contract.
    async fn find_open_by_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Lobby>, HubError>;
}

#[derive(Default)]
struct LobbyTable {
    lobbies: HashMap<LobbyId, Lobby>,
    by_user: HashMap<UserId, LobbyId>,
}

/// In-process lobby store; one lock guards the table, held only for the
/// duration of a membership change.
pub struct InMemoryLobbyStore {
    table: Mutex<LobbyTable>,
}

impl InMemoryLobbyStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LobbyTable::default()),
        }
    }
}

impl Default for InMemoryLobbyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LobbyStore for InMemoryLobbyStore {
    async fn find(&self, lobby_id: &LobbyId) -> Result<Option<Lobby>, HubError> {
        Ok(self.table.lock().lobbies.get(lobby_id).cloned())
    }

    async fn list(&self, contract_id: Option<&ContractId>) -> Result<Vec<Lobby>, HubError> {
        let table = self.table.lock();
        let mut lobbies: Vec<Lobby> = table
            .lobbies
            .values()
            .filter(|lobby| !lobby.status.is_terminal())
            .filter(|lobby| contract_id.map_or(true, |id| &lobby.contract_id == id))
            .cloned()
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(lobbies)
    }

    async fn find_active_by_user(&self, user_id: &UserId) -> Result<Option<Lobby>, HubError> {
        let table = self.table.lock();
        Ok(table
            .by_user
            .get(user_id)
            .and_then(|id| table.lobbies.get(id))
            .filter(|lobby| !lobby.status.is_terminal())
            .cloned())
    }

    async fn admit(&self, contract: &Contract, player: LobbyPlayer) -> Result<Lobby, HubError> {
        let mut table = self.table.lock();

        if let Some(current) = table
            .by_user
            .get(&player.user_id)
            .and_then(|id| table.lobbies.get(id))
        {
            if !current.status.is_terminal() {
                return Err(HubError::AlreadyInLobby);
            }
        }

        let existing = table
            .lobbies
            .values()
            .find(|lobby| {
                lobby.contract_id == contract.contract_id && lobby.status.accepts_players()
            })
            .map(|lobby| lobby.lobby_id.clone());

        let lobby_id = match existing {
            Some(id) => id,
            None => {
                let lobby = Lobby {
                    lobby_id: LobbyId::generate(),
                    contract_id: contract.contract_id.clone(),
                    status: LobbyStatus::Waiting,
                    players: Vec::new(),
                    created_at: Utc::now(),
                };
                let id = lobby.lobby_id.clone();
                table.lobbies.insert(id.clone(), lobby);
                id
            }
        };

        let user_id = player.user_id.clone();
        let lobby = table
            .lobbies
            .get_mut(&lobby_id)
            .expect("lobby row just resolved");
        if lobby.players.len() as u32 >= contract.max_players {
            return Err(HubError::LobbyFull);
        }
        lobby.players.push(player);
        if lobby.players.len() as u32 == contract.max_players {
            lobby.status = LobbyStatus::Starting;
        }
        let snapshot = lobby.clone();
        table.by_user.insert(user_id, lobby_id);
        Ok(snapshot)
    }

    async fn remove_player(&self, user_id: &UserId) -> Result<Lobby, HubError> {
        let mut table = self.table.lock();
        let lobby_id = table
            .by_user
            .get(user_id)
            .cloned()
            .ok_or(HubError::NotFound("lobby"))?;
        let lobby = table
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(HubError::NotFound("lobby"))?;
        if lobby.status.is_terminal() {
            return Err(HubError::NotFound("lobby"));
        }
        lobby.players.retain(|p| &p.user_id != user_id);
        if lobby.players.is_empty() {
            lobby.status = LobbyStatus::Closed;
        }
        let snapshot = lobby.clone();
        table.by_user.remove(user_id);
        Ok(snapshot)
    }

    async fn set_status(
        &self,
        lobby_id: &LobbyId,
        status: LobbyStatus,
    ) -> Result<Lobby, HubError> {
        let mut table = self.table.lock();
        let lobby = table
            .lobbies
            .get_mut(lobby_id)
            .ok_or(HubError::NotFound("lobby"))?;
        lobby.status = status;
        let snapshot = lobby.clone();
        if status.is_terminal() {
            let members: Vec<UserId> = snapshot.players.iter().map(|p| p.user_id.clone()).collect();
            for user_id in members {
                table.by_user.remove(&user_id);
            }
        }
        Ok(snapshot)
    }

    async fn find_open_by_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Lobby>, HubError> {
        let table = self.table.lock();
        Ok(table
            .lobbies
            .values()
            .find(|lobby| &lobby.contract_id == contract_id && !lobby.status.is_terminal())
            .cloned())
    }
}
