use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::auth::{IdentityProvider, SignatureVerifier};
use crate::engine::ContractEngine;
use crate::error::HubError;
use crate::ids::{ExternalAuthId, GameId, LobbyId};
use crate::lobby::{Lobby, LobbyService};
use crate::store::{CatalogStore, LedgerStore, UserStore};
use crate::user::User;

use super::dto::{
    BalanceResponse, CancelRequest, CancelResponse, ExecuteRequest, ExecuteResponse,
    HistoryQuery, HistoryResponse, JoinLobbyRequest, JoinLobbyResponse, LeaveLobbyResponse,
    LedgerEntryDto, LobbyListQuery, LobbySummaryDto, SettleRequest, SettleResponse,
};
use super::error::ApiError;
use super::logging::log_requests;
use super::sse::lobby_events;

const HISTORY_LIMIT_MAX: usize = 100;
const HISTORY_LIMIT_DEFAULT: usize = 50;

const GAME_ID_HEADER: &str = "x-game-id";
const SIGNATURE_HEADER: &str = "x-pluto-signature";

#[derive(Clone)]
pub struct ServerContext {
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub engine: Arc<ContractEngine>,
    pub lobby: Arc<LobbyService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub signatures: Arc<dyn SignatureVerifier>,
}

pub fn router(context: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/v1/me/balance", get(get_balance))
        .route("/v1/me/history", get(get_history))
        .route("/v1/contracts/execute", post(post_execute))
        .route("/v1/contracts/settle", post(post_settle))
        .route("/v1/contracts/cancel", post(post_cancel))
        .route("/v1/lobbies", get(list_lobbies))
        .route("/v1/lobbies/:id/status", get(lobby_status))
        .route("/v1/lobbies/:id/events", get(lobby_events))
        .route("/v1/lobby/join", post(join_lobby))
        .route("/v1/lobby/leave", post(leave_lobby))
        .layer(middleware::from_fn(log_requests))
        .layer(Extension(context))
}

/// Resolves the bearer credential to a hub account, provisioning one on
/// first authentication.
pub(super) async fn authenticate_player(
    ctx: &ServerContext,
    headers: &HeaderMap,
) -> Result<User, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(HubError::Unauthorized)?
        .to_str()
        .map_err(|_| HubError::Unauthorized)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(HubError::Unauthorized)?;
    let subject = ctx.identity.verify_bearer(token).await?;

    if let Some(user) = ctx.users.find_by_external_auth_id(&subject).await? {
        return Ok(user);
    }
    let user = ctx
        .engine
        .provision_user(&subject, &generated_display_name())
        .await?;
    Ok(user)
}

fn generated_display_name() -> String {
    format!("player_{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Verifies the game backend's MAC over the literal request body bytes.
fn authenticate_game(
    ctx: &ServerContext,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<GameId, ApiError> {
    let game_id: GameId = headers
        .get(GAME_ID_HEADER)
        .ok_or(HubError::Unauthorized)?
        .to_str()
        .map_err(|_| HubError::Unauthorized)?
        .into();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(HubError::Unauthorized)?
        .to_str()
        .map_err(|_| HubError::Unauthorized)?;
    if !ctx.signatures.verify(&game_id, body, signature) {
        return Err(HubError::InvalidSignature.into());
    }
    Ok(game_id)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| HubError::validation(format!("invalid request body: {err}")).into())
}

/// A game backend may only operate on its own contracts.
async fn ensure_contract_owner(
    ctx: &ServerContext,
    game_id: &GameId,
    contract_id: &crate::ids::ContractId,
) -> Result<(), ApiError> {
    let contract = ctx
        .catalog
        .find_contract(contract_id)
        .await?
        .ok_or(HubError::NotFound("contract"))?;
    if &contract.game_id != game_id {
        return Err(HubError::Forbidden.into());
    }
    Ok(())
}

async fn get_balance(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user = authenticate_player(&ctx, &headers).await?;
    Ok(Json(BalanceResponse::from_user(&user)))
}

async fn get_history(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user = authenticate_player(&ctx, &headers).await?;
    let limit = query
        .limit
        .unwrap_or(HISTORY_LIMIT_DEFAULT)
        .min(HISTORY_LIMIT_MAX);
    let offset = query.offset.unwrap_or(0);
    let (rows, total) = ctx.ledger.history(&user.user_id, limit, offset).await?;
    let has_more = offset + rows.len() < total;
    Ok(Json(HistoryResponse {
        data: rows.into_iter().map(LedgerEntryDto::from_entry).collect(),
        total,
        limit,
        offset,
        has_more,
    }))
}

async fn post_execute(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let game_id = authenticate_game(&ctx, &headers, &body)?;
    let request: ExecuteRequest = parse_body(&body)?;
    ensure_contract_owner(&ctx, &game_id, &request.contract_id).await?;

    let player_ids: Vec<ExternalAuthId> = request
        .player_ids
        .iter()
        .map(|raw| ExternalAuthId::from(raw.as_str()))
        .collect();
    let outcome = ctx.engine.execute(&request.contract_id, &player_ids).await?;
    ctx.lobby
        .notify_game_started(&request.contract_id, &outcome.session.session_id)
        .await?;
    Ok(Json(ExecuteResponse::from_outcome(outcome)))
}

async fn post_settle(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SettleResponse>, ApiError> {
    let game_id = authenticate_game(&ctx, &headers, &body)?;
    let request: SettleRequest = parse_body(&body)?;

    let claims = ctx.engine.verify_token(&request.session_token)?;
    ensure_contract_owner(&ctx, &game_id, &claims.contract_id).await?;

    let results: Vec<_> = request
        .results
        .into_iter()
        .map(|dto| dto.into_input())
        .collect();
    let outcome = ctx.engine.settle(&request.session_token, &results).await?;
    Ok(Json(SettleResponse::from_outcome(outcome)))
}

async fn post_cancel(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CancelResponse>, ApiError> {
    let game_id = authenticate_game(&ctx, &headers, &body)?;
    let request: CancelRequest = parse_body(&body)?;

    let claims = ctx.engine.verify_token(&request.session_token)?;
    ensure_contract_owner(&ctx, &game_id, &claims.contract_id).await?;

    let outcome = ctx
        .engine
        .cancel(&request.session_token, request.reason.as_deref())
        .await?;
    Ok(Json(CancelResponse::from_outcome(outcome)))
}

async fn list_lobbies(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Query(query): Query<LobbyListQuery>,
) -> Result<Json<Vec<LobbySummaryDto>>, ApiError> {
    let lobbies = ctx.lobby.list(query.contract_id.as_ref()).await?;
    Ok(Json(
        lobbies.iter().map(LobbySummaryDto::from_lobby).collect(),
    ))
}

async fn lobby_status(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Json<Lobby>, ApiError> {
    let lobby = ctx.lobby.status(&lobby_id).await?;
    Ok(Json(lobby))
}

async fn join_lobby(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    Json(request): Json<JoinLobbyRequest>,
) -> Result<Json<JoinLobbyResponse>, ApiError> {
    let user = authenticate_player(&ctx, &headers).await?;
    let output = ctx.lobby.join(&user.user_id, &request.contract_id).await?;
    Ok(Json(JoinLobbyResponse::from_output(output)))
}

async fn leave_lobby(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
) -> Result<Json<LeaveLobbyResponse>, ApiError> {
    let user = authenticate_player(&ctx, &headers).await?;
    let lobby = ctx.lobby.leave(&user.user_id).await?;
    Ok(Json(LeaveLobbyResponse {
        success: true,
        lobby_id: lobby.lobby_id,
    }))
}
