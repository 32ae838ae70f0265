use std::collections::BTreeMap;

use crate::amount::Amount;

/// Closed error taxonomy for every hub operation. Each kind carries a
/// stable wire code and an HTTP status; business errors surface to callers
/// unchanged, infrastructure errors collapse to `Internal`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("missing credential")]
    Unauthorized,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("invalid request signature")]
    InvalidSignature,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },
    #[error("session already settled")]
    AlreadySettled,
    #[error("user is already in a lobby")]
    AlreadyInLobby,
    #[error("display name is taken")]
    DisplayNameTaken,
    #[error("duplicate execution")]
    DuplicateExecution,
    #[error("concurrent update conflict")]
    ConcurrencyConflict,
    #[error("lobby is full")]
    LobbyFull,
    #[error("lobby is not ready")]
    LobbyNotReady,
    #[error("session expired")]
    SessionExpired,
    #[error("game is not active")]
    GameNotActive,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("validation error: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, String>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn validation_field(field: impl Into<String>, detail: impl Into<String>) -> Self {
        let field = field.into();
        let detail = detail.into();
        Self::Validation {
            message: format!("{field}: {detail}"),
            fields: BTreeMap::from([(field, detail)]),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable SCREAMING_SNAKE wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AlreadySettled => "ALREADY_SETTLED",
            Self::AlreadyInLobby => "ALREADY_IN_LOBBY",
            Self::DisplayNameTaken => "DISPLAY_NAME_TAKEN",
            Self::DuplicateExecution => "DUPLICATE_EXECUTION",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::LobbyFull => "LOBBY_FULL",
            Self::LobbyNotReady => "LOBBY_NOT_READY",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::GameNotActive => "GAME_NOT_ACTIVE",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized | Self::InvalidToken | Self::InvalidSignature => 401,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::InsufficientFunds { .. } => 402,
            Self::AlreadySettled
            | Self::AlreadyInLobby
            | Self::DisplayNameTaken
            | Self::DuplicateExecution
            | Self::ConcurrencyConflict => 409,
            Self::LobbyFull
            | Self::LobbyNotReady
            | Self::SessionExpired
            | Self::GameNotActive
            | Self::InvalidState(_) => 422,
            Self::Validation { .. } => 400,
            Self::Internal(_) => 500,
        }
    }
}
