use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures::Stream;
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use crate::ids::{LobbyId, SubscriberId};
use crate::lobby::LobbyEventRegistry;

use super::error::ApiError;
use super::routes::ServerContext;

/// Comment frames keeping long-lived connections healthy; clients ignore
/// them and they never signal a state change.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Drops the registry entry as soon as the SSE stream goes away, rather
/// than waiting for the next broadcast to notice the dead sink.
struct SubscriptionGuard {
    registry: Arc<LobbyEventRegistry>,
    lobby_id: LobbyId,
    subscriber_id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.lobby_id, &self.subscriber_id);
    }
}

/// `GET /v1/lobbies/:id/events`, the lobby's live event stream. No
/// replay: a reconnecting client re-syncs through the status snapshot.
pub async fn lobby_events(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(lobby_id): Path<LobbyId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before subscribing; the stream itself cannot fail later.
    ctx.lobby.status(&lobby_id).await?;

    let registry = Arc::clone(ctx.lobby.registry());
    let (subscriber_id, rx) = registry.subscribe(&lobby_id);
    let guard = SubscriptionGuard {
        registry,
        lobby_id,
        subscriber_id,
    };

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _keepalive = &guard;
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string());
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text(" heartbeat"),
    ))
}
