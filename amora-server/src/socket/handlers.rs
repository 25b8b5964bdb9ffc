use std::sync::Arc;

use serde::Serialize;
use socketioxide::extract::SocketRef;
use uuid::Uuid;

use amora_shared::middleware::validate_jwt;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

fn presence_key(user_id: Uuid) -> String {
    format!("presence:{user_id}")
}

fn get_user_id(socket: &SocketRef) -> Option<Uuid> {
    socket.extensions.get::<Uuid>()
}

pub async fn on_connect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let user_id = match authenticate_socket(&socket, &state) {
        Ok(id) => id,
        Err(msg) => {
            tracing::warn!(error = %msg, "push socket auth failed");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "AUTH_FAILED".into(),
                    message: msg,
                },
            );
            socket.disconnect().ok();
            return;
        }
    };

    socket.extensions.insert(user_id);
    socket.join(user_room(user_id)).ok();

    tracing::info!(user_id = %user_id, sid = %socket.id, "push socket connected");
    refresh_presence(&state, user_id).await;

    let _ = socket.emit("connected", &serde_json::json!({ "user_id": user_id }));

    socket.on("heartbeat", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                if let Some(user_id) = get_user_id(&socket) {
                    refresh_presence(&state, user_id).await;
                }
            }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                on_disconnect_with_state(socket, state).await;
            }
        }
    });
}

async fn refresh_presence(state: &AppState, user_id: Uuid) {
    if let Err(e) = state
        .redis
        .set(&presence_key(user_id), "1", state.config.presence_ttl)
        .await
    {
        tracing::warn!(error = %e, user_id = %user_id, "presence refresh failed");
    }
}

async fn on_disconnect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let Some(user_id) = get_user_id(&socket) else {
        return;
    };
    tracing::info!(user_id = %user_id, sid = %socket.id, "push socket disconnected");

    // Another tab or device may still hold the room.
    let still_connected = state
        .io
        .within(user_room(user_id))
        .sockets()
        .map(|sockets| sockets.iter().any(|s| s.id != socket.id))
        .unwrap_or(false);
    if still_connected {
        return;
    }

    if let Err(e) = state.redis.del(&presence_key(user_id)).await {
        tracing::warn!(error = %e, user_id = %user_id, "presence cleanup failed");
    }
}

/// Value of `token` in a raw query string.
pub fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut split = pair.splitn(2, '=');
        let key = split.next()?;
        let value = split.next()?;
        (key == "token" && !value.is_empty()).then(|| value.to_string())
    })
}

fn authenticate_socket(socket: &SocketRef, state: &AppState) -> Result<Uuid, String> {
    let parts = socket.req_parts();
    let query = parts.uri.query().unwrap_or_default();
    let token = token_from_query(query).ok_or_else(|| "missing token query parameter".to_string())?;

    let claims = validate_jwt(&token, &state.config.jwt_secret).map_err(|e| format!("invalid token: {e}"))?;
    if claims.is_expired() {
        return Err("token has expired".into());
    }
    Ok(claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_read_from_any_position() {
        assert_eq!(token_from_query("token=abc").as_deref(), Some("abc"));
        assert_eq!(token_from_query("EIO=4&transport=websocket&token=xyz").as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(token_from_query("EIO=4&transport=polling"), None);
        assert_eq!(token_from_query("token="), None);
        assert_eq!(token_from_query(""), None);
    }

    #[test]
    fn rooms_are_keyed_by_user() {
        let id = Uuid::nil();
        assert_eq!(user_room(id), "user:00000000-0000-0000-0000-000000000000");
    }
}
