use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::StreamExt;
use tracing::{debug, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridge one client into the hub until either side goes away.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (subscriber, mut outbound) = state.hub.channel();
    let id = match state.hub.connect(subscriber) {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "Rejected subscriber");
            return;
        }
    };

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if socket.send(Message::Text(message.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) if text.as_str() == "close" => {
                    debug!(client_id = id, "Client requested close");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    state.hub.disconnect(id);
}
