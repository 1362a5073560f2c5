use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut pushes) = state.sessions.open();
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            let text = match serde_json::to_string(&push) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(%connection, error = %err, "push not serializable");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // invalid requests are logged by the session and ignored
                    let _ = state.sessions.handle_text(connection, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(%connection, error = %err, "websocket receive failed");
                    break;
                }
            },
        }
    }

    state.sessions.close(connection);
    writer.abort();
}
