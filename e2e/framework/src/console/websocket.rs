// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console channels carried over a websocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{error, info, info_span, Instrument};
use vmi_api_types::ObjectId;
use vmi_client::Client;

use super::{ChannelError, ConsoleChannel, ConsoleFactory};
use crate::HarnessError;

/// A console whose bytes travel in binary websocket frames. A background
/// task shuttles frames between the socket and a pair of channels.
pub struct WsConsole {
    ws_task: JoinHandle<()>,
    output_rx: mpsc::Receiver<Vec<u8>>,
    input_tx: Option<mpsc::Sender<Vec<u8>>>,
}

async fn websocket_handler<S>(
    mut ws: WebSocketStream<S>,
    output_tx: mpsc::Sender<Vec<u8>>,
    mut input_rx: mpsc::Receiver<Vec<u8>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        if output_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(s))) => {
                        if output_tx.send(s.into_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(..))) => {
                        info!("console socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(%e, "console socket failed");
                        break;
                    }
                    None => {
                        info!("console socket returned None");
                        break;
                    }
                    _ => continue,
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(bytes) => {
                        if let Err(e) = ws.send(Message::Binary(bytes)).await {
                            error!(%e, "failed to send input to console socket");
                            break;
                        }
                    }
                    None => {
                        info!("console input channel closed");
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    }
}

impl WsConsole {
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (output_tx, output_rx) = mpsc::channel(16);
        let (input_tx, input_rx) = mpsc::channel(16);

        let ws_span = info_span!("console websocket task");
        ws_span.follows_from(tracing::Span::current());
        let ws_task = tokio::spawn(
            async move { websocket_handler(ws, output_tx, input_rx).await }
                .instrument(ws_span),
        );

        Self { ws_task, output_rx, input_tx: Some(input_tx) }
    }
}

#[async_trait]
impl ConsoleChannel for WsConsole {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let tx = self.input_tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(bytes.to_vec()).await.map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        self.output_rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        // Dropping the input sender asks the handler to send a close frame
        // and exit. Closing the output side keeps the handler from blocking
        // on output nobody will read.
        if self.input_tx.take().is_some() {
            self.output_rx.close();
            if let Err(e) = (&mut self.ws_task).await {
                if !e.is_cancelled() {
                    return Err(ChannelError::Transport(e.to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Drop for WsConsole {
    fn drop(&mut self) {
        self.ws_task.abort();
    }
}

/// Opens consoles through the control plane's console subresource.
pub struct WsConsoleFactory {
    client: Client,
}

impl WsConsoleFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConsoleFactory for WsConsoleFactory {
    async fn open(
        &self,
        vmi: &ObjectId,
    ) -> Result<Box<dyn ConsoleChannel>, HarnessError> {
        let ws = self.client.console(vmi).await?;
        Ok(Box::new(WsConsole::new(ws)))
    }
}
