// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for connecting to a VMI's serial console.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::MaybeTlsStream;
use tracing::info;
use vmi_api_types::ObjectId;

// re-export as an escape hatch for crate-version-matching problems
pub use tokio_tungstenite::{tungstenite, WebSocketStream};

use crate::{client::SUBRESOURCE_API_PREFIX, Client, Error};

/// A websocket connected to a VMI's serial console. Console bytes travel in
/// binary frames in both directions.
pub type ConsoleStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl Client {
    /// Returns the websocket URL of the console endpoint for the VMI `id`.
    pub fn console_url(&self, id: &ObjectId) -> Result<String, Error> {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(Error::InvalidRequest(format!(
                "base URL {base} is not an http(s) URL"
            )));
        };

        Ok(format!(
            "{ws_base}{SUBRESOURCE_API_PREFIX}/namespaces/{}/\
             virtualmachineinstances/{}/console",
            id.namespace, id.name
        ))
    }

    /// Opens a websocket to the serial console of the VMI `id`.
    pub async fn console(&self, id: &ObjectId) -> Result<ConsoleStream, Error> {
        let url = self.console_url(id)?;
        let mut req = url.as_str().into_client_request()?;
        if let Some(token) = self.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| {
                    Error::InvalidRequest(format!("bad bearer token: {e}"))
                })?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (stream, rsp) = tokio_tungstenite::connect_async(req).await?;
        info!(%url, status = %rsp.status(), "connected to VMI console");
        Ok(stream)
    }
}
