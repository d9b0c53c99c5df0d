// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use vmi_api_types::{
    Event, List, ObjectId, Pod, PodSelector, VirtualMachineInstance,
};

use crate::{ControlPlane, Error};

const VMI_API_PREFIX: &str = "/apis/kubevirt.io/v1";
const CORE_API_PREFIX: &str = "/api/v1";
pub(crate) const SUBRESOURCE_API_PREFIX: &str =
    "/apis/subresources.kubevirt.io/v1";

/// How long a single API request may take unless overridden with
/// [`Client::with_request_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client for the control-plane API.
#[derive(Clone, Debug)]
pub struct Client {
    base_url: String,
    bearer_token: Option<String>,
    request_timeout: Duration,
    http: reqwest::Client,
}

impl Client {
    /// Creates a client that sends requests to the server at `base_url`, e.g.
    /// `https://127.0.0.1:6443`.
    pub fn new(base_url: &str) -> Self {
        Self::new_with_client(base_url, reqwest::Client::new())
    }

    pub fn new_with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http,
        }
    }

    /// Attaches `token` as a bearer token to every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Fails any request that has not completed within `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    fn vmis_url(&self, namespace: &str) -> String {
        format!(
            "{}{VMI_API_PREFIX}/namespaces/{namespace}/virtualmachineinstances",
            self.base_url
        )
    }

    fn vmi_url(&self, id: &ObjectId) -> String {
        format!("{}/{}", self.vmis_url(&id.namespace), id.name)
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}{CORE_API_PREFIX}/namespaces/{namespace}/pods", self.base_url)
    }

    fn events_url(&self, namespace: &str) -> String {
        format!(
            "{}{CORE_API_PREFIX}/namespaces/{namespace}/events",
            self.base_url
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.http.request(method, url).timeout(self.request_timeout);
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        what: &str,
        req: RequestBuilder,
    ) -> Result<T, Error> {
        let rsp = Self::check(what, req.send().await?).await?;
        Ok(rsp.json().await?)
    }

    /// Converts a non-success response into the corresponding error.
    async fn check(what: &str, rsp: Response) -> Result<Response, Error> {
        let status = rsp.status();
        debug!(what, %status, "control plane response");
        if status.is_success() {
            return Ok(rsp);
        }

        let body = rsp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound(what.to_string()),
            StatusCode::CONFLICT => {
                Error::AlreadyExists { what: what.to_string() }
            }
            _ => Error::Status {
                what: what.to_string(),
                status: status.as_u16(),
                body,
            },
        })
    }
}

#[async_trait]
impl ControlPlane for Client {
    async fn create_vmi(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<VirtualMachineInstance, Error> {
        let what = format!("VMI {}", vmi.id());
        let req = self
            .request(Method::POST, &self.vmis_url(&vmi.metadata.namespace))
            .json(vmi);
        Self::send_json(&what, req).await
    }

    async fn get_vmi(
        &self,
        id: &ObjectId,
    ) -> Result<VirtualMachineInstance, Error> {
        let what = format!("VMI {id}");
        Self::send_json(&what, self.request(Method::GET, &self.vmi_url(id)))
            .await
    }

    async fn delete_vmi(&self, id: &ObjectId) -> Result<(), Error> {
        let what = format!("VMI {id}");
        let rsp = self.request(Method::DELETE, &self.vmi_url(id)).send().await?;
        Self::check(&what, rsp).await?;
        Ok(())
    }

    async fn list_vmis(
        &self,
        namespace: &str,
    ) -> Result<Vec<VirtualMachineInstance>, Error> {
        let what = format!("VMIs in namespace {namespace}");
        let list: List<VirtualMachineInstance> = Self::send_json(
            &what,
            self.request(Method::GET, &self.vmis_url(namespace)),
        )
        .await?;
        Ok(list.items)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<Vec<Pod>, Error> {
        let what = format!("pods in namespace {namespace}");
        let req = self.request(Method::GET, &self.pods_url(namespace)).query(&[
            ("labelSelector", selector.label_selector()),
            ("fieldSelector", selector.field_selector()),
        ]);
        let list: List<Pod> = Self::send_json(&what, req).await?;
        Ok(list.items)
    }

    async fn list_events(
        &self,
        namespace: &str,
        involved_uid: &str,
    ) -> Result<Vec<Event>, Error> {
        let what = format!("events in namespace {namespace}");
        let req = self
            .request(Method::GET, &self.events_url(namespace))
            .query(&[("fieldSelector", format!("involvedObject.uid={involved_uid}"))]);
        let list: List<Event> = Self::send_json(&what, req).await?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use vmi_api_types::{ObjectMeta, VmiPhase, VmiSpec};

    /// Serves a single HTTP request with the supplied status line and JSON
    /// body. The returned task yields the raw request that was received.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = conn.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            conn.write_all(response.as_bytes()).await.unwrap();
            conn.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{addr}"), task)
    }

    #[tokio::test]
    async fn create_posts_to_namespace_collection() {
        let mut returned = VirtualMachineInstance::new(
            ObjectMeta::new("ns", "testvmi-a"),
            VmiSpec::default(),
        );
        returned.metadata.uid = Some("abcd".to_string());
        returned.status.phase = VmiPhase::Scheduling;

        let (url, server) =
            serve_once("201 Created", serde_json::to_string(&returned).unwrap())
                .await;
        let client = Client::new(&url).with_bearer_token("sekrit");

        let submitted = VirtualMachineInstance::new(
            ObjectMeta::new("ns", "testvmi-a"),
            VmiSpec::default(),
        );
        let created = client.create_vmi(&submitted).await.unwrap();
        assert_eq!(created.uid(), Some("abcd"));
        assert_eq!(created.status.phase, VmiPhase::Scheduling);

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "POST /apis/kubevirt.io/v1/namespaces/ns/virtualmachineinstances "
        ));
        assert!(request.to_lowercase().contains("authorization: bearer sekrit"));
        assert!(request.contains("\"name\":\"testvmi-a\""));
    }

    #[tokio::test]
    async fn missing_vmi_is_not_found() {
        let (url, server) = serve_once(
            "404 Not Found",
            r#"{"kind":"Status","reason":"NotFound"}"#.to_string(),
        )
        .await;
        let client = Client::new(&url);

        let err = client
            .delete_vmi(&ObjectId::new("ns", "testvmi-gone"))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "unexpected error {err:?}");

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "DELETE /apis/kubevirt.io/v1/namespaces/ns/virtualmachineinstances/testvmi-gone "
        ));
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_body() {
        let (url, _server) =
            serve_once("500 Internal Server Error", "\"boom\"".to_string())
                .await;
        let client = Client::new(&format!("{url}/"));

        match client.get_vmi(&ObjectId::new("ns", "vm")).await {
            Err(Error::Status { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "\"boom\"");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_conn, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let client = Client::new(&format!("http://{addr}"))
            .with_request_timeout(Duration::from_millis(100));
        match client.get_vmi(&ObjectId::new("ns", "vm")).await {
            Err(Error::Communication(e)) => assert!(e.is_timeout(), "{e:?}"),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pod_list_sends_selectors() {
        let (url, server) =
            serve_once("200 OK", r#"{"items":[]}"#.to_string()).await;
        let client = Client::new(&url);

        let pods = client
            .list_pods("ns", &PodSelector::unfinished_vmi_pods("u1"))
            .await
            .unwrap();
        assert!(pods.is_empty());

        let request = server.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /api/v1/namespaces/ns/pods?"));
        assert!(request_line.contains("labelSelector=kubevirt.io%3Dvirt-launcher"));
        assert!(request_line.contains("fieldSelector=status.phase%21%3DSucceeded"));
    }
}
