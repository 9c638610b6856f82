//! Kubernetes adapter for the remote-exec transport.
//!
//! Opens the pod exec subresource as a raw WebSocket and hands the binary
//! messages up as multiplexed frames; the demultiplexing itself lives in
//! [`crate::exec::stream`] so the protocol layers stay testable without a
//! cluster.

use crate::error::{LookoutError, Result};
use crate::exec::stream::FrameStream;
use futures::StreamExt;
use kube::api::AttachParams;
use kube::core::Request as ApiRequest;
use kube::Client;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;

/// Raw exec-channel access to pods in one namespace.
pub struct KubeExec {
    client: Client,
    namespace: String,
    container: Option<String>,
}

impl KubeExec {
    /// Connect using in-cluster or kubeconfig credentials.
    ///
    /// Returns `None` when no credentials resolve, which is the expected
    /// state outside an orchestrated environment; callers degrade instead of
    /// failing.
    pub async fn try_new(namespace: impl Into<String>, container: Option<String>) -> Option<Self> {
        match Client::try_default().await {
            Ok(client) => Some(Self {
                client,
                namespace: namespace.into(),
                container,
            }),
            Err(e) => {
                info!(
                    error = %e,
                    "kubernetes exec transport unavailable; node-disk features disabled"
                );
                None
            }
        }
    }

    /// Run a command in a pod and return the raw multiplexed frame stream.
    pub async fn open(&self, pod: &str, command: &[String]) -> Result<FrameStream> {
        let mut params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true);
        if let Some(container) = &self.container {
            params = params.container(container);
        }

        let path = format!("/api/v1/namespaces/{}/pods", self.namespace);
        let request = ApiRequest::new(path)
            .exec(pod, command.iter().map(String::as_str), &params)
            .map_err(|e| LookoutError::Exec(format!("building exec request: {}", e)))?;

        let ws = self.client.connect(request).await?;
        let frames = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Binary(frame)) => Some(Ok(frame)),
                Ok(_) => None,
                Err(e) => Some(Err(LookoutError::Exec(e.to_string()))),
            }
        });
        Ok(frames.boxed())
    }
}
