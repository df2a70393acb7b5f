//! Client implementation of the ROS1 Slave API, used for talking to peer
//! nodes: topic negotiation, publisher updates and remote shutdown.

use dxr::{DxrError, TryFromValue, TryToParams, Value};
use url::Url;

use crate::{
    tcpros::TCPROS_PROTOCOL,
    xmlrpc::protocol::client::{Client, ClientError},
};

type SlaveResult<D> = Result<D, SlaveClientError>;

#[derive(thiserror::Error, Debug)]
pub enum SlaveClientError {
    #[error(transparent)]
    Dxr(#[from] DxrError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Client for another node's slave API.
#[derive(Clone)]
pub struct SlaveClient {
    client: Client,
    caller_id: String,
}

impl SlaveClient {
    pub fn new(slave_uri: &Url, caller_id: impl Into<String>) -> Self {
        SlaveClient {
            client: Client::new(slave_uri.clone()),
            caller_id: caller_id.into(),
        }
    }

    async fn call<P: TryToParams, D: TryFromValue>(
        &self,
        method: &str,
        params: P,
    ) -> SlaveResult<D> {
        let result = self.client.call_raw(method, params.try_to_params()?).await?;
        Ok(D::try_from_value(&result)?)
    }

    /// Negotiate a topic channel, offering only TCPROS.
    ///
    /// Returns the publisher's listener endpoint, or `None` when the
    /// publisher picked none of the offered protocols.
    pub async fn request_topic(&self, topic_name: &str) -> SlaveResult<Option<(String, u16)>> {
        let offered = vec![vec![TCPROS_PROTOCOL.to_string()]];

        let selected: Value = self
            .call("requestTopic", (&self.caller_id, topic_name, offered))
            .await?;

        // An empty selection means the publisher declined every offer.
        match <(String, String, i32)>::try_from_value(&selected) {
            Ok((protocol, host, port)) if protocol == TCPROS_PROTOCOL => {
                Ok(Some((host, port as u16)))
            }
            _ => Ok(None),
        }
    }

    /// Push a fresh publisher list for a topic the peer subscribes to.
    pub async fn publisher_update(
        &self,
        topic_name: &str,
        publisher_uris: &[String],
    ) -> SlaveResult<()> {
        self.call::<_, i32>(
            "publisherUpdate",
            (&self.caller_id, topic_name, publisher_uris.to_vec()),
        )
        .await?;

        Ok(())
    }

    /// Get the master URI the peer is registered with.
    pub async fn get_master_uri(&self) -> SlaveResult<String> {
        self.call("getMasterUri", self.caller_id.as_str()).await
    }

    /// Ask the peer to shut down.
    pub async fn shutdown(&self, reason: &str) -> SlaveResult<()> {
        // The resulting i32 is intentionally ignored per the API docs.
        self.call::<_, i32>("shutdown", (&self.caller_id, reason))
            .await?;

        Ok(())
    }

    /// Get the peer's process ID.
    pub async fn get_pid(&self) -> SlaveResult<i32> {
        self.call("getPid", self.caller_id.as_str()).await
    }

    /// Topics the peer subscribes to, as `(topic, type)` pairs.
    pub async fn get_subscriptions(&self) -> SlaveResult<Vec<(String, String)>> {
        self.call("getSubscriptions", self.caller_id.as_str()).await
    }

    /// Topics the peer publishes, as `(topic, type)` pairs.
    pub async fn get_publications(&self) -> SlaveResult<Vec<(String, String)>> {
        self.call("getPublications", self.caller_id.as_str()).await
    }
}
