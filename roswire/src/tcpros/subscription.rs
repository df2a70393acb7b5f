//! Subscriber side of a topic: publisher tracking, connection negotiation
//! and the per-publisher read tasks.
//!
//! Incoming frames never touch user code directly. Each one becomes a job
//! on the node's job channel, and the registered callbacks run when the
//! user thread pumps `spin`/`spin_once`.

use std::{
    collections::{BTreeSet, HashMap},
    io,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, span, trace, warn, Instrument, Level};
use url::Url;

use crate::{
    node::Job,
    tcpros::{
        self,
        header::{self, HeaderError, PublisherHeader, SubscriberHeader},
        CompatibilityError, Topic, HANDSHAKE_TIMEOUT,
    },
    xmlrpc::{SlaveClient, SlaveClientError},
};

/// A type-erased message callback. Decoding happens inside, so the
/// subscription can store callbacks for any message type uniformly.
pub type TopicCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("Incompatible peer: {0}")]
    Compatibility(#[from] CompatibilityError),
    #[error("Slave API call failed: {0}")]
    Slave(#[from] SlaveClientError),
    #[error("Invalid publisher URI: {0}")]
    Url(#[from] url::ParseError),
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

/// One subscribed topic with its callbacks and publisher links.
pub struct Subscription {
    topic: Topic,
    callbacks: Arc<RwLock<Vec<TopicCallback>>>,
    connected: Arc<RwLock<BTreeSet<String>>>,
    pub_list_tx: watch::Sender<Vec<String>>,
    cancel_token: CancellationToken,
    coordinator_task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(
        topic: &Topic,
        caller_id: &str,
        tcp_nodelay: bool,
        job_tx: mpsc::Sender<Job>,
    ) -> Result<Self, SubscriptionError> {
        let header = SubscriberHeader {
            caller_id: caller_id.to_string(),
            topic: topic.name.clone(),
            md5sum: topic.spec.md5sum.clone(),
            msg_type: topic.spec.msg_type.clone(),
            msg_definition: topic.spec.msg_definition.clone(),
            tcp_nodelay,
        };
        let header_bytes = header::to_bytes(&header)?;

        let callbacks = Arc::new(RwLock::new(Vec::new()));
        let connected = Arc::new(RwLock::new(BTreeSet::new()));
        let (pub_list_tx, pub_list_rx) = watch::channel(Vec::new());
        let cancel_token = CancellationToken::new();

        let span = span!(
            parent: None,
            Level::DEBUG,
            "subscription_coordinator",
            topic = topic.name.clone(),
        );

        let coordinator = Coordinator {
            topic: topic.clone(),
            caller_id: caller_id.to_string(),
            header_bytes,
            callbacks: callbacks.clone(),
            connected: connected.clone(),
            job_tx,
            cancel_token: cancel_token.clone(),
        };

        let coordinator_task = tokio::spawn(
            async move {
                trace!("Subscription coordinator task started");
                coordinator.run(pub_list_rx).await;
                trace!("Subscription coordinator task exited");
            }
            .instrument(span),
        );

        Ok(Subscription {
            topic: topic.clone(),
            callbacks,
            connected,
            pub_list_tx,
            cancel_token,
            coordinator_task,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Append a callback. Callbacks run in registration order for every
    /// delivered message.
    pub fn add_callback(&self, callback: TopicCallback) {
        self.callbacks.write().unwrap().push(callback);
    }

    /// Hand the coordinator a fresh publisher URI list. Latest-wins: an
    /// unprocessed previous list is simply replaced.
    pub fn update_publishers(&self, publisher_uris: Vec<String>) {
        let _ = self.pub_list_tx.send(publisher_uris);
    }

    /// URIs of the publishers currently connected.
    pub fn connected_publishers(&self) -> BTreeSet<String> {
        self.connected.read().unwrap().clone()
    }

    /// Disconnect every publisher and join the reader tasks.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.coordinator_task.await {
            warn!("Subscription coordinator task panicked: {e}");
        }
    }
}

struct PeerLink {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

struct Coordinator {
    topic: Topic,
    caller_id: String,
    header_bytes: Vec<u8>,
    callbacks: Arc<RwLock<Vec<TopicCallback>>>,
    connected: Arc<RwLock<BTreeSet<String>>>,
    job_tx: mpsc::Sender<Job>,
    cancel_token: CancellationToken,
}

impl Coordinator {
    async fn run(self, mut pub_list_rx: watch::Receiver<Vec<String>>) {
        let mut peers: HashMap<String, PeerLink> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    trace!("Subscription coordinator stopped by cancel token");
                    break;
                }

                changed = pub_list_rx.changed() => {
                    if changed.is_err() {
                        debug!("Publisher list channel for subscription was closed");
                        break;
                    }

                    let targets: BTreeSet<String> =
                        pub_list_rx.borrow_and_update().iter().cloned().collect();
                    self.sync_peers(&mut peers, targets).await;
                }
            }
        }

        for (_, link) in peers.drain() {
            link.cancel_token.cancel();
            let _ = link.task.await;
        }
    }

    /// Diff the advertised URI set against the live links: connect to new
    /// publishers, drop removed ones, and retry peers whose link died.
    async fn sync_peers(&self, peers: &mut HashMap<String, PeerLink>, targets: BTreeSet<String>) {
        let stale: Vec<String> = peers
            .iter()
            .filter(|(uri, link)| !targets.contains(*uri) || link.task.is_finished())
            .map(|(uri, _)| uri.clone())
            .collect();

        for uri in stale {
            if let Some(link) = peers.remove(&uri) {
                debug!("Dropping publisher link: [uri: \"{uri}\"]");
                link.cancel_token.cancel();
                let _ = link.task.await;
            }
        }

        for uri in targets {
            if peers.contains_key(&uri) {
                continue;
            }

            match self.connect(&uri).await {
                Ok(Some(link)) => {
                    peers.insert(uri, link);
                }
                Ok(None) => {
                    debug!("Publisher offered no TCPROS channel: [uri: \"{uri}\"]");
                }
                Err(e @ SubscriptionError::Compatibility(_)) => {
                    warn!("Rejected publisher: [uri: \"{uri}\", error: \"{e}\"]");
                }
                Err(e) => {
                    warn!("Failed to connect to publisher: [uri: \"{uri}\", error: \"{e}\"]");
                }
            }
        }
    }

    /// Negotiate a channel with one publisher and spawn its read task.
    ///
    /// Returns `Ok(None)` when the peer declines to offer TCPROS.
    async fn connect(&self, publisher_uri: &str) -> Result<Option<PeerLink>, SubscriptionError> {
        let slave = SlaveClient::new(&Url::parse(publisher_uri)?, &self.caller_id);
        let Some((host, port)) = slave.request_topic(&self.topic.name).await? else {
            return Ok(None);
        };

        trace!("Publisher channel ready: [address: \"{host}:{port}\"]");

        let mut publisher_stream = TcpStream::connect((host.as_str(), port)).await?;

        let publisher_header: PublisherHeader =
            timeout(HANDSHAKE_TIMEOUT, async {
                publisher_stream.write_all(&self.header_bytes).await?;
                header::from_async_read(&mut publisher_stream)
                    .await
                    .map_err(SubscriptionError::from)
            })
            .await
            .map_err(|_| SubscriptionError::HandshakeTimeout)??;

        self.topic.spec.validate_publisher(&publisher_header)?;

        if publisher_header.latching {
            debug!(
                "Publisher is latching: [publisher_id: \"{}\"]",
                publisher_header.caller_id
            );
        }

        let span = span!(
            Level::DEBUG,
            "publisher_link",
            publisher_id = publisher_header.caller_id,
            publisher_uri = publisher_uri,
        );

        let cancel_token = self.cancel_token.child_token();
        let callbacks = self.callbacks.clone();
        let connected = self.connected.clone();
        let job_tx = self.job_tx.clone();
        let uri = publisher_uri.to_string();

        connected.write().unwrap().insert(uri.clone());

        let task = {
            let cancel_token = cancel_token.clone();

            tokio::spawn(
                async move {
                    debug!("Publisher link task started");

                    match Self::read_task(publisher_stream, callbacks, job_tx, cancel_token).await {
                        Ok(_) => trace!("Publisher link task exited"),
                        Err(e) => debug!("Publisher link closed: {e}"),
                    }

                    connected.write().unwrap().remove(&uri);
                }
                .instrument(span),
            )
        };

        Ok(Some(PeerLink { cancel_token, task }))
    }

    async fn read_task(
        mut publisher_stream: TcpStream,
        callbacks: Arc<RwLock<Vec<TopicCallback>>>,
        job_tx: mpsc::Sender<Job>,
        cancel_token: CancellationToken,
    ) -> Result<(), io::Error> {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Publisher link task stopped by cancel token");
                    break;
                }

                frame = tcpros::read_frame(&mut publisher_stream) => {
                    let payload = Bytes::from(frame?);
                    let callbacks = callbacks.clone();

                    let job: Job = Box::new(move || {
                        // Snapshot under the lock, invoke outside it, so a
                        // callback can itself subscribe without deadlocking.
                        let snapshot: Vec<TopicCallback> =
                            callbacks.read().unwrap().iter().cloned().collect();
                        for callback in snapshot {
                            callback(&payload);
                        }
                    });

                    if job_tx.send(job).await.is_err() {
                        debug!("Job channel closed, dropping publisher link");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
