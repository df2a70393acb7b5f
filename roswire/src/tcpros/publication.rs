//! Publisher side of a topic: the TCP listener and its per-subscriber
//! send tasks.

use std::{collections::BTreeSet, io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{
        broadcast::{self, error::RecvError},
        RwLock,
    },
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, span, trace, warn, Instrument, Level};

use crate::tcpros::{
    header::{self, HeaderError, PublisherHeader, SubscriberHeader},
    CompatibilityError, Topic, HANDSHAKE_TIMEOUT,
};

#[derive(thiserror::Error, Debug)]
pub enum PublicationError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("Incompatible peer: {0}")]
    Compatibility(#[from] CompatibilityError),
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

/// An advertised topic with its TCP listener.
///
/// Outgoing messages fan out through a broadcast channel; every connected
/// subscriber gets its own receiver, so a slow peer lags and loses the
/// oldest queued payloads instead of stalling `publish` or other peers.
pub struct Publication {
    topic: Topic,
    address: SocketAddr,
    subscriber_ids: Arc<RwLock<BTreeSet<String>>>,
    data_tx: broadcast::Sender<Bytes>,
    cancel_token: CancellationToken,
    listener_task: JoinHandle<()>,
}

impl Publication {
    pub async fn new(
        address: SocketAddr,
        topic: &Topic,
        caller_id: &str,
        queue_size: usize,
        tcp_nodelay: bool,
        latching: bool,
    ) -> Result<Self, PublicationError> {
        let tcp_listener = TcpListener::bind(address).await?;
        let bound_addr = tcp_listener.local_addr()?;

        let header = PublisherHeader {
            caller_id: caller_id.to_string(),
            topic: topic.name.clone(),
            md5sum: topic.spec.md5sum.clone(),
            msg_type: topic.spec.msg_type.clone(),
            msg_definition: topic.spec.msg_definition.clone(),
            latching,
        };
        let header_bytes = header::to_bytes(&header)?;

        let subscriber_ids = Arc::new(RwLock::new(BTreeSet::new()));
        let (data_tx, data_rx) = broadcast::channel(queue_size.max(1));
        let cancel_token = CancellationToken::new();

        let span = span!(
            parent: None,
            Level::DEBUG,
            "publication_listener",
            topic = topic.name.clone(),
            address = bound_addr.to_string(),
        );

        let listener_task = {
            let topic = topic.clone();
            let subscriber_ids = subscriber_ids.clone();
            let cancel_token = cancel_token.clone();

            tokio::spawn(
                async move {
                    trace!("Publication listener task started");

                    Self::listener_task(
                        topic,
                        header,
                        header_bytes,
                        tcp_nodelay,
                        subscriber_ids,
                        data_rx,
                        tcp_listener,
                        cancel_token,
                    )
                    .await;

                    trace!("Publication listener task exited");
                }
                .instrument(span),
            )
        };

        Ok(Publication {
            topic: topic.clone(),
            address: bound_addr,
            subscriber_ids,
            data_tx,
            cancel_token,
            listener_task,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Address of the TCP listener handed out through `requestTopic`.
    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    pub fn data_sender(&self) -> broadcast::Sender<Bytes> {
        self.data_tx.clone()
    }

    /// Shared set of connected subscriber caller IDs.
    pub fn subscriber_ids(&self) -> Arc<RwLock<BTreeSet<String>>> {
        self.subscriber_ids.clone()
    }

    /// Close the listener and every peer socket, then join the send tasks.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.listener_task.await {
            warn!("Publication listener task panicked: {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn listener_task(
        topic: Topic,
        header: PublisherHeader,
        header_bytes: Vec<u8>,
        tcp_nodelay: bool,
        subscriber_ids: Arc<RwLock<BTreeSet<String>>>,
        mut data_rx: broadcast::Receiver<Bytes>,
        tcp_listener: TcpListener,
        cancel_token: CancellationToken,
    ) {
        let mut peer_tasks = JoinSet::new();
        let mut latched_message: Option<Bytes> = None;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Publication listener task stopped by cancel token");
                    break;
                }

                // The latch tracks the most recent payload so late joiners
                // receive it right after their handshake.
                message = data_rx.recv(), if header.latching => {
                    match message {
                        Ok(payload) => latched_message = Some(payload),
                        Err(RecvError::Lagged(lagged)) => {
                            warn!("Publication latch is lagging: [lagged_message_count: {lagged}]");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Internal data channel for publication was closed");
                            break;
                        }
                    }
                }

                connection = tcp_listener.accept() => {
                    let (subscriber_stream, peer_addr) = match connection {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!("Failed to accept subscriber connection: {e}");
                            continue;
                        }
                    };

                    let (subscriber_stream, subscriber_header) = match Self::setup_connection(
                        &topic,
                        &header_bytes,
                        tcp_nodelay,
                        subscriber_stream,
                    )
                    .await
                    {
                        Ok(connection) => connection,
                        Err(e) => {
                            warn!("Rejected subscriber at {peer_addr}: {e}");
                            continue;
                        }
                    };

                    let subscriber_id = subscriber_header.caller_id;
                    subscriber_ids.write().await.insert(subscriber_id.clone());

                    let span = span!(
                        Level::DEBUG,
                        "subscriber_link",
                        subscriber_id = subscriber_id,
                        subscriber_addr = peer_addr.to_string(),
                    );

                    let peer_rx = data_rx.resubscribe();
                    let latched = latched_message.clone();
                    let cancel_token = cancel_token.clone();
                    let subscriber_ids = subscriber_ids.clone();

                    peer_tasks.spawn(
                        async move {
                            debug!("Subscriber link task started");

                            match Self::send_task(latched, peer_rx, subscriber_stream, cancel_token)
                                .await
                            {
                                Ok(_) => trace!("Subscriber link task exited"),
                                Err(e) => debug!("Subscriber link closed: {e}"),
                            }

                            subscriber_ids.write().await.remove(&subscriber_id);
                        }
                        .instrument(span),
                    );
                }
            }
        }

        drop(tcp_listener);
        cancel_token.cancel();
        while peer_tasks.join_next().await.is_some() {}
    }

    async fn setup_connection(
        topic: &Topic,
        header_bytes: &[u8],
        tcp_nodelay: bool,
        mut subscriber_stream: TcpStream,
    ) -> Result<(TcpStream, SubscriberHeader), PublicationError> {
        let subscriber_header: SubscriberHeader =
            timeout(HANDSHAKE_TIMEOUT, header::from_async_read(&mut subscriber_stream))
                .await
                .map_err(|_| PublicationError::HandshakeTimeout)??;

        topic.spec.validate_subscriber(&topic.name, &subscriber_header)?;

        if tcp_nodelay || subscriber_header.tcp_nodelay {
            trace!(
                "Enabling TCP_NODELAY on socket for subscriber \"{}\"",
                subscriber_header.caller_id
            );
            subscriber_stream.set_nodelay(true)?;
        }

        timeout(HANDSHAKE_TIMEOUT, subscriber_stream.write_all(header_bytes))
            .await
            .map_err(|_| PublicationError::HandshakeTimeout)??;

        Ok((subscriber_stream, subscriber_header))
    }

    async fn send_task(
        latched_message: Option<Bytes>,
        mut data_rx: broadcast::Receiver<Bytes>,
        mut subscriber_stream: TcpStream,
        cancel_token: CancellationToken,
    ) -> Result<(), io::Error> {
        if let Some(last_message) = latched_message {
            subscriber_stream.write_all(&last_message).await?;
        }

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Subscriber link task stopped by cancel token");
                    break;
                }

                message = data_rx.recv() => {
                    match message {
                        Ok(payload) => subscriber_stream.write_all(&payload).await?,
                        Err(RecvError::Lagged(lagged)) => {
                            // Drop-oldest backpressure: the peer just loses
                            // the messages it could not keep up with.
                            warn!("Subscriber link is lagging, dropped {lagged} message(s)");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Internal data channel for publication was closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
