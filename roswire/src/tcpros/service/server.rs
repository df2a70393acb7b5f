//! Service provider: the TCP listener, probe handling and the request
//! loop.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, span, trace, warn, Instrument, Level};

use crate::{
    message::RosMsg,
    node::Job,
    tcpros::{
        self,
        header::{
            self, HeaderError, ProbeRequestHeader, ProbeResponseHeader, ServiceClientHeader,
            ServiceServerHeader,
        },
        service::{RPC_FAILURE, RPC_SUCCESS},
        CompatibilityError, Service, HANDSHAKE_TIMEOUT,
    },
};

/// Error type surfaced by user service handlers; it is stringified onto
/// the wire with the failure status byte.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased service handler. Decodes the request, runs the user
/// closure, encodes the response.
pub type ServiceCallback = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

enum RequestKind {
    Probe(ProbeRequestHeader),
    ClientHandshake(ServiceClientHeader),
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceProviderError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("Incompatible client: {0}")]
    Compatibility(#[from] CompatibilityError),
    #[error("Could not determine request type")]
    UnknownRequest,
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

/// A hosted service endpoint.
///
/// Handlers are user callbacks, so they are never run here: each request
/// is packaged as a job for the node's spin thread, and the connection
/// task waits on a oneshot for the reply to write back.
pub struct ServiceProvider {
    service: Service,
    address: SocketAddr,
    cancel_token: CancellationToken,
    listener_task: JoinHandle<()>,
}

impl ServiceProvider {
    pub async fn new(
        address: SocketAddr,
        service: &Service,
        caller_id: &str,
        callback: ServiceCallback,
        job_tx: mpsc::Sender<Job>,
    ) -> Result<Self, ServiceProviderError> {
        let tcp_listener = TcpListener::bind(address).await?;
        let bound_addr = tcp_listener.local_addr()?;

        let probe_header_bytes = header::to_bytes(&ProbeResponseHeader {
            caller_id: caller_id.to_string(),
            md5sum: service.spec.md5sum.clone(),
            msg_type: service.spec.srv_type.clone(),
        })?;

        let server_header_bytes = header::to_bytes(&ServiceServerHeader {
            caller_id: caller_id.to_string(),
        })?;

        let cancel_token = CancellationToken::new();

        let span = span!(
            parent: None,
            Level::DEBUG,
            "service_listener",
            service = service.name.clone(),
            address = bound_addr.to_string(),
        );

        let listener_task = {
            let service = service.clone();
            let cancel_token = cancel_token.clone();

            tokio::spawn(
                async move {
                    trace!("Service listener task started");

                    Self::listener_task(
                        service,
                        tcp_listener,
                        callback,
                        job_tx,
                        probe_header_bytes,
                        server_header_bytes,
                        cancel_token,
                    )
                    .await;

                    trace!("Service listener task exited");
                }
                .instrument(span),
            )
        };

        Ok(ServiceProvider {
            service: service.clone(),
            address: bound_addr,
            cancel_token,
            listener_task,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    /// Close the listener and every client socket, then join the request
    /// loops.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.listener_task.await {
            warn!("Service listener task panicked: {e}");
        }
    }

    async fn listener_task(
        service: Service,
        tcp_listener: TcpListener,
        callback: ServiceCallback,
        job_tx: mpsc::Sender<Job>,
        probe_header_bytes: Vec<u8>,
        server_header_bytes: Vec<u8>,
        cancel_token: CancellationToken,
    ) {
        let mut client_tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Service listener task stopped by cancel token");
                    break;
                }

                connection = tcp_listener.accept() => {
                    let (client_stream, client_addr) = match connection {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!("Failed to accept client connection: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = Self::handle_connection(
                        &service,
                        &probe_header_bytes,
                        &server_header_bytes,
                        &callback,
                        &job_tx,
                        client_addr,
                        client_stream,
                        &cancel_token,
                        &mut client_tasks,
                    )
                    .await
                    {
                        warn!("Rejected service client at {client_addr}: {e}");
                    }
                }
            }
        }

        drop(tcp_listener);
        cancel_token.cancel();
        while client_tasks.join_next().await.is_some() {}
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        service: &Service,
        probe_header_bytes: &[u8],
        server_header_bytes: &[u8],
        callback: &ServiceCallback,
        job_tx: &mpsc::Sender<Job>,
        client_addr: SocketAddr,
        mut client_stream: TcpStream,
        cancel_token: &CancellationToken,
        client_tasks: &mut JoinSet<()>,
    ) -> Result<(), ServiceProviderError> {
        let header_data = timeout(HANDSHAKE_TIMEOUT, tcpros::read_frame(&mut client_stream))
            .await
            .map_err(|_| ServiceProviderError::HandshakeTimeout)??;

        // A full client header and a probe carry different mandatory keys,
        // so whichever parses decides the request kind.
        let request_kind = match header::from_bytes(&header_data) {
            Ok(client_header) => RequestKind::ClientHandshake(client_header),
            Err(_) => match header::from_bytes(&header_data) {
                Ok(probe) => RequestKind::Probe(probe),
                Err(_) => return Err(ServiceProviderError::UnknownRequest),
            },
        };

        match request_kind {
            RequestKind::Probe(probe) => {
                trace!("Answering service probe from \"{}\"", probe.caller_id);
                client_stream.write_all(probe_header_bytes).await?;
            }
            RequestKind::ClientHandshake(client_header) => {
                service
                    .spec
                    .validate(&client_header.md5sum, &client_header.msg_type)?;

                client_stream.write_all(server_header_bytes).await?;

                let span = span!(
                    Level::DEBUG,
                    "service_request_loop",
                    client_id = client_header.caller_id,
                    client_addr = client_addr.to_string(),
                    persistent = client_header.persistent,
                );

                let callback = callback.clone();
                let job_tx = job_tx.clone();
                let cancel_token = cancel_token.clone();

                client_tasks.spawn(
                    async move {
                        match Self::request_loop(
                            client_stream,
                            client_header.persistent,
                            callback,
                            job_tx,
                            cancel_token,
                        )
                        .await
                        {
                            Ok(_) => trace!("Service request loop exited"),
                            Err(e) => debug!("Service client connection closed: {e}"),
                        }
                    }
                    .instrument(span),
                );
            }
        }

        Ok(())
    }

    async fn request_loop(
        mut client_stream: TcpStream,
        persistent: bool,
        callback: ServiceCallback,
        job_tx: mpsc::Sender<Job>,
        cancel_token: CancellationToken,
    ) -> Result<(), io::Error> {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Service request loop stopped by cancel token");
                    break;
                }

                frame = tcpros::read_frame(&mut client_stream) => {
                    let request = frame?;
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let callback = callback.clone();

                    let job: Job = Box::new(move || {
                        let _ = reply_tx.send(callback(&request));
                    });

                    if job_tx.send(job).await.is_err() {
                        debug!("Job channel closed, dropping service client");
                        break;
                    }

                    let Ok(result) = reply_rx.await else {
                        debug!("Handler job was dropped before running");
                        break;
                    };

                    match result {
                        Ok(response) => {
                            client_stream.write_u8(RPC_SUCCESS).await?;
                            client_stream.write_all(&response).await?;
                        }
                        Err(e) => {
                            warn!("Service handler failed: {e}");

                            let mut error_bytes = Vec::new();
                            e.to_string().encode(&mut error_bytes)?;

                            client_stream.write_u8(RPC_FAILURE).await?;
                            client_stream.write_all(&error_bytes).await?;
                        }
                    }
                }
            }

            if !persistent {
                trace!("Non-persistent connection, closing after one call");
                break;
            }
        }

        Ok(())
    }
}
