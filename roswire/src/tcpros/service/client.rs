//! Service client link: lookup, probe, handshake and the call loop.

use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, span, trace, warn, Instrument, Level};
use url::Url;

use crate::{
    message::RosMsg,
    tcpros::{
        self,
        header::{
            self, HeaderError, ProbeRequestHeader, ProbeResponseHeader, ServiceClientHeader,
            ServiceServerHeader,
        },
        service::{RPC_FAILURE, RPC_SUCCESS},
        CompatibilityError, Service, HANDSHAKE_TIMEOUT,
    },
    xmlrpc::{MasterClient, MasterClientError},
};

#[derive(thiserror::Error, Debug)]
pub enum ServiceClientError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("Master call failed: {0}")]
    Master(#[from] MasterClientError),
    #[error("Failed to parse service URI: {0}")]
    Url(#[from] url::ParseError),
    #[error("Could not resolve service URI \"{uri}\": {source}")]
    Resolution {
        uri: Url,
        #[source]
        source: io::Error,
    },
    #[error("No addresses available for service URI: {0}")]
    NoAddresses(Url),
    #[error("Incompatible service: {0}")]
    Compatibility(#[from] CompatibilityError),
    #[error("Handshake timed out")]
    HandshakeTimeout,
    #[error("Response carried an invalid status byte: {0}")]
    InvalidStatusByte(u8),
    #[error("Service handler reported failure: {0}")]
    Failure(String),
    #[error("Service client link is closed")]
    Closed,
}

struct PendingCall {
    request: Vec<u8>,
    reply_tx: oneshot::Sender<Result<Vec<u8>, ServiceClientError>>,
}

struct Connection {
    address: SocketAddr,
    stream: TcpStream,
    server_header: ServiceServerHeader,
}

/// A dialing link to one remote service.
///
/// Calls are funneled through a single connection task; with
/// `persistent=1` the socket is kept and reused across calls, otherwise
/// every round trip dials anew.
pub struct ServiceClientLink {
    service: Service,
    call_tx: mpsc::UnboundedSender<PendingCall>,
    cancel_token: CancellationToken,
    call_task: JoinHandle<()>,
}

impl ServiceClientLink {
    pub fn new(
        service: &Service,
        caller_id: &str,
        persistent: bool,
        master: MasterClient,
    ) -> Result<Self, HeaderError> {
        let probe_header_bytes = header::to_bytes(&ProbeRequestHeader {
            caller_id: caller_id.to_string(),
            service: service.name.clone(),
            md5sum: service.spec.md5sum.clone(),
            probe: true,
        })?;

        let client_header_bytes = header::to_bytes(&ServiceClientHeader {
            caller_id: caller_id.to_string(),
            service: service.name.clone(),
            md5sum: service.spec.md5sum.clone(),
            msg_type: service.spec.srv_type.clone(),
            persistent,
        })?;

        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let span = span!(
            parent: None,
            Level::DEBUG,
            "service_client",
            service = service.name.clone(),
            persistent = persistent,
        );

        let call_task = {
            let service = service.clone();
            let cancel_token = cancel_token.clone();

            tokio::spawn(
                async move {
                    trace!("Service client task started");

                    Self::call_task(
                        service,
                        master,
                        persistent,
                        client_header_bytes,
                        probe_header_bytes,
                        call_rx,
                        cancel_token,
                    )
                    .await;

                    trace!("Service client task exited");
                }
                .instrument(span),
            )
        };

        Ok(ServiceClientLink {
            service: service.clone(),
            call_tx,
            cancel_token,
            call_task,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// One request/response round trip with an already-encoded request
    /// frame.
    pub async fn call_raw(&self, request: Vec<u8>) -> Result<Vec<u8>, ServiceClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.call_tx
            .send(PendingCall { request, reply_tx })
            .map_err(|_| ServiceClientError::Closed)?;

        reply_rx.await.map_err(|_| ServiceClientError::Closed)?
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.call_task.await {
            warn!("Service client task panicked: {e}");
        }
    }

    async fn call_task(
        service: Service,
        master: MasterClient,
        persistent: bool,
        client_header_bytes: Vec<u8>,
        probe_header_bytes: Vec<u8>,
        mut call_rx: mpsc::UnboundedReceiver<PendingCall>,
        cancel_token: CancellationToken,
    ) {
        let mut connection: Option<Connection> = None;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    trace!("Service client task stopped by cancel token");
                    break;
                }

                pending = call_rx.recv() => {
                    let Some(PendingCall { request, reply_tx }) = pending else {
                        debug!("Every client handle was dropped");
                        break;
                    };

                    let result = async {
                        let mut conn = match connection.take() {
                            Some(conn) => {
                                trace!("Reusing persistent service connection");
                                conn
                            }
                            None => {
                                Self::connect(
                                    &service,
                                    &master,
                                    &client_header_bytes,
                                    &probe_header_bytes,
                                )
                                .await?
                            }
                        };

                        let span = span!(
                            Level::DEBUG,
                            "service_call",
                            server_id = conn.server_header.caller_id,
                            server_addr = conn.address.to_string(),
                        );

                        let rpc_result =
                            Self::round_trip(&request, &mut conn.stream).instrument(span).await;

                        if persistent && rpc_result.is_ok() {
                            connection = Some(conn);
                        }

                        rpc_result
                    }
                    .await;

                    if reply_tx.send(result).is_err() {
                        warn!("Caller gave up before the service call finished");
                    }
                }
            }
        }
    }

    async fn connect(
        service: &Service,
        master: &MasterClient,
        client_header_bytes: &[u8],
        probe_header_bytes: &[u8],
    ) -> Result<Connection, ServiceClientError> {
        let service_uri = Url::parse(&master.lookup_service(&service.name).await?)?;
        trace!("Service located: [uri: \"{service_uri}\"]");

        let address = service_uri
            .socket_addrs(|| None)
            .map_err(|source| ServiceClientError::Resolution {
                uri: service_uri.clone(),
                source,
            })?
            .first()
            .copied()
            .ok_or_else(|| ServiceClientError::NoAddresses(service_uri.clone()))?;

        let probe_response = Self::probe(&address, probe_header_bytes).await?;
        service
            .spec
            .validate(&probe_response.md5sum, &probe_response.msg_type)?;

        let mut stream = TcpStream::connect(address).await?;

        let server_header = timeout(HANDSHAKE_TIMEOUT, async {
            stream.write_all(client_header_bytes).await?;
            header::from_async_read::<ServiceServerHeader, _>(&mut stream)
                .await
                .map_err(ServiceClientError::from)
        })
        .await
        .map_err(|_| ServiceClientError::HandshakeTimeout)??;

        Ok(Connection {
            address,
            stream,
            server_header,
        })
    }

    async fn probe(
        address: &SocketAddr,
        probe_header_bytes: &[u8],
    ) -> Result<ProbeResponseHeader, ServiceClientError> {
        let mut stream = TcpStream::connect(address).await?;

        timeout(HANDSHAKE_TIMEOUT, async {
            stream.write_all(probe_header_bytes).await?;
            header::from_async_read(&mut stream)
                .await
                .map_err(ServiceClientError::from)
        })
        .await
        .map_err(|_| ServiceClientError::HandshakeTimeout)?
    }

    async fn round_trip(
        request: &[u8],
        stream: &mut TcpStream,
    ) -> Result<Vec<u8>, ServiceClientError> {
        stream.write_all(request).await?;

        match stream.read_u8().await? {
            RPC_SUCCESS => Ok(tcpros::read_frame(stream).await?),
            RPC_FAILURE => {
                let error_frame = tcpros::read_frame(stream).await?;
                let error_message = String::decode(error_frame.as_slice())?;
                Err(ServiceClientError::Failure(error_message))
            }
            other => Err(ServiceClientError::InvalidStatusByte(other)),
        }
    }
}
