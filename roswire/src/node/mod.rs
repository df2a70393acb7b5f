//! The node runtime: master registration, the slave API server, entity
//! registries and the user-thread job pump.
//!
//! Background I/O tasks never call user code. Message and service
//! callbacks are queued as [Job]s, and the user drives them with
//! [Node::spin] or [Node::spin_once]; everything a callback touches can
//! therefore stay single-threaded.

use std::{
    collections::HashMap,
    io,
    marker::PhantomData,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use bytes::Bytes;
use dxr::{TryFromValue, TryToValue};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, Mutex, Notify},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use url::Url;

mod api;
mod config;
mod error;

use crate::{
    message::{Message, ServicePair},
    names::Resolver,
    tcpros::{
        publication::Publication,
        service::{
            client::{ServiceClientError, ServiceClientLink},
            server::{CallbackError, ServiceCallback, ServiceProvider},
        },
        subscription::{Subscription, TopicCallback},
        Service, Topic,
    },
    xmlrpc::MasterClient,
};

use {api::router, api::server::Server, config::NodeConfig};

pub use error::NodeError;

/// A deferred piece of user code, produced by an I/O task and executed on
/// whichever thread pumps the spin loop.
pub type Job = Box<dyn FnOnce() + Send>;

const JOB_QUEUE_DEPTH: usize = 100;
const SPIN_ONCE_WAIT: Duration = Duration::from_millis(10);
const SPIN_WAIT: Duration = Duration::from_secs(1);

fn rosrpc_uri(hostname: &str, port: u16) -> String {
    format!("rosrpc://{hostname}:{port}")
}

/// A participant in the ROS graph.
///
/// Cheap to clone; all clones share the same underlying node. Call
/// [shutdown](Node::shutdown) when done — the master has no way to detect
/// a vanished node, so dropping without it leaves stale registrations
/// behind.
#[derive(Clone)]
pub struct Node {
    state: Arc<NodeState>,
}

struct ApiHandle {
    shutdown_trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct NodeState {
    name: String,
    namespace: String,
    qualified_name: String,
    hostname: String,
    listen_ip: IpAddr,
    slave_uri: Url,
    master_uri: Url,
    log_dir: PathBuf,
    non_ros_args: Vec<String>,
    resolver: Resolver,
    master: MasterClient,
    publishers: RwLock<HashMap<String, Publication>>,
    subscribers: RwLock<HashMap<String, Subscription>>,
    servers: RwLock<HashMap<String, ServiceProvider>>,
    job_tx: mpsc::Sender<Job>,
    jobs: Mutex<Option<mpsc::Receiver<Job>>>,
    ok: RwLock<bool>,
    // Serializes entity registration and teardown; the maps above are
    // only ever locked briefly and never across an await.
    registration: Mutex<()>,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    api: Mutex<Option<ApiHandle>>,
    shutdown_done: Mutex<bool>,
}

impl NodeState {
    pub(crate) fn master_uri(&self) -> &Url {
        &self.master_uri
    }

    pub(crate) fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Cooperative shutdown signal: clears the ok flag so spin loops
    /// exit. Actual teardown happens in [Node::shutdown].
    pub(crate) fn request_shutdown(&self) {
        *self.ok.write().unwrap() = false;
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscribers
            .read()
            .unwrap()
            .iter()
            .map(|(topic, sub)| (topic.clone(), sub.topic().spec.msg_type.clone()))
            .collect()
    }

    pub(crate) fn publications(&self) -> Vec<(String, String)> {
        self.publishers
            .read()
            .unwrap()
            .iter()
            .map(|(topic, publication)| {
                (topic.clone(), publication.topic().spec.msg_type.clone())
            })
            .collect()
    }

    pub(crate) fn publisher_address(&self, topic_name: &str) -> Option<SocketAddr> {
        self.publishers
            .read()
            .unwrap()
            .get(topic_name)
            .map(|publication| *publication.address())
    }

    pub(crate) fn push_publisher_update(
        &self,
        topic_name: &str,
        publisher_uris: Vec<String>,
    ) -> bool {
        match self.subscribers.read().unwrap().get(topic_name) {
            Some(subscription) => {
                subscription.update_publishers(publisher_uris);
                true
            }
            None => false,
        }
    }
}

impl Node {
    /// Construct and register a node.
    ///
    /// `name` may carry a namespace (`/wg/node1`); `args` is the raw argv
    /// tail, scanned for `key:=value` remappings, `_param:=value` private
    /// parameters and `__special:=value` overrides. The master URI comes
    /// from `ROS_MASTER_URI` unless `__master` overrides it.
    pub async fn new(name: &str, args: &[String]) -> Result<Node, NodeError> {
        let config = NodeConfig::resolve(name, args)?;

        let api_listener = TcpListener::bind((config.listen_ip, 0)).await?;
        let api_port = api_listener.local_addr()?.port();

        let slave_uri = Url::parse(&format!("http://{}:{api_port}", config.hostname))
            .map_err(|_| NodeError::InvalidHostname(config.hostname.clone()))?;

        info!(
            "Starting node: [name: \"{}\", slave_uri: \"{slave_uri}\", master_uri: \"{}\"]",
            config.qualified_name, config.master_uri
        );

        let master = MasterClient::new(
            &config.master_uri,
            &config.qualified_name,
            slave_uri.to_string(),
        );

        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_DEPTH);

        let NodeConfig {
            name,
            namespace,
            qualified_name,
            hostname,
            listen_ip,
            master_uri,
            log_dir,
            resolver,
            params,
            non_ros_args,
            ..
        } = config;

        let state = Arc::new(NodeState {
            name,
            namespace,
            qualified_name,
            hostname,
            listen_ip,
            slave_uri,
            master_uri,
            log_dir,
            non_ros_args,
            resolver,
            master,
            publishers: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
            job_tx,
            jobs: Mutex::new(Some(job_rx)),
            ok: RwLock::new(true),
            registration: Mutex::new(()),
            cancel_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            api: Mutex::new(None),
            shutdown_done: Mutex::new(false),
        });

        // Slave API server first: the master may call back as soon as we
        // start registering things.
        let (api_server, api_shutdown_trigger) = Server::new(router::build_router(&state));
        let api_task = tokio::spawn(async move {
            if let Err(e) = api_server.serve_listener(api_listener).await {
                error!("Slave API server failed: {e}");
            }
        });
        *state.api.lock().await = Some(ApiHandle {
            shutdown_trigger: api_shutdown_trigger,
            task: api_task,
        });

        let node = Node { state };

        // Private parameters from argv go straight to the parameter
        // server under the node's private namespace.
        for (key, raw_value) in &params {
            let resolved = node.state.resolver.remap(&format!("~{key}"));
            if let Err(e) = node
                .state
                .master
                .set_param_any(&resolved, &config::parse_param_value(raw_value))
                .await
            {
                node.shutdown().await;
                return Err(e.into());
            }
        }

        {
            let state = Arc::downgrade(&node.state);
            let cancel_token = node.state.cancel_token.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel_token.cancelled() => {}
                    result = tokio::signal::ctrl_c() => {
                        if result.is_ok() {
                            info!("Interrupted");
                            if let Some(state) = state.upgrade() {
                                state.request_shutdown();
                            }
                        }
                    }
                }
            });
        }

        debug!("Node started: [name: \"{}\"]", node.state.qualified_name);
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn namespace(&self) -> &str {
        &self.state.namespace
    }

    pub fn qualified_name(&self) -> &str {
        &self.state.qualified_name
    }

    pub fn hostname(&self) -> &str {
        &self.state.hostname
    }

    /// The slave API URI peers reach this node at.
    pub fn uri(&self) -> &Url {
        &self.state.slave_uri
    }

    pub fn master_uri(&self) -> &Url {
        &self.state.master_uri
    }

    pub fn log_dir(&self) -> &Path {
        &self.state.log_dir
    }

    /// argv tokens that were not `key:=value` assignments.
    pub fn non_ros_args(&self) -> &[String] {
        &self.state.non_ros_args
    }

    /// Resolve a name against this node's namespace and remap table.
    pub fn resolve_name(&self, name: &str) -> String {
        self.state.resolver.remap(name)
    }

    /// False once shutdown has been requested, locally or over the slave
    /// API.
    pub fn ok(&self) -> bool {
        *self.state.ok.read().unwrap()
    }

    /// Advertise a topic and return a handle for publishing to it.
    ///
    /// Re-advertising an existing topic with a compatible type returns
    /// another handle to the same publication. With `latching`, the last
    /// published message is retained and replayed to late subscribers.
    pub async fn advertise<T: Message>(
        &self,
        topic: &str,
        queue_size: usize,
        latching: bool,
    ) -> Result<Publisher<T>, NodeError> {
        let name = self.state.resolver.remap(topic);
        let topic = Topic::new::<T>(name.clone());

        let _guard = self.state.registration.lock().await;

        {
            let publishers = self.state.publishers.read().unwrap();
            if let Some(existing) = publishers.get(&name) {
                existing
                    .topic()
                    .spec
                    .validate(&topic.spec.md5sum, &topic.spec.msg_type)?;
                return Ok(Publisher::new(&name, existing.data_sender()));
            }
        }

        let publication = Publication::new(
            SocketAddr::new(self.state.listen_ip, 0),
            &topic,
            &self.state.qualified_name,
            queue_size,
            false,
            latching,
        )
        .await?;

        let data_tx = publication.data_sender();

        // Insert before registering so an immediate requestTopic from an
        // existing subscriber finds the listener.
        self.state
            .publishers
            .write()
            .unwrap()
            .insert(name.clone(), publication);

        if let Err(e) = self
            .state
            .master
            .register_publisher(&name, &topic.spec.msg_type)
            .await
        {
            let removed = self.state.publishers.write().unwrap().remove(&name);
            if let Some(publication) = removed {
                self.state.tracker.spawn(publication.shutdown());
            }
            return Err(e.into());
        }

        Ok(Publisher::new(&name, data_tx))
    }

    /// Subscribe to a topic.
    ///
    /// The callback runs on the spin thread for every received message.
    /// Subscribing again to the same topic appends the callback to the
    /// existing subscription; callbacks fire in registration order.
    pub async fn subscribe<T, F>(&self, topic: &str, callback: F) -> Result<(), NodeError>
    where
        T: Message,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = self.state.resolver.remap(topic);
        let topic = Topic::new::<T>(name.clone());

        let erased: TopicCallback = {
            let topic_name = name.clone();
            Arc::new(move |payload: &[u8]| match T::decode_slice(payload) {
                Ok(message) => callback(message),
                Err(e) => warn!("Failed to decode message on \"{topic_name}\": {e}"),
            })
        };

        let _guard = self.state.registration.lock().await;

        {
            let subscribers = self.state.subscribers.read().unwrap();
            if let Some(existing) = subscribers.get(&name) {
                existing
                    .topic()
                    .spec
                    .validate(&topic.spec.md5sum, &topic.spec.msg_type)?;
                existing.add_callback(erased);
                return Ok(());
            }
        }

        let subscription = Subscription::new(
            &topic,
            &self.state.qualified_name,
            false,
            self.state.job_tx.clone(),
        )?;
        subscription.add_callback(erased);

        self.state
            .subscribers
            .write()
            .unwrap()
            .insert(name.clone(), subscription);

        match self
            .state
            .master
            .register_subscriber(&name, &topic.spec.msg_type)
            .await
        {
            Ok(publisher_uris) => {
                debug!(
                    "Found {} existing publisher(s) for \"{name}\"",
                    publisher_uris.len()
                );
                if let Some(subscription) = self.state.subscribers.read().unwrap().get(&name) {
                    subscription.update_publishers(publisher_uris);
                }
                Ok(())
            }
            Err(e) => {
                let removed = self.state.subscribers.write().unwrap().remove(&name);
                if let Some(subscription) = removed {
                    self.state.tracker.spawn(subscription.shutdown());
                }
                Err(e.into())
            }
        }
    }

    /// URIs of the publishers a subscription is currently connected to.
    pub fn connected_publishers(&self, topic: &str) -> Option<Vec<String>> {
        let name = self.state.resolver.remap(topic);
        self.state
            .subscribers
            .read()
            .unwrap()
            .get(&name)
            .map(|subscription| subscription.connected_publishers().into_iter().collect())
    }

    /// Caller IDs of the subscribers connected to a publication.
    pub async fn connected_subscribers(&self, topic: &str) -> Option<Vec<String>> {
        let name = self.state.resolver.remap(topic);
        let subscriber_ids = {
            let publishers = self.state.publishers.read().unwrap();
            publishers.get(&name)?.subscriber_ids()
        };
        let ids = subscriber_ids.read().await;
        Some(ids.iter().cloned().collect())
    }

    /// Host a service.
    ///
    /// The handler runs on the spin thread; returning `Err` sends the
    /// failure status and the error text to the caller. Re-advertising a
    /// name replaces the previous provider.
    pub async fn advertise_service<T, F>(&self, service: &str, handler: F) -> Result<(), NodeError>
    where
        T: ServicePair,
        F: Fn(T::Request) -> Result<T::Response, CallbackError> + Send + Sync + 'static,
    {
        let name = self.state.resolver.remap(service);
        let service = Service::new::<T>(name.clone());

        let erased: ServiceCallback = Arc::new(move |payload: &[u8]| {
            let request = T::Request::decode_slice(payload)?;
            let response = handler(request)?;
            Ok(response.encode_vec()?)
        });

        let _guard = self.state.registration.lock().await;

        let previous = self.state.servers.write().unwrap().remove(&name);
        if let Some(previous) = previous {
            debug!("Replacing service provider for \"{name}\"");
            let service_api = rosrpc_uri(&self.state.hostname, previous.address().port());
            if let Err(e) = self.state.master.unregister_service(&name, &service_api).await {
                warn!("Failed to unregister replaced service \"{name}\": {e}");
            }
            previous.shutdown().await;
        }

        let provider = ServiceProvider::new(
            SocketAddr::new(self.state.listen_ip, 0),
            &service,
            &self.state.qualified_name,
            erased,
            self.state.job_tx.clone(),
        )
        .await?;

        let service_api = rosrpc_uri(&self.state.hostname, provider.address().port());

        self.state
            .servers
            .write()
            .unwrap()
            .insert(name.clone(), provider);

        if let Err(e) = self.state.master.register_service(&name, &service_api).await {
            let removed = self.state.servers.write().unwrap().remove(&name);
            if let Some(provider) = removed {
                self.state.tracker.spawn(provider.shutdown());
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Create a client for a remote service. With `persistent`, the
    /// connection is kept open and reused across calls.
    pub fn service_client<T: ServicePair>(
        &self,
        service: &str,
        persistent: bool,
    ) -> Result<ServiceClient<T>, NodeError> {
        let name = self.state.resolver.remap(service);
        let service = Service::new::<T>(name);

        let link = ServiceClientLink::new(
            &service,
            &self.state.qualified_name,
            persistent,
            self.state.master.clone(),
        )?;

        Ok(ServiceClient {
            link: Arc::new(link),
            _marker: PhantomData,
        })
    }

    /// Wait up to 10 ms for one queued callback job and run it.
    pub async fn spin_once(&self) {
        let mut jobs = self.state.jobs.lock().await;
        let Some(receiver) = jobs.as_mut() else {
            return;
        };

        if let Ok(Some(job)) = timeout(SPIN_ONCE_WAIT, receiver.recv()).await {
            job();
        }
    }

    /// Pump callback jobs until shutdown is requested.
    pub async fn spin(&self) {
        while self.ok() {
            let mut jobs = self.state.jobs.lock().await;
            let Some(receiver) = jobs.as_mut() else {
                return;
            };

            match timeout(SPIN_WAIT, receiver.recv()).await {
                Ok(Some(job)) => job(),
                Ok(None) => return,
                Err(_) => {}
            }
        }
    }

    /// Get a parameter from the parameter server. `None` when unset.
    pub async fn get_param<P: TryFromValue>(&self, key: &str) -> Result<Option<P>, NodeError> {
        let name = self.state.resolver.remap(key);
        Ok(self.state.master.get_param(&name).await?)
    }

    /// Store a parameter on the parameter server.
    pub async fn set_param<V: TryToValue>(&self, key: &str, value: V) -> Result<(), NodeError> {
        let name = self.state.resolver.remap(key);
        self.state.master.set_param(&name, value).await?;
        Ok(())
    }

    /// Check whether a parameter exists.
    pub async fn has_param(&self, key: &str) -> Result<bool, NodeError> {
        let name = self.state.resolver.remap(key);
        Ok(self.state.master.has_param(&name).await?)
    }

    /// Delete a parameter.
    pub async fn delete_param(&self, key: &str) -> Result<(), NodeError> {
        let name = self.state.resolver.remap(key);
        self.state.master.delete_param(&name).await?;
        Ok(())
    }

    /// Search for a parameter key upwards through parent namespaces.
    pub async fn search_param(&self, key: &str) -> Result<Option<String>, NodeError> {
        Ok(self.state.master.search_param(key).await?)
    }

    /// Shut the node down: unregister and drain every entity, join the
    /// background tasks, then stop the slave API server. Idempotent, and
    /// no callback runs after it returns.
    pub async fn shutdown(&self) {
        {
            let mut done = self.state.shutdown_done.lock().await;
            if *done {
                return;
            }
            *done = true;
        }

        debug!("Shutting down node \"{}\"", self.state.qualified_name);
        self.state.request_shutdown();

        let _guard = self.state.registration.lock().await;

        let subscribers: Vec<(String, Subscription)> = {
            let mut map = self.state.subscribers.write().unwrap();
            map.drain().collect()
        };
        for (name, subscription) in subscribers {
            if let Err(e) = self.state.master.unregister_subscriber(&name).await {
                warn!("Failed to unregister subscriber \"{name}\": {e}");
            }
            subscription.shutdown().await;
        }

        let publishers: Vec<(String, Publication)> = {
            let mut map = self.state.publishers.write().unwrap();
            map.drain().collect()
        };
        for (name, publication) in publishers {
            if let Err(e) = self.state.master.unregister_publisher(&name).await {
                warn!("Failed to unregister publisher \"{name}\": {e}");
            }
            publication.shutdown().await;
        }

        let servers: Vec<(String, ServiceProvider)> = {
            let mut map = self.state.servers.write().unwrap();
            map.drain().collect()
        };
        for (name, provider) in servers {
            let service_api = rosrpc_uri(&self.state.hostname, provider.address().port());
            if let Err(e) = self.state.master.unregister_service(&name, &service_api).await {
                warn!("Failed to unregister service \"{name}\": {e}");
            }
            provider.shutdown().await;
        }

        self.state.cancel_token.cancel();
        self.state.tracker.close();
        self.state.tracker.wait().await;

        // Drop the job receiver: anything still queued is discarded and
        // no further callback can run.
        self.state.jobs.lock().await.take();

        if let Some(api) = self.state.api.lock().await.take() {
            api.shutdown_trigger.notify_waiters();
            if let Err(e) = api.task.await {
                warn!("Slave API server task panicked: {e}");
            }
        }

        debug!("Node shutdown complete");
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] io::Error),
    #[error("Publication is closed")]
    Closed,
}

/// Handle for publishing typed messages to an advertised topic.
pub struct Publisher<T> {
    topic: String,
    data_tx: broadcast::Sender<Bytes>,
    _marker: PhantomData<T>,
}

impl<T: Message> Publisher<T> {
    fn new(topic: &str, data_tx: broadcast::Sender<Bytes>) -> Self {
        Publisher {
            topic: topic.to_string(),
            data_tx,
            _marker: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue a message to every connected subscriber. Never blocks: a
    /// peer that cannot keep up loses its oldest queued messages.
    pub fn publish(&self, message: &T) -> Result<(), PublisherError> {
        let payload = Bytes::from(message.encode_vec()?);
        self.data_tx
            .send(payload)
            .map_err(|_| PublisherError::Closed)?;
        Ok(())
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Publisher {
            topic: self.topic.clone(),
            data_tx: self.data_tx.clone(),
            _marker: PhantomData,
        }
    }
}

/// Handle for calling a remote service.
pub struct ServiceClient<T> {
    link: Arc<ServiceClientLink>,
    _marker: PhantomData<T>,
}

impl<T: ServicePair> ServiceClient<T> {
    pub fn service_name(&self) -> &str {
        &self.link.service().name
    }

    /// One request/response round trip.
    pub async fn call(&self, request: &T::Request) -> Result<T::Response, ServiceClientError> {
        let encoded = request.encode_vec()?;
        let response = self.link.call_raw(encoded).await?;
        Ok(T::Response::decode_slice(&response)?)
    }
}

impl<T> Clone for ServiceClient<T> {
    fn clone(&self) -> Self {
        ServiceClient {
            link: self.link.clone(),
            _marker: PhantomData,
        }
    }
}
