use std::io;

use dxr::DxrError;

use crate::{
    names::NameError,
    tcpros::{
        header::HeaderError,
        publication::PublicationError,
        service::{client::ServiceClientError, server::ServiceProviderError},
        subscription::SubscriptionError,
        CompatibilityError,
    },
    xmlrpc::MasterClientError,
};

#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("ROS_MASTER_URI is not set and no __master override was given")]
    MissingMasterUri,
    #[error("Invalid master URI \"{uri}\": {source}")]
    InvalidMasterUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid hostname: \"{0}\"")]
    InvalidHostname(String),
    #[error(transparent)]
    Dxr(#[from] DxrError),
    #[error("Master call failed: {0}")]
    Master(#[from] MasterClientError),
    #[error("Incompatible registration: {0}")]
    Compatibility(#[from] CompatibilityError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Publication(#[from] PublicationError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    ServiceProvider(#[from] ServiceProviderError),
    #[error(transparent)]
    ServiceClient(#[from] ServiceClientError),
}
