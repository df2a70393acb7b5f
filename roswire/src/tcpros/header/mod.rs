//! TCPROS connection headers.
//!
//! Every TCPROS connection starts with an exchange of headers: a 4-byte
//! little-endian total length followed by `key=value` fields, each with
//! its own 4-byte length. The typed structs here (de)serialize through a
//! purpose-built serde codec; unknown keys are ignored, and a peer that
//! sends an `error=` field aborts the handshake.
//!
//! See <http://wiki.ros.org/ROS/TCPROS> and
//! <http://wiki.ros.org/ROS/Connection%20Header>.

use serde::{Deserialize, Serialize};

mod codec;

pub use codec::{from_async_read, from_bytes, to_bytes, HeaderError};

use crate::tcpros::{CompatibilityError, TopicSpec};

fn unknown_callerid() -> String {
    String::from("unknown callerid")
}

/// Header sent by a publisher after accepting a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherHeader {
    #[serde(rename = "callerid", default = "unknown_callerid")]
    pub caller_id: String,
    pub topic: String,
    pub md5sum: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "message_definition", default)]
    pub msg_definition: String,
    #[serde(default)]
    pub latching: bool,
}

/// Header sent by a subscriber when dialing a publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberHeader {
    #[serde(rename = "callerid")]
    pub caller_id: String,
    pub topic: String,
    pub md5sum: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "message_definition", default)]
    pub msg_definition: String,
    #[serde(default)]
    pub tcp_nodelay: bool,
}

/// Header sent by a service client when dialing a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClientHeader {
    #[serde(rename = "callerid", default = "unknown_callerid")]
    pub caller_id: String,
    pub service: String,
    pub md5sum: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub persistent: bool,
}

/// Probe sent to discover a service's type without invoking it.
///
/// The master does not track service types, so clients that want to
/// validate compatibility first send a probe and read the metadata back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequestHeader {
    #[serde(rename = "callerid")]
    pub caller_id: String,
    pub service: String,
    pub md5sum: String,
    pub probe: bool,
}

/// Response to a service probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponseHeader {
    #[serde(rename = "callerid", default = "unknown_callerid")]
    pub caller_id: String,
    pub md5sum: String,
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// Header sent by a service server after accepting a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceServerHeader {
    #[serde(rename = "callerid", default = "unknown_callerid")]
    pub caller_id: String,
}

impl TopicSpec {
    /// Validate a dialing subscriber's header against this publication.
    pub fn validate_subscriber(
        &self,
        topic: &str,
        header: &SubscriberHeader,
    ) -> Result<(), CompatibilityError> {
        if topic != header.topic {
            return Err(CompatibilityError::Topic {
                expected: topic.to_string(),
                actual: header.topic.clone(),
            });
        }

        self.validate(&header.md5sum, &header.msg_type)
    }

    /// Validate an accepting publisher's header against this subscription.
    pub fn validate_publisher(&self, header: &PublisherHeader) -> Result<(), CompatibilityError> {
        self.validate(&header.md5sum, &header.msg_type)
    }
}
