//! XML-RPC clients for the ROS Master and Slave APIs.
//!
//! Refer to <http://wiki.ros.org/ROS/Master_API>,
//! <http://wiki.ros.org/ROS/Parameter%20Server%20API> and
//! <http://wiki.ros.org/ROS/Slave_API>.

mod master;
mod slave;

pub mod protocol;

pub use {
    master::{MasterClient, MasterClientError, SystemState},
    slave::{SlaveClient, SlaveClientError},
};
