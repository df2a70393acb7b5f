//! Environment and command-line resolution performed during node
//! construction.

use std::{
    env,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

use dxr::Value;
use url::Url;

use crate::{
    names::{self, NameMap, Resolver},
    node::NodeError,
};

/// Everything a node needs to know before it touches the network,
/// resolved from its given name, argv and the `ROS_*` environment.
pub(crate) struct NodeConfig {
    pub name: String,
    pub namespace: String,
    pub qualified_name: String,
    pub hostname: String,
    pub listen_ip: IpAddr,
    pub master_uri: Url,
    pub home_dir: PathBuf,
    pub log_dir: PathBuf,
    pub resolver: Resolver,
    pub params: NameMap,
    pub non_ros_args: Vec<String>,
}

impl NodeConfig {
    pub fn resolve(name: &str, args: &[String]) -> Result<NodeConfig, NodeError> {
        let (mut namespace, mut node_name) = names::qualify_node_name(name)?;
        let (mapping, params, specials, non_ros_args) = names::process_args(args);

        if let Some(name_override) = specials.get("__name") {
            node_name = name_override.clone();
        }

        if let Some(ns) = nonempty_env("ROS_NAMESPACE") {
            namespace = ns;
        }
        if let Some(ns_override) = specials.get("__ns") {
            namespace = ns_override.clone();
        }

        let home_dir = match nonempty_env("ROS_HOME") {
            Some(home) => PathBuf::from(home),
            None => PathBuf::from(env::var("HOME").unwrap_or_default()).join(".ros"),
        };

        let mut log_dir = match nonempty_env("ROS_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home_dir.join("log"),
        };
        if let Some(log_override) = specials.get("__log") {
            log_dir = PathBuf::from(log_override);
        }

        let (hostname, only_localhost) = determine_host(&specials)?;
        let listen_ip = if only_localhost {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };

        let master_uri = specials
            .get("__master")
            .cloned()
            .or_else(|| nonempty_env("ROS_MASTER_URI"))
            .ok_or(NodeError::MissingMasterUri)?;
        let master_uri = Url::parse(&master_uri).map_err(|source| NodeError::InvalidMasterUri {
            uri: master_uri,
            source,
        })?;

        let resolver = Resolver::new(&namespace, &node_name, &mapping);

        let qualified_name = if namespace == "/" {
            format!("/{node_name}")
        } else {
            format!("{namespace}/{node_name}")
        };

        Ok(NodeConfig {
            name: node_name,
            namespace,
            qualified_name,
            hostname,
            listen_ip,
            master_uri,
            home_dir,
            log_dir,
            resolver,
            params,
            non_ros_args,
        })
    }
}

fn nonempty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host == "::1" || host.starts_with("127.")
}

/// Pick the host to advertise and decide whether the node should only
/// listen on loopback. Override order: `__hostname`, `__ip`,
/// `ROS_HOSTNAME`, `ROS_IP`, then the system hostname.
fn determine_host(specials: &NameMap) -> Result<(String, bool), NodeError> {
    let host = specials
        .get("__hostname")
        .or_else(|| specials.get("__ip"))
        .cloned()
        .or_else(|| nonempty_env("ROS_HOSTNAME"))
        .or_else(|| nonempty_env("ROS_IP"));

    match host {
        Some(host) => {
            let only_localhost = is_loopback_host(&host);
            Ok((host, only_localhost))
        }
        None => {
            let hostname = gethostname::gethostname()
                .into_string()
                .map_err(|raw| NodeError::InvalidHostname(raw.to_string_lossy().into_owned()))?;
            Ok((hostname, false))
        }
    }
}

/// Best-effort typing for `_key:=value` private parameters: bool, int and
/// float literals become their XML-RPC kin, anything else stays a string.
pub(crate) fn parse_param_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::boolean(true),
        "false" => return Value::boolean(false),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i32>() {
        return Value::i4(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Value::double(float);
    }

    Value::string(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn specials_override_name_namespace_and_master() {
        let config = NodeConfig::resolve(
            "/wg/node1",
            &args(&[
                "__name:=n2",
                "__ns:=/other",
                "__master:=http://127.0.0.1:11311",
                "__ip:=127.0.0.1",
            ]),
        )
        .unwrap();

        assert_eq!(config.name, "n2");
        assert_eq!(config.namespace, "/other");
        assert_eq!(config.qualified_name, "/other/n2");
        assert_eq!(config.master_uri.as_str(), "http://127.0.0.1:11311/");
    }

    #[test]
    fn loopback_hosts_restrict_the_listen_ip() {
        let config = NodeConfig::resolve(
            "node1",
            &args(&["__master:=http://127.0.0.1:11311", "__ip:=127.0.0.1"]),
        )
        .unwrap();
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let config = NodeConfig::resolve(
            "node1",
            &args(&[
                "__master:=http://127.0.0.1:11311",
                "__hostname:=big-machine",
            ]),
        )
        .unwrap();
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.hostname, "big-machine");
    }

    #[test]
    fn root_namespace_does_not_double_the_separator() {
        let config =
            NodeConfig::resolve("node1", &args(&["__master:=http://127.0.0.1:11311"])).unwrap();
        assert_eq!(config.qualified_name, "/node1");
    }

    #[test]
    fn params_and_rest_pass_through() {
        let config = NodeConfig::resolve(
            "node1",
            &args(&["__master:=http://127.0.0.1:11311", "_rate:=10", "extra"]),
        )
        .unwrap();

        assert_eq!(config.params.get("rate").map(String::as_str), Some("10"));
        assert_eq!(config.non_ros_args, vec!["extra".to_string()]);
    }

    #[test]
    fn param_values_are_typed_best_effort() {
        assert_eq!(parse_param_value("true"), Value::boolean(true));
        assert_eq!(parse_param_value("10"), Value::i4(10));
        assert_eq!(parse_param_value("0.5"), Value::double(0.5));
        assert_eq!(
            parse_param_value("hello"),
            Value::string("hello".to_string())
        );
    }
}
