//! Translation of a deployment request into the daemon's provisioning body.

use crate::error::{Error, Result};
use crate::types::Image;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Validated deployment parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DeploySpec {
    pub name: String,
    /// Container image reference, e.g. `ghcr.io/org/paper:latest`
    pub image: String,
    /// Catalog entry name the image was picked from
    pub image_name: Option<String>,
    pub memory: u64,
    pub cpu: u64,
    pub disk: Option<u64>,
    /// `containerPort:hostPort` pairs, comma separated
    pub ports: String,
    pub primary: String,
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostBinding {
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Port exposure derived from a port string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortMap {
    pub exposed: BTreeMap<String, Value>,
    pub bindings: BTreeMap<String, Vec<HostBinding>>,
}

/// Parse `containerPort:hostPort[,containerPort:hostPort...]`.
///
/// Every pair is exposed as both `<port>/tcp` and `<port>/udp`, bound to
/// the same host port.
pub fn translate_ports(ports: &str) -> Result<PortMap> {
    let mut map = PortMap::default();

    for pair in ports
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let (container, host) = pair
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("Invalid port mapping '{pair}'")))?;
        let container = parse_port(container, pair)?;
        let host = parse_port(host, pair)?;

        for proto in ["tcp", "udp"] {
            let key = format!("{container}/{proto}");
            map.exposed.insert(key.clone(), Value::Object(Map::new()));
            map.bindings.insert(
                key,
                vec![HostBinding {
                    host_port: host.to_string(),
                }],
            );
        }
    }

    if map.exposed.is_empty() {
        return Err(Error::validation("At least one port mapping is required"));
    }
    Ok(map)
}

fn parse_port(raw: &str, pair: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::validation(format!("Invalid port mapping '{pair}'")))
}

/// Body of `POST /instances/create`
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPayload {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Env")]
    pub env: Vec<String>,
    #[serde(rename = "Scripts", skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Value>,
    #[serde(rename = "Memory")]
    pub memory: u64,
    #[serde(rename = "Cpu")]
    pub cpu: u64,
    #[serde(rename = "Disk", skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    #[serde(rename = "ExposedPorts")]
    pub exposed_ports: BTreeMap<String, Value>,
    #[serde(rename = "PortBindings")]
    pub port_bindings: BTreeMap<String, Vec<HostBinding>>,
    #[serde(rename = "AltImages", skip_serializing_if = "Vec::is_empty")]
    pub alt_images: Vec<Value>,
    #[serde(rename = "StopCommand", skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
    #[serde(rename = "imageData", skip_serializing_if = "Option::is_none")]
    pub image_data: Option<Image>,
}

impl ProvisionPayload {
    /// Build the payload for instance `id`, embedding the catalog entry so the
    /// daemon needs no second round trip.
    pub fn build(id: &str, spec: &DeploySpec, image: Option<&Image>) -> Result<Self> {
        let ports = translate_ports(&spec.ports)?;

        Ok(Self {
            name: spec.name.clone(),
            id: id.to_string(),
            image: spec.image.clone(),
            env: merge_env(image.map(|i| &i.env), &spec.variables),
            scripts: image.map(|i| i.scripts.clone()).filter(|s| !s.is_null()),
            memory: spec.memory,
            cpu: spec.cpu,
            disk: spec.disk,
            exposed_ports: ports.exposed,
            port_bindings: ports.bindings,
            alt_images: image.map(|i| i.alt_images.clone()).unwrap_or_default(),
            stop_command: image.and_then(|i| i.stop_command.clone()),
            image_data: image.cloned(),
        })
    }
}

/// Catalog defaults overlaid with user variables, as `KEY=value` entries.
///
/// Catalog `Env` may be an object (`{"KEY": "default"}`) or a list of
/// `KEY=value` strings.
fn merge_env(defaults: Option<&Value>, variables: &BTreeMap<String, String>) -> Vec<String> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();

    match defaults {
        Some(Value::Object(map)) => {
            for (k, v) in map {
                env.insert(k.clone(), scalar_to_string(v));
            }
        }
        Some(Value::Array(items)) => {
            for item in items.iter().filter_map(Value::as_str) {
                match item.split_once('=') {
                    Some((k, v)) => env.insert(k.to_string(), v.to_string()),
                    None => env.insert(item.to_string(), String::new()),
                };
            }
        }
        _ => {}
    }

    for (k, v) in variables {
        env.insert(k.clone(), v.clone());
    }

    env.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Render a JSON scalar the way it appears in an environment variable.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> DeploySpec {
        DeploySpec {
            name: "survival".into(),
            image: "ghcr.io/powerport/paper:latest".into(),
            image_name: Some("Paper".into()),
            memory: 2048,
            cpu: 100,
            disk: None,
            ports: "25565:25565".into(),
            primary: "25565".into(),
            variables: BTreeMap::from([("EULA".to_string(), "true".to_string())]),
        }
    }

    fn image() -> Image {
        serde_json::from_value(json!({
            "Name": "Paper",
            "Image": "ghcr.io/powerport/paper:latest",
            "Env": {"EULA": "false", "VERSION": "1.20.4"},
            "Scripts": {"Install": [{"Uri": "https://example.com/paper.jar", "Path": "server.jar"}]},
            "AltImages": ["ghcr.io/powerport/paper:java17"],
            "StopCommand": "stop"
        }))
        .unwrap()
    }

    #[test]
    fn test_single_pair_binds_tcp_and_udp() {
        let map = translate_ports("25565:25565").unwrap();

        assert_eq!(map.exposed.len(), 2);
        assert!(map.exposed.contains_key("25565/tcp"));
        assert!(map.exposed.contains_key("25565/udp"));
        for key in ["25565/tcp", "25565/udp"] {
            assert_eq!(map.bindings[key], vec![HostBinding { host_port: "25565".into() }]);
        }
    }

    #[test]
    fn test_multiple_pairs_keep_host_port() {
        let map = translate_ports("25565:30001, 8080:30002").unwrap();

        assert_eq!(map.exposed.len(), 4);
        assert_eq!(map.bindings["8080/udp"][0].host_port, "30002");
        assert_eq!(map.bindings["25565/tcp"][0].host_port, "30001");
    }

    #[test]
    fn test_malformed_ports_rejected() {
        for bad in ["", "25565", "abc:1", "1:99999", "0:80", " , "] {
            let err = translate_ports(bad).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_payload_embeds_catalog_entry() {
        let payload = ProvisionPayload::build("ab12cd34", &spec(), Some(&image())).unwrap();
        let body = serde_json::to_value(&payload).unwrap();

        assert_eq!(body["Id"], "ab12cd34");
        assert_eq!(body["Memory"], 2048);
        assert_eq!(body["StopCommand"], "stop");
        assert_eq!(body["AltImages"][0], "ghcr.io/powerport/paper:java17");
        assert_eq!(body["Scripts"]["Install"][0]["Path"], "server.jar");
        assert_eq!(body["PortBindings"]["25565/udp"][0]["HostPort"], "25565");
        assert_eq!(body["imageData"]["Name"], "Paper");
        assert_eq!(body["Env"], json!(["EULA=true", "VERSION=1.20.4"]));
    }

    #[test]
    fn test_payload_omits_absent_optionals() {
        let payload = ProvisionPayload::build("ab12cd34", &spec(), None).unwrap();
        let body = serde_json::to_value(&payload).unwrap();
        let object = body.as_object().unwrap();

        for key in ["Scripts", "Disk", "AltImages", "StopCommand", "imageData"] {
            assert!(!object.contains_key(key), "{key} should be omitted");
        }
        assert_eq!(body["Env"], json!(["EULA=true"]));
    }

    #[test]
    fn test_env_from_list_defaults() {
        let defaults = json!(["A=1", "B=two=2", "C"]);
        let env = merge_env(Some(&defaults), &BTreeMap::new());
        assert_eq!(env, vec!["A=1", "B=two=2", "C="]);
    }
}
