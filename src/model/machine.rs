use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::is_truthy;
use crate::container_management::types::ContainerHandle;
use crate::error_handling::types::ManagerError;

/// Attachment of a device to a link, identified by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub link: String,
    pub index: usize,
}

/// A published port: `host` on the runtime host forwards to `guest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub guest: u16,
    pub protocol: String,
}

impl PortMapping {
    /// Parses `host:guest/proto`, `host:guest` or `guest`; protocol defaults to tcp.
    pub fn parse(value: &str) -> Result<Self, ManagerError> {
        let invalid = || ManagerError::InvalidMetadata(format!("invalid port mapping `{}`", value));
        let (ports, protocol) = match value.split_once('/') {
            Some((ports, proto)) if !proto.is_empty() => (ports, proto.to_lowercase()),
            Some(_) => return Err(invalid()),
            None => (value, "tcp".to_string()),
        };
        let (host, guest) = match ports.split_once(':') {
            Some((host, guest)) => (host, guest),
            None => (ports, ports),
        };
        Ok(Self {
            host: host.trim().parse().map_err(|_| invalid())?,
            guest: guest.trim().parse().map_err(|_| invalid())?,
            protocol,
        })
    }
}

/// One emulated network node, deployed as one container.
#[derive(Debug)]
pub struct Machine {
    name: String,
    lab_hash: String,
    meta: BTreeMap<String, Value>,
    interfaces: Vec<Interface>,
    api_object: RwLock<Option<ContainerHandle>>,
}

impl Machine {
    pub fn new(lab_hash: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            lab_hash: lab_hash.to_string(),
            meta: BTreeMap::new(),
            interfaces: Vec::new(),
            api_object: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lab_hash(&self) -> &str {
        &self.lab_hash
    }

    pub fn add_meta<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.meta.insert(key.to_string(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Appends an interface towards `link` and returns its index.
    pub fn add_interface(&mut self, link: &str) -> usize {
        let index = self.interfaces.len();
        self.interfaces.push(Interface {
            link: link.to_string(),
            index,
        });
        index
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn image(&self) -> Option<String> {
        self.meta_string("image")
    }

    pub fn mem(&self) -> Option<String> {
        self.meta_string("mem")
    }

    /// CPU share of the device; must be a finite number above zero.
    pub fn cpus(&self) -> Result<Option<f64>, ManagerError> {
        let invalid = |value: &dyn std::fmt::Display| {
            ManagerError::InvalidMetadata(format!("invalid cpus value `{}` for {}", value, self.name))
        };
        let cpus = match self.meta("cpus") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(n))?,
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| invalid(s))?,
            Some(other) => return Err(invalid(other)),
        };
        if !cpus.is_finite() || cpus <= 0.0 {
            return Err(invalid(&cpus));
        }
        Ok(Some(cpus))
    }

    /// Commands run once the device is started, in declaration order.
    pub fn exec_commands(&self) -> Vec<String> {
        match self.meta("exec") {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_bridged(&self) -> bool {
        self.meta("bridged").map(is_truthy).unwrap_or(false)
    }

    pub fn is_privileged(&self) -> bool {
        self.meta("privileged").map(is_truthy).unwrap_or(false)
    }


    pub fn envs(&self) -> BTreeMap<String, String> {
        match self.meta("envs") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    pub fn ports(&self) -> Result<Vec<PortMapping>, ManagerError> {
        match self.meta("ports") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => PortMapping::parse(s),
                    other => PortMapping::parse(&other.to_string()),
                })
                .collect(),
            Some(Value::String(s)) => Ok(vec![PortMapping::parse(s)?]),
            _ => Ok(Vec::new()),
        }
    }

    pub fn api_object(&self) -> Option<ContainerHandle> {
        self.api_object
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_api_object(&self, handle: Option<ContainerHandle>) {
        *self.api_object.write().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    /// Returns the runtime handle, failing if the device was never created.
    pub fn require_api_object(&self) -> Result<ContainerHandle, ManagerError> {
        self.api_object()
            .ok_or_else(|| ManagerError::HandleNotSet(format!("device {}", self.name)))
    }

    fn meta_string(&self, key: &str) -> Option<String> {
        match self.meta(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
