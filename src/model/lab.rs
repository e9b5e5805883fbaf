use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use md5::{Digest, Md5};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::link::Link;
use super::machine::Machine;
use super::is_truthy;

/// Lab option enabling privileged mode for every device.
pub const PRIVILEGED_MACHINES: &str = "privileged_machines";

/// Returns the url-safe, unpadded base64 form of the MD5 digest of `value`.
///
/// This is the identity used to scope every runtime object of a lab, so it
/// must stay stable across processes and releases.
pub fn generate_urlsafe_hash(value: &str) -> String {
    let digest = Md5::digest(value.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// A network scenario: devices, links and deployment options.
#[derive(Debug)]
pub struct Lab {
    name: String,
    hash: String,
    path: Option<PathBuf>,
    options: BTreeMap<String, Value>,
    machines: BTreeMap<String, Machine>,
    links: BTreeMap<String, Link>,
}

impl Lab {
    pub fn new(name: &str) -> Self {
        Self::build(name, None)
    }

    /// Creates a lab backed by a directory; the hash derives from the path.
    pub fn with_path<P: AsRef<Path>>(name: &str, path: P) -> Self {
        Self::build(name, Some(path.as_ref().to_path_buf()))
    }

    fn build(name: &str, path: Option<PathBuf>) -> Self {
        let identity = match &path {
            Some(p) => p.to_string_lossy().into_owned(),
            None => name.to_string(),
        };
        Self {
            name: name.to_string(),
            hash: generate_urlsafe_hash(&identity),
            path,
            options: BTreeMap::new(),
            machines: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Directory bound to `/shared` inside devices, when the lab has a path.
    pub fn shared_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join("shared"))
    }

    pub fn add_option<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.options.insert(key.to_string(), value.into());
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn has_privileged_machines(&self) -> bool {
        self.option(PRIVILEGED_MACHINES).map(is_truthy).unwrap_or(false)
    }

    pub fn get_or_new_machine(&mut self, name: &str) -> &mut Machine {
        let hash = self.hash.clone();
        self.machines
            .entry(name.to_string())
            .or_insert_with(|| Machine::new(&hash, name))
    }

    pub fn get_or_new_link(&mut self, name: &str) -> &mut Link {
        let hash = self.hash.clone();
        self.links
            .entry(name.to_string())
            .or_insert_with(|| Link::new(&hash, name))
    }

    /// Wires `machine` to `link`, registering both if needed.
    ///
    /// Returns the index assigned to the new interface.
    pub fn connect_machine_to_link(&mut self, machine: &str, link: &str) -> usize {
        self.get_or_new_link(link);
        self.get_or_new_machine(machine).add_interface(link)
    }

    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.get(name)
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// De-duplicated set of images needed by the lab's devices.
    pub fn images(&self, default_image: &str) -> BTreeSet<String> {
        self.machines
            .values()
            .map(|m| m.image().unwrap_or_else(|| default_image.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_name() {
        let lab = Lab::new("Default scenario");
        assert_eq!(lab.hash(), "9pe3y6IDMwx4PfOPu5mbNg");
        assert_eq!(Lab::new("Default scenario").hash(), lab.hash());
    }

    #[test]
    fn hash_prefers_path() {
        let lab = Lab::with_path("Default scenario", "/labs/default");
        assert_eq!(lab.hash(), generate_urlsafe_hash("/labs/default"));
        assert_ne!(lab.hash(), Lab::new("Default scenario").hash());
        assert_eq!(
            lab.shared_path(),
            Some(PathBuf::from("/labs/default/shared"))
        );
    }

    #[test]
    fn names_are_unique() {
        let mut lab = Lab::new("unique");
        lab.get_or_new_machine("pc1").add_meta("image", "kathara/test1");
        lab.get_or_new_machine("pc1");
        lab.get_or_new_link("A");
        lab.get_or_new_link("A");
        assert_eq!(lab.machine_count(), 1);
        assert_eq!(lab.links().count(), 1);
        assert_eq!(lab.machine("pc1").unwrap().image().as_deref(), Some("kathara/test1"));
    }

    #[test]
    fn interfaces_are_contiguous() {
        let mut lab = Lab::new("wiring");
        assert_eq!(lab.connect_machine_to_link("pc1", "A"), 0);
        assert_eq!(lab.connect_machine_to_link("pc1", "B"), 1);
        assert_eq!(lab.connect_machine_to_link("pc2", "B"), 0);

        let indices: Vec<_> = lab
            .machine("pc1")
            .unwrap()
            .interfaces()
            .iter()
            .map(|i| (i.link.as_str(), i.index))
            .collect();
        assert_eq!(indices, vec![("A", 0), ("B", 1)]);
        assert!(lab.link("B").is_some());
    }

    #[test]
    fn images_are_deduplicated_with_default() {
        let mut lab = Lab::new("images");
        lab.get_or_new_machine("pc1").add_meta("image", "kathara/frr");
        lab.get_or_new_machine("pc2").add_meta("image", "kathara/frr");
        lab.get_or_new_machine("pc3");

        let images: Vec<_> = lab.images("kathara/base").into_iter().collect();
        assert_eq!(images, vec!["kathara/base".to_string(), "kathara/frr".to_string()]);
    }

    #[test]
    fn privileged_option() {
        let mut lab = Lab::new("privileged");
        assert!(!lab.has_privileged_machines());
        lab.add_option(PRIVILEGED_MACHINES, true);
        assert!(lab.has_privileged_machines());
    }
}
