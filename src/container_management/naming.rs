//! Deterministic names and label sets for runtime objects.
//!
//! Labels are the only state the engine leaves behind: a later process
//! rediscovers a lab by recomputing its hash and filtering on them.

use std::collections::{BTreeMap, HashMap};

use crate::configuration::Settings;

pub const APP_LABEL_VALUE: &str = "kathara";

/// `<device_prefix>_<user>_<machine>_<lab_hash>`; shared mode drops `<user>`.
pub fn container_name(settings: &Settings, user: &str, machine_name: &str, lab_hash: &str) -> String {
    if settings.shared_cd {
        format!("{}_{}_{}", settings.device_prefix, machine_name, lab_hash)
    } else {
        format!(
            "{}_{}_{}_{}",
            settings.device_prefix, user, machine_name, lab_hash
        )
    }
}

/// `<net_prefix>_<user>_<link>_<lab_hash>`; shared mode is `<net_prefix>_<link>`.
pub fn network_name(settings: &Settings, user: &str, link_name: &str, lab_hash: &str) -> String {
    if settings.shared_cd {
        format!("{}_{}", settings.net_prefix, link_name)
    } else {
        format!(
            "{}_{}_{}_{}",
            settings.net_prefix, user, link_name, lab_hash
        )
    }
}

pub fn machine_labels(
    settings: &Settings,
    user: &str,
    machine_name: &str,
    lab_hash: &str,
) -> BTreeMap<String, String> {
    let mut labels = base_labels(user, machine_name, lab_hash);
    labels.insert("shell".to_string(), settings.device_shell.clone());
    labels
}

pub fn network_labels(user: &str, link_name: &str, lab_hash: &str) -> BTreeMap<String, String> {
    base_labels(user, link_name, lab_hash)
}

fn base_labels(user: &str, name: &str, lab_hash: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_LABEL_VALUE.to_string()),
        ("name".to_string(), name.to_string()),
        ("lab_hash".to_string(), lab_hash.to_string()),
        ("user".to_string(), user.to_string()),
    ])
}

/// Ordered `key=value` selectors, all of which must match.
///
/// Always starts with `app=kathara`, then `user`, `lab_hash` and `name`
/// in that order when given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    labels: Vec<String>,
}

impl LabelFilter {
    pub fn new(lab_hash: Option<&str>, name: Option<&str>, user: Option<&str>) -> Self {
        let mut labels = vec![format!("app={}", APP_LABEL_VALUE)];
        if let Some(user) = user {
            labels.push(format!("user={}", user));
        }
        if let Some(lab_hash) = lab_hash {
            labels.push(format!("lab_hash={}", lab_hash));
        }
        if let Some(name) = name {
            labels.push(format!("name={}", name));
        }
        Self { labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Runtime filter map, `{"label": [...]}`.
    pub fn to_filters(&self) -> HashMap<String, Vec<String>> {
        HashMap::from([("label".to_string(), self.labels.clone())])
    }

    /// True if `labels` carries every selector of this filter.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.labels.iter().all(|selector| match selector.split_once('=') {
            Some((key, value)) => labels.get(key).map(|v| v == value).unwrap_or(false),
            None => labels.contains_key(selector.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(shared_cd: bool) -> Settings {
        Settings {
            shared_cd,
            device_prefix: "dev_prefix".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn container_name_default_mode() {
        assert_eq!(
            container_name(&settings(false), "kathara-user", "test_device", "lab_hash"),
            "dev_prefix_kathara-user_test_device_lab_hash"
        );
    }

    #[test]
    fn container_name_shared_mode() {
        assert_eq!(
            container_name(&settings(true), "kathara-user", "test_device", "lab_hash"),
            "dev_prefix_test_device_lab_hash"
        );
    }

    #[test]
    fn network_names() {
        assert_eq!(
            network_name(&settings(false), "user", "A", "hash"),
            "kathara_user_A_hash"
        );
        assert_eq!(network_name(&settings(true), "user", "A", "hash"), "kathara_A");
    }

    #[test]
    fn machine_label_set() {
        let labels = machine_labels(&settings(false), "test-user", "test_device", "hash");
        let expected = BTreeMap::from([
            ("app".to_string(), "kathara".to_string()),
            ("name".to_string(), "test_device".to_string()),
            ("lab_hash".to_string(), "hash".to_string()),
            ("user".to_string(), "test-user".to_string()),
            ("shell".to_string(), "/bin/bash".to_string()),
        ]);
        assert_eq!(labels, expected);
    }

    #[test]
    fn empty_filter_is_app_only() {
        let filter = LabelFilter::new(None, None, None);
        assert_eq!(filter.labels(), ["app=kathara"]);
        assert_eq!(
            filter.to_filters(),
            HashMap::from([("label".to_string(), vec!["app=kathara".to_string()])])
        );
    }

    #[test]
    fn filter_order_is_user_lab_hash_name() {
        let filter = LabelFilter::new(Some("lab_hash_value"), Some("test_device"), Some("user_name_value"));
        assert_eq!(
            filter.labels(),
            [
                "app=kathara",
                "user=user_name_value",
                "lab_hash=lab_hash_value",
                "name=test_device"
            ]
        );
        assert_eq!(
            LabelFilter::new(Some("h"), None, None).labels(),
            ["app=kathara", "lab_hash=h"]
        );
        assert_eq!(
            LabelFilter::new(None, Some("n"), None).labels(),
            ["app=kathara", "name=n"]
        );
        assert_eq!(
            LabelFilter::new(None, None, Some("u")).labels(),
            ["app=kathara", "user=u"]
        );
    }

    #[test]
    fn filter_matching() {
        let labels = HashMap::from([
            ("app".to_string(), "kathara".to_string()),
            ("lab_hash".to_string(), "h".to_string()),
            ("name".to_string(), "pc1".to_string()),
        ]);
        assert!(LabelFilter::new(Some("h"), Some("pc1"), None).matches(&labels));
        assert!(!LabelFilter::new(Some("h"), Some("pc2"), None).matches(&labels));
        assert!(!LabelFilter::new(None, None, Some("u")).matches(&labels));
    }
}
