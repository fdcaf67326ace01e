use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use zbus::{zvariant::OwnedObjectPath, Connection, Proxy};

use crate::errors::DiagError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UnitState {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub active: bool,
}

impl UnitState {
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Unit states keyed by unit name without the `.service` suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitSnapshot {
    units: BTreeMap<String, UnitState>,
}

impl UnitSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut state: UnitState) {
        state.name = unit_key(&state.name).to_string();
        self.units.insert(state.name.clone(), state);
    }

    pub fn with(mut self, name: &str, exists: bool, enabled: bool, active: bool) -> Self {
        self.insert(UnitState {
            name: name.to_string(),
            exists,
            enabled,
            active,
        });
        self
    }

    /// Unknown units read as absent.
    pub fn get(&self, name: &str) -> UnitState {
        self.units
            .get(unit_key(name))
            .cloned()
            .unwrap_or_else(|| UnitState::absent(unit_key(name)))
    }

    /// All recorded units in name order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitState> {
        self.units.values()
    }
}

fn unit_key(name: &str) -> &str {
    name.strip_suffix(".service").unwrap_or(name)
}

#[async_trait]
pub trait UnitProvider: Send + Sync {
    async fn unit_snapshot(&self, names: &[&str]) -> Result<UnitSnapshot, DiagError>;
}

#[derive(Debug, Clone)]
struct RawUnit {
    name: String,
    load_state: String,
    active_state: String,
}

#[derive(Debug, Clone)]
struct RawUnitFile {
    path: String,
    state: String,
}

type ListUnitRecord = (
    String,
    String,
    String,
    String,
    String,
    String,
    OwnedObjectPath,
    u32,
    String,
    OwnedObjectPath,
);

#[derive(Debug, Default)]
pub struct DbusSystemdClient;

impl DbusSystemdClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitProvider for DbusSystemdClient {
    async fn unit_snapshot(&self, names: &[&str]) -> Result<UnitSnapshot, DiagError> {
        let connection = Connection::system().await.map_err(|err| {
            DiagError::snapshot(format!("failed to connect to system dbus: {err}"))
        })?;

        let proxy = Proxy::new(
            &connection,
            "org.freedesktop.systemd1",
            "/org/freedesktop/systemd1",
            "org.freedesktop.systemd1.Manager",
        )
        .await
        .map_err(|err| {
            DiagError::snapshot(format!("failed to create systemd dbus proxy: {err}"))
        })?;

        let rows: Vec<ListUnitRecord> = proxy.call("ListUnits", &()).await.map_err(|err| {
            DiagError::snapshot(format!("failed to list units from systemd: {err}"))
        })?;
        let files: Vec<(String, String)> =
            proxy.call("ListUnitFiles", &()).await.map_err(|err| {
                DiagError::snapshot(format!("failed to list unit files from systemd: {err}"))
            })?;

        let raw_units = rows
            .into_iter()
            .map(
                |(
                    name,
                    _description,
                    load_state,
                    active_state,
                    _sub_state,
                    _following,
                    _unit_path,
                    _job_id,
                    _job_type,
                    _job_path,
                )| RawUnit {
                    name,
                    load_state,
                    active_state,
                },
            )
            .collect();
        let raw_files = files
            .into_iter()
            .map(|(path, state)| RawUnitFile { path, state })
            .collect();

        Ok(build_snapshot(names, raw_units, raw_files))
    }
}

fn build_snapshot(
    names: &[&str],
    raw_units: Vec<RawUnit>,
    raw_files: Vec<RawUnitFile>,
) -> UnitSnapshot {
    let mut loaded: HashMap<String, RawUnit> = raw_units
        .into_iter()
        .filter(|unit| unit.name.ends_with(".service"))
        .map(|unit| (unit_key(&unit.name).to_string(), unit))
        .collect();
    let mut file_states: HashMap<String, String> = raw_files
        .into_iter()
        .filter_map(|file| {
            let file_name = Path::new(&file.path).file_name()?.to_str()?.to_string();
            file_name
                .ends_with(".service")
                .then(|| (unit_key(&file_name).to_string(), file.state))
        })
        .collect();

    let mut snapshot = UnitSnapshot::new();
    for name in names {
        let key = unit_key(name);
        let unit = loaded.remove(key);
        let file_state = file_states.remove(key);
        snapshot.insert(UnitState {
            name: key.to_string(),
            exists: unit
                .as_ref()
                .is_some_and(|unit| unit.load_state == "loaded")
                || file_state.is_some(),
            enabled: file_state.as_deref() == Some("enabled"),
            active: unit.is_some_and(|unit| unit.active_state == "active"),
        });
    }
    snapshot
}

/// Reads a snapshot recorded as `{"<unit>": {"exists": .., "enabled": .., "active": ..}}`.
#[derive(Debug, Clone)]
pub struct FileSnapshotProvider {
    path: PathBuf,
}

impl FileSnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UnitProvider for FileSnapshotProvider {
    async fn unit_snapshot(&self, _names: &[&str]) -> Result<UnitSnapshot, DiagError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            DiagError::snapshot(format!("failed to read {}: {err}", self.path.display()))
        })?;
        parse_snapshot(&raw)
    }
}

pub fn parse_snapshot(raw: &str) -> Result<UnitSnapshot, DiagError> {
    let units: BTreeMap<String, UnitState> = serde_json::from_str(raw)
        .map_err(|err| DiagError::snapshot(format!("invalid snapshot json: {err}")))?;

    let mut snapshot = UnitSnapshot::new();
    for (name, mut state) in units {
        state.name = name;
        snapshot.insert(state);
    }
    Ok(snapshot)
}

pub fn systemd_present() -> bool {
    Path::new("/run/systemd/system").is_dir()
}

#[cfg(test)]
mod tests {
    use super::{
        build_snapshot, parse_snapshot, FileSnapshotProvider, RawUnit, RawUnitFile, UnitProvider,
        UnitState,
    };
    use crate::errors::DiagError;

    fn raw_unit(name: &str, load_state: &str, active_state: &str) -> RawUnit {
        RawUnit {
            name: name.to_string(),
            load_state: load_state.to_string(),
            active_state: active_state.to_string(),
        }
    }

    #[test]
    fn maps_service_units_to_requested_names() {
        let snapshot = build_snapshot(
            &["docker", "iptables", "openshift-node"],
            vec![
                raw_unit("docker.service", "loaded", "active"),
                raw_unit("docker.socket", "loaded", "active"),
                raw_unit("iptables.service", "loaded", "inactive"),
                raw_unit("sshd.service", "loaded", "active"),
            ],
            vec![
                RawUnitFile {
                    path: "/usr/lib/systemd/system/docker.service".to_string(),
                    state: "enabled".to_string(),
                },
                RawUnitFile {
                    path: "/usr/lib/systemd/system/iptables.service".to_string(),
                    state: "disabled".to_string(),
                },
            ],
        );

        let docker = snapshot.get("docker");
        assert!(docker.exists && docker.enabled && docker.active);
        let iptables = snapshot.get("iptables.service");
        assert!(iptables.exists && !iptables.enabled && !iptables.active);
        assert_eq!(snapshot.get("openshift-node"), UnitState::absent("openshift-node"));
        assert_eq!(snapshot.iter().count(), 3);
    }

    #[test]
    fn unit_file_alone_counts_as_existing() {
        let snapshot = build_snapshot(
            &["openvswitch"],
            vec![],
            vec![RawUnitFile {
                path: "/etc/systemd/system/openvswitch.service".to_string(),
                state: "enabled".to_string(),
            }],
        );

        let ovs = snapshot.get("openvswitch");
        assert!(ovs.exists && ovs.enabled && !ovs.active);
    }

    #[test]
    fn parses_snapshot_json() {
        let snapshot = parse_snapshot(
            r#"{"docker.service": {"exists": true, "enabled": true}, "iptables": {}}"#,
        )
        .expect("valid snapshot");

        let docker = snapshot.get("docker");
        assert_eq!(docker.name, "docker");
        assert!(docker.exists && docker.enabled && !docker.active);
        assert!(!snapshot.get("iptables").exists);
        assert_eq!(
            snapshot.iter().map(|unit| unit.name.as_str()).collect::<Vec<_>>(),
            vec!["docker", "iptables"]
        );
    }

    #[test]
    fn rejects_malformed_snapshot() {
        let err = parse_snapshot(r#"{"docker": {"exists": "yes"}}"#).expect_err("invalid");
        assert!(matches!(err, DiagError::Snapshot(_)));
    }

    #[tokio::test]
    async fn missing_snapshot_file_is_snapshot_error() {
        let provider = FileSnapshotProvider::new("/nonexistent/snapshot.json");
        let err = provider.unit_snapshot(&[]).await.expect_err("missing file");
        assert!(err.to_string().contains("failed to read"));
    }
}
