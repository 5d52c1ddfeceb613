//! Registered service instance model.
//!
//! An [`InstanceInfo`] is an immutable value. It is produced by
//! [`InstanceInfoBuilder`] at registration time and afterwards only changes
//! by applying a [`Delta`](crate::Delta), which yields a new value.

use crate::datacenter::DataCenterInfo;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle status reported by an instance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Ready to receive traffic
    Up,
    /// Running but must not receive traffic
    Down,
    /// Still initializing
    Starting,
    /// Taken out of rotation by an operator
    OutOfService,
    /// Status not reported
    #[default]
    Unknown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Starting => "STARTING",
            Status::OutOfService => "OUT_OF_SERVICE",
            Status::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A port an instance listens on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    /// Optional port label (e.g. `http`, `grpc`)
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Whether the port speaks a secure protocol
    pub secure: bool,
}

impl ServicePort {
    /// A plain (non-secure) port.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            name: None,
            port,
            secure: false,
        }
    }

    /// A secure port.
    #[must_use]
    pub fn secure(port: u16) -> Self {
        Self {
            name: None,
            port,
            secure: true,
        }
    }

    /// Attach a label to the port.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A registered service instance.
///
/// Fields are read through accessors. The ports and health-check URL sets
/// never contain placeholder entries: the builder, delta application and
/// decoding all strip them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub(crate) id: String,
    pub(crate) app: Option<String>,
    pub(crate) app_group: Option<String>,
    pub(crate) asg: Option<String>,
    pub(crate) vip_address: Option<String>,
    pub(crate) secure_vip_address: Option<String>,
    pub(crate) ports: BTreeSet<ServicePort>,
    pub(crate) status: Status,
    pub(crate) homepage_url: Option<String>,
    pub(crate) status_page_url: Option<String>,
    #[serde(deserialize_with = "deserialize_urls")]
    pub(crate) health_check_urls: BTreeSet<String>,
    pub(crate) meta_data: BTreeMap<String, String>,
    pub(crate) data_center_info: Option<DataCenterInfo>,
}

impl InstanceInfo {
    /// Start building an instance.
    #[must_use]
    pub fn builder() -> InstanceInfoBuilder {
        InstanceInfoBuilder::default()
    }

    /// Builder seeded with this instance's current values.
    #[must_use]
    pub fn to_builder(&self) -> InstanceInfoBuilder {
        InstanceInfoBuilder {
            id: Some(self.id.clone()),
            app: self.app.clone(),
            app_group: self.app_group.clone(),
            asg: self.asg.clone(),
            vip_address: self.vip_address.clone(),
            secure_vip_address: self.secure_vip_address.clone(),
            ports: self.ports.iter().cloned().map(Some).collect(),
            status: self.status,
            homepage_url: self.homepage_url.clone(),
            status_page_url: self.status_page_url.clone(),
            health_check_urls: self.health_check_urls.iter().cloned().map(Some).collect(),
            meta_data: self.meta_data.clone(),
            data_center_info: self.data_center_info.clone(),
        }
    }

    /// Unique instance identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Application name.
    #[must_use]
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// Application group.
    #[must_use]
    pub fn app_group(&self) -> Option<&str> {
        self.app_group.as_deref()
    }

    /// Auto-scaling group label.
    #[must_use]
    pub fn asg(&self) -> Option<&str> {
        self.asg.as_deref()
    }

    /// Virtual IP address.
    #[must_use]
    pub fn vip_address(&self) -> Option<&str> {
        self.vip_address.as_deref()
    }

    /// Secure virtual IP address.
    #[must_use]
    pub fn secure_vip_address(&self) -> Option<&str> {
        self.secure_vip_address.as_deref()
    }

    /// Listening ports.
    #[must_use]
    pub fn ports(&self) -> &BTreeSet<ServicePort> {
        &self.ports
    }

    /// Reported status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Homepage URL.
    #[must_use]
    pub fn homepage_url(&self) -> Option<&str> {
        self.homepage_url.as_deref()
    }

    /// Status page URL.
    #[must_use]
    pub fn status_page_url(&self) -> Option<&str> {
        self.status_page_url.as_deref()
    }

    /// Health-check URLs.
    #[must_use]
    pub fn health_check_urls(&self) -> &BTreeSet<String> {
        &self.health_check_urls
    }

    /// Free-form metadata.
    #[must_use]
    pub fn meta_data(&self) -> &BTreeMap<String, String> {
        &self.meta_data
    }

    /// Datacenter placement.
    #[must_use]
    pub fn data_center_info(&self) -> Option<&DataCenterInfo> {
        self.data_center_info.as_ref()
    }
}

/// Accumulates instance attributes and produces a normalized [`InstanceInfo`].
#[derive(Debug, Clone, Default)]
pub struct InstanceInfoBuilder {
    id: Option<String>,
    app: Option<String>,
    app_group: Option<String>,
    asg: Option<String>,
    vip_address: Option<String>,
    secure_vip_address: Option<String>,
    ports: Vec<Option<ServicePort>>,
    status: Status,
    homepage_url: Option<String>,
    status_page_url: Option<String>,
    health_check_urls: Vec<Option<String>>,
    meta_data: BTreeMap<String, String>,
    data_center_info: Option<DataCenterInfo>,
}

impl InstanceInfoBuilder {
    /// Set the instance id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Set the application group.
    #[must_use]
    pub fn with_app_group(mut self, app_group: impl Into<String>) -> Self {
        self.app_group = Some(app_group.into());
        self
    }

    /// Set the auto-scaling group.
    #[must_use]
    pub fn with_asg(mut self, asg: impl Into<String>) -> Self {
        self.asg = Some(asg.into());
        self
    }

    /// Set the virtual IP address.
    #[must_use]
    pub fn with_vip_address(mut self, vip: impl Into<String>) -> Self {
        self.vip_address = Some(vip.into());
        self
    }

    /// Set the secure virtual IP address.
    #[must_use]
    pub fn with_secure_vip_address(mut self, vip: impl Into<String>) -> Self {
        self.secure_vip_address = Some(vip.into());
        self
    }

    /// Set the ports. `None` entries are dropped at build time.
    #[must_use]
    pub fn with_ports<I, P>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Option<ServicePort>>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Set the homepage URL.
    #[must_use]
    pub fn with_homepage_url(mut self, url: impl Into<String>) -> Self {
        self.homepage_url = Some(url.into());
        self
    }

    /// Set the status page URL.
    #[must_use]
    pub fn with_status_page_url(mut self, url: impl Into<String>) -> Self {
        self.status_page_url = Some(url.into());
        self
    }

    /// Set the health-check URLs. `None` and blank entries are dropped at
    /// build time.
    #[must_use]
    pub fn with_health_check_urls<I, U>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<Option<String>>,
    {
        self.health_check_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the metadata map.
    #[must_use]
    pub fn with_meta_data(mut self, meta_data: BTreeMap<String, String>) -> Self {
        self.meta_data = meta_data;
        self
    }

    /// Add a single metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data.insert(key.into(), value.into());
        self
    }

    /// Set the datacenter placement.
    #[must_use]
    pub fn with_data_center_info(mut self, info: impl Into<DataCenterInfo>) -> Self {
        self.data_center_info = Some(info.into());
        self
    }

    /// Build the instance.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::MissingId`] if no non-empty id was set.
    pub fn build(self) -> Result<InstanceInfo, InstanceError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(InstanceError::MissingId)?;

        Ok(InstanceInfo {
            id,
            app: self.app,
            app_group: self.app_group,
            asg: self.asg,
            vip_address: self.vip_address,
            secure_vip_address: self.secure_vip_address,
            ports: normalize_ports(self.ports),
            status: self.status,
            homepage_url: self.homepage_url,
            status_page_url: self.status_page_url,
            health_check_urls: normalize_urls(self.health_check_urls),
            meta_data: self.meta_data,
            data_center_info: self.data_center_info,
        })
    }
}

/// Drop placeholder port entries.
pub(crate) fn normalize_ports<I>(ports: I) -> BTreeSet<ServicePort>
where
    I: IntoIterator<Item = Option<ServicePort>>,
{
    ports.into_iter().flatten().collect()
}

/// Drop placeholder and blank URL entries.
pub(crate) fn normalize_urls<I>(urls: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    urls.into_iter()
        .flatten()
        .filter(|url| !url.trim().is_empty())
        .collect()
}

fn deserialize_urls<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Option<String>>::deserialize(deserializer)?;
    Ok(normalize_urls(raw))
}

/// Errors raised while building an instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstanceError {
    /// The instance id is missing or blank
    #[error("instance id is missing or empty")]
    MissingId,
}
