//! Field-level instance updates.
//!
//! A [`Delta`] changes exactly one field of one instance. The payload is
//! typed by the field it targets ([`FieldChange`]), and an absent payload
//! means "reset to the field's zero value":
//!
//! | Field | Zero value |
//! |-------|------------|
//! | text fields (app, vip, URLs, ...) | absent |
//! | `Ports`, `HealthcheckUrls`, `MetaData` | empty collection |
//! | `Status` | [`Status::Unknown`] |
//! | `DataCenterInfo` | absent |
//!
//! Collection fields are always replaced whole; there is no element-level
//! change.

use crate::datacenter::DataCenterInfo;
use crate::instance::{normalize_urls, InstanceInfo, ServicePort, Status};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The instance fields a delta can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceField {
    /// Application name
    Application,
    /// Application group
    ApplicationGroup,
    /// Auto-scaling group
    Asg,
    /// Virtual IP address
    VipAddress,
    /// Secure virtual IP address
    SecureVipAddress,
    /// Listening ports
    Ports,
    /// Instance status
    Status,
    /// Homepage URL
    HomepageUrl,
    /// Status page URL
    StatusPageUrl,
    /// Health-check URLs
    HealthcheckUrls,
    /// Metadata map
    MetaData,
    /// Datacenter placement
    DataCenterInfo,
}

impl InstanceField {
    /// Every addressable field, in declaration order.
    pub const ALL: [InstanceField; 12] = [
        InstanceField::Application,
        InstanceField::ApplicationGroup,
        InstanceField::Asg,
        InstanceField::VipAddress,
        InstanceField::SecureVipAddress,
        InstanceField::Ports,
        InstanceField::Status,
        InstanceField::HomepageUrl,
        InstanceField::StatusPageUrl,
        InstanceField::HealthcheckUrls,
        InstanceField::MetaData,
        InstanceField::DataCenterInfo,
    ];
}

/// An untyped field payload, checked against the target field on use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A string value
    Text(String),
    /// A port set
    Ports(BTreeSet<ServicePort>),
    /// A status value
    Status(Status),
    /// A URL set
    Urls(BTreeSet<String>),
    /// A metadata map
    MetaData(BTreeMap<String, String>),
    /// Datacenter placement
    DataCenter(DataCenterInfo),
}

impl FieldValue {
    /// Short name of the payload type, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Ports(_) => "ports",
            FieldValue::Status(_) => "status",
            FieldValue::Urls(_) => "urls",
            FieldValue::MetaData(_) => "metadata",
            FieldValue::DataCenter(_) => "datacenter",
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<Status> for FieldValue {
    fn from(value: Status) -> Self {
        FieldValue::Status(value)
    }
}

impl From<BTreeSet<ServicePort>> for FieldValue {
    fn from(value: BTreeSet<ServicePort>) -> Self {
        FieldValue::Ports(value)
    }
}

impl From<BTreeSet<String>> for FieldValue {
    fn from(value: BTreeSet<String>) -> Self {
        FieldValue::Urls(value)
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        FieldValue::MetaData(value)
    }
}

impl From<DataCenterInfo> for FieldValue {
    fn from(value: DataCenterInfo) -> Self {
        FieldValue::DataCenter(value)
    }
}

/// A typed single-field change. `None` resets the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldChange {
    /// Set or clear the application name
    Application(Option<String>),
    /// Set or clear the application group
    ApplicationGroup(Option<String>),
    /// Set or clear the auto-scaling group
    Asg(Option<String>),
    /// Set or clear the virtual IP address
    VipAddress(Option<String>),
    /// Set or clear the secure virtual IP address
    SecureVipAddress(Option<String>),
    /// Replace or clear the port set
    Ports(Option<BTreeSet<ServicePort>>),
    /// Set or reset the status
    Status(Option<Status>),
    /// Set or clear the homepage URL
    HomepageUrl(Option<String>),
    /// Set or clear the status page URL
    StatusPageUrl(Option<String>),
    /// Replace or clear the health-check URLs
    HealthcheckUrls(Option<BTreeSet<String>>),
    /// Replace or clear the metadata map
    MetaData(Option<BTreeMap<String, String>>),
    /// Set or clear the datacenter placement
    DataCenterInfo(Option<DataCenterInfo>),
}

impl FieldChange {
    /// Pair a field with an untyped payload.
    ///
    /// # Errors
    ///
    /// Returns [`FieldMismatchError::Payload`] if the payload type does not
    /// belong to `field`.
    pub fn new(
        field: InstanceField,
        value: Option<FieldValue>,
    ) -> Result<Self, FieldMismatchError> {
        let mismatch = |value: &FieldValue| FieldMismatchError::Payload {
            field,
            found: value.kind(),
        };

        let change = match (field, value) {
            (InstanceField::Application, None) => FieldChange::Application(None),
            (InstanceField::Application, Some(FieldValue::Text(v))) => {
                FieldChange::Application(Some(v))
            }
            (InstanceField::ApplicationGroup, None) => FieldChange::ApplicationGroup(None),
            (InstanceField::ApplicationGroup, Some(FieldValue::Text(v))) => {
                FieldChange::ApplicationGroup(Some(v))
            }
            (InstanceField::Asg, None) => FieldChange::Asg(None),
            (InstanceField::Asg, Some(FieldValue::Text(v))) => FieldChange::Asg(Some(v)),
            (InstanceField::VipAddress, None) => FieldChange::VipAddress(None),
            (InstanceField::VipAddress, Some(FieldValue::Text(v))) => {
                FieldChange::VipAddress(Some(v))
            }
            (InstanceField::SecureVipAddress, None) => FieldChange::SecureVipAddress(None),
            (InstanceField::SecureVipAddress, Some(FieldValue::Text(v))) => {
                FieldChange::SecureVipAddress(Some(v))
            }
            (InstanceField::Ports, None) => FieldChange::Ports(None),
            (InstanceField::Ports, Some(FieldValue::Ports(v))) => FieldChange::Ports(Some(v)),
            (InstanceField::Status, None) => FieldChange::Status(None),
            (InstanceField::Status, Some(FieldValue::Status(v))) => FieldChange::Status(Some(v)),
            (InstanceField::HomepageUrl, None) => FieldChange::HomepageUrl(None),
            (InstanceField::HomepageUrl, Some(FieldValue::Text(v))) => {
                FieldChange::HomepageUrl(Some(v))
            }
            (InstanceField::StatusPageUrl, None) => FieldChange::StatusPageUrl(None),
            (InstanceField::StatusPageUrl, Some(FieldValue::Text(v))) => {
                FieldChange::StatusPageUrl(Some(v))
            }
            (InstanceField::HealthcheckUrls, None) => FieldChange::HealthcheckUrls(None),
            (InstanceField::HealthcheckUrls, Some(FieldValue::Urls(v))) => {
                FieldChange::HealthcheckUrls(Some(v))
            }
            (InstanceField::MetaData, None) => FieldChange::MetaData(None),
            (InstanceField::MetaData, Some(FieldValue::MetaData(v))) => {
                FieldChange::MetaData(Some(v))
            }
            (InstanceField::DataCenterInfo, None) => FieldChange::DataCenterInfo(None),
            (InstanceField::DataCenterInfo, Some(FieldValue::DataCenter(v))) => {
                FieldChange::DataCenterInfo(Some(v))
            }
            (_, Some(other)) => return Err(mismatch(&other)),
        };
        Ok(change)
    }

    /// The field this change targets.
    #[must_use]
    pub fn field(&self) -> InstanceField {
        match self {
            FieldChange::Application(_) => InstanceField::Application,
            FieldChange::ApplicationGroup(_) => InstanceField::ApplicationGroup,
            FieldChange::Asg(_) => InstanceField::Asg,
            FieldChange::VipAddress(_) => InstanceField::VipAddress,
            FieldChange::SecureVipAddress(_) => InstanceField::SecureVipAddress,
            FieldChange::Ports(_) => InstanceField::Ports,
            FieldChange::Status(_) => InstanceField::Status,
            FieldChange::HomepageUrl(_) => InstanceField::HomepageUrl,
            FieldChange::StatusPageUrl(_) => InstanceField::StatusPageUrl,
            FieldChange::HealthcheckUrls(_) => InstanceField::HealthcheckUrls,
            FieldChange::MetaData(_) => InstanceField::MetaData,
            FieldChange::DataCenterInfo(_) => InstanceField::DataCenterInfo,
        }
    }

    /// The payload as an untyped value, `None` for a reset.
    #[must_use]
    pub fn value(&self) -> Option<FieldValue> {
        match self {
            FieldChange::Application(v)
            | FieldChange::ApplicationGroup(v)
            | FieldChange::Asg(v)
            | FieldChange::VipAddress(v)
            | FieldChange::SecureVipAddress(v)
            | FieldChange::HomepageUrl(v)
            | FieldChange::StatusPageUrl(v) => v.clone().map(FieldValue::Text),
            FieldChange::Ports(v) => v.clone().map(FieldValue::Ports),
            FieldChange::Status(v) => v.map(FieldValue::Status),
            FieldChange::HealthcheckUrls(v) => v.clone().map(FieldValue::Urls),
            FieldChange::MetaData(v) => v.clone().map(FieldValue::MetaData),
            FieldChange::DataCenterInfo(v) => v.clone().map(FieldValue::DataCenter),
        }
    }

    /// Whether this change resets the field.
    #[must_use]
    pub fn is_reset(&self) -> bool {
        self.value().is_none()
    }

    /// Read `field` from `instance` as a change that would reproduce it.
    fn capture(field: InstanceField, instance: &InstanceInfo) -> Self {
        match field {
            InstanceField::Application => FieldChange::Application(instance.app.clone()),
            InstanceField::ApplicationGroup => {
                FieldChange::ApplicationGroup(instance.app_group.clone())
            }
            InstanceField::Asg => FieldChange::Asg(instance.asg.clone()),
            InstanceField::VipAddress => FieldChange::VipAddress(instance.vip_address.clone()),
            InstanceField::SecureVipAddress => {
                FieldChange::SecureVipAddress(instance.secure_vip_address.clone())
            }
            InstanceField::Ports => {
                FieldChange::Ports((!instance.ports.is_empty()).then(|| instance.ports.clone()))
            }
            InstanceField::Status => FieldChange::Status(Some(instance.status)),
            InstanceField::HomepageUrl => FieldChange::HomepageUrl(instance.homepage_url.clone()),
            InstanceField::StatusPageUrl => {
                FieldChange::StatusPageUrl(instance.status_page_url.clone())
            }
            InstanceField::HealthcheckUrls => FieldChange::HealthcheckUrls(
                (!instance.health_check_urls.is_empty())
                    .then(|| instance.health_check_urls.clone()),
            ),
            InstanceField::MetaData => FieldChange::MetaData(
                (!instance.meta_data.is_empty()).then(|| instance.meta_data.clone()),
            ),
            InstanceField::DataCenterInfo => {
                FieldChange::DataCenterInfo(instance.data_center_info.clone())
            }
        }
    }

    /// Write this change into `instance`.
    fn write_into(&self, instance: &mut InstanceInfo) {
        match self {
            FieldChange::Application(v) => instance.app.clone_from(v),
            FieldChange::ApplicationGroup(v) => instance.app_group.clone_from(v),
            FieldChange::Asg(v) => instance.asg.clone_from(v),
            FieldChange::VipAddress(v) => instance.vip_address.clone_from(v),
            FieldChange::SecureVipAddress(v) => instance.secure_vip_address.clone_from(v),
            FieldChange::Ports(v) => instance.ports = v.clone().unwrap_or_default(),
            FieldChange::Status(v) => instance.status = v.unwrap_or_default(),
            FieldChange::HomepageUrl(v) => instance.homepage_url.clone_from(v),
            FieldChange::StatusPageUrl(v) => instance.status_page_url.clone_from(v),
            FieldChange::HealthcheckUrls(v) => {
                instance.health_check_urls =
                    normalize_urls(v.iter().flatten().cloned().map(Some));
            }
            FieldChange::MetaData(v) => instance.meta_data = v.clone().unwrap_or_default(),
            FieldChange::DataCenterInfo(v) => instance.data_center_info.clone_from(v),
        }
    }
}

/// An immutable single-field change to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    id: String,
    change: FieldChange,
}

impl Delta {
    /// Create a delta from a typed change.
    #[must_use]
    pub fn new(id: impl Into<String>, change: FieldChange) -> Self {
        Self {
            id: id.into(),
            change,
        }
    }

    /// Builder producing deltas for one instance.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> DeltaBuilder {
        DeltaBuilder { id: id.into() }
    }

    /// Id of the instance this delta targets.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The targeted field.
    #[must_use]
    pub fn field(&self) -> InstanceField {
        self.change.field()
    }

    /// The typed change.
    #[must_use]
    pub fn change(&self) -> &FieldChange {
        &self.change
    }

    /// The untyped payload, `None` for a reset.
    #[must_use]
    pub fn value(&self) -> Option<FieldValue> {
        self.change.value()
    }
}

/// Produces a new [`Delta`] per call, all targeting the same instance.
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    id: String,
}

impl DeltaBuilder {
    /// Delta for a typed change.
    #[must_use]
    pub fn with_change(&self, change: FieldChange) -> Delta {
        Delta::new(self.id.clone(), change)
    }

    /// Delta for a field and an untyped payload; `None` resets the field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldMismatchError::Payload`] if the payload type does not
    /// belong to `field`.
    pub fn with_delta(
        &self,
        field: InstanceField,
        value: Option<FieldValue>,
    ) -> Result<Delta, FieldMismatchError> {
        Ok(self.with_change(FieldChange::new(field, value)?))
    }
}

impl InstanceInfo {
    /// Apply a delta, returning the updated instance.
    ///
    /// # Errors
    ///
    /// Returns [`FieldMismatchError::Instance`] if the delta targets a
    /// different instance.
    pub fn apply_delta(&self, delta: &Delta) -> Result<InstanceInfo, FieldMismatchError> {
        if delta.id != self.id {
            return Err(FieldMismatchError::Instance {
                expected: self.id.clone(),
                found: delta.id.clone(),
            });
        }

        let mut next = self.clone();
        delta.change.write_into(&mut next);
        tracing::trace!(id = %self.id, field = ?delta.field(), "Applied delta");
        Ok(next)
    }

    /// Deltas that turn `self` into `newer`, one per differing field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldMismatchError::Instance`] if the ids differ.
    pub fn diff(&self, newer: &InstanceInfo) -> Result<Vec<Delta>, FieldMismatchError> {
        if newer.id != self.id {
            return Err(FieldMismatchError::Instance {
                expected: self.id.clone(),
                found: newer.id.clone(),
            });
        }

        let deltas = InstanceField::ALL
            .iter()
            .filter_map(|&field| {
                let current = FieldChange::capture(field, self);
                let target = FieldChange::capture(field, newer);
                (current != target).then(|| Delta::new(self.id.clone(), target))
            })
            .collect();
        Ok(deltas)
    }
}

/// Apply `delta` to `instance`; see [`InstanceInfo::apply_delta`].
///
/// # Errors
///
/// Returns [`FieldMismatchError::Instance`] if the delta targets a different
/// instance.
pub fn apply(instance: &InstanceInfo, delta: &Delta) -> Result<InstanceInfo, FieldMismatchError> {
    instance.apply_delta(delta)
}

/// A delta does not fit its target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldMismatchError {
    /// Delta applied to an instance with a different id
    #[error("delta for instance '{found}' applied to instance '{expected}'")]
    Instance {
        /// Id of the instance being updated
        expected: String,
        /// Id named by the delta
        found: String,
    },
    /// Payload type does not belong to the field
    #[error("field {field:?} cannot hold a {found} payload")]
    Payload {
        /// Targeted field
        field: InstanceField,
        /// Kind of payload supplied
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacenter::{AwsDataCenterInfo, BasicDataCenterInfo};

    fn sample() -> InstanceInfo {
        InstanceInfo::builder()
            .with_id("id1")
            .with_app("discovery")
            .with_app_group("discovery-group")
            .with_vip_address("discovery:7001")
            .with_status(Status::Up)
            .with_ports([ServicePort::new(7001), ServicePort::secure(7002)])
            .with_health_check_urls([Some("http://id1/health".to_string())])
            .with_meta("zone", "a")
            .with_data_center_info(AwsDataCenterInfo::new("us-east-1", "us-east-1a", "i-1"))
            .build()
            .unwrap()
    }

    #[test]
    fn absent_application_clears_name() {
        let instance = sample();
        let delta = Delta::builder("id1")
            .with_delta(InstanceField::Application, None)
            .unwrap();

        let updated = apply(&instance, &delta).unwrap();
        assert_eq!(updated.app(), None);
        assert_eq!(instance.app(), Some("discovery"));
    }

    #[test]
    fn status_set_then_reset() {
        let builder = Delta::builder("id1");
        let down = builder.with_change(FieldChange::Status(Some(Status::Down)));
        let reset = builder.with_change(FieldChange::Status(None));

        let instance = sample().apply_delta(&down).unwrap();
        assert_eq!(instance.status(), Status::Down);

        let instance = instance.apply_delta(&reset).unwrap();
        assert_eq!(instance.status(), Status::Unknown);
    }

    #[test]
    fn collections_are_replaced_whole() {
        let ports: BTreeSet<_> = [ServicePort::new(80)].into_iter().collect();
        let delta = Delta::builder("id1")
            .with_delta(InstanceField::Ports, Some(ports.clone().into()))
            .unwrap();

        let updated = sample().apply_delta(&delta).unwrap();
        assert_eq!(updated.ports(), &ports);

        let cleared = updated
            .apply_delta(&Delta::new("id1", FieldChange::MetaData(None)))
            .unwrap();
        assert!(cleared.meta_data().is_empty());
    }

    #[test]
    fn blank_urls_are_dropped_on_apply() {
        let urls: BTreeSet<String> = [String::new(), "http://x/health".to_string()]
            .into_iter()
            .collect();
        let updated = sample()
            .apply_delta(&Delta::new("id1", FieldChange::HealthcheckUrls(Some(urls))))
            .unwrap();
        assert_eq!(updated.health_check_urls().len(), 1);
    }

    #[test]
    fn wrong_instance_is_rejected() {
        let delta = Delta::new("other", FieldChange::Asg(Some("asg".into())));
        assert_eq!(
            sample().apply_delta(&delta),
            Err(FieldMismatchError::Instance {
                expected: "id1".into(),
                found: "other".into(),
            })
        );
    }

    #[test]
    fn wrong_payload_type_is_rejected() {
        let err = Delta::builder("id1")
            .with_delta(InstanceField::Status, Some("UP".into()))
            .unwrap_err();
        assert_eq!(
            err,
            FieldMismatchError::Payload {
                field: InstanceField::Status,
                found: "text",
            }
        );
    }

    #[test]
    fn field_value_roundtrip_through_change() {
        let info: DataCenterInfo = BasicDataCenterInfo::new("dc", "host").into();
        let change =
            FieldChange::new(InstanceField::DataCenterInfo, Some(info.clone().into())).unwrap();
        assert_eq!(change.field(), InstanceField::DataCenterInfo);
        assert_eq!(change.value(), Some(FieldValue::DataCenter(info)));
        assert!(FieldChange::Asg(None).is_reset());
    }

    #[test]
    fn diff_reproduces_newer_instance() {
        let old = sample();
        let newer = old
            .to_builder()
            .with_status(Status::OutOfService)
            .with_ports([ServicePort::new(9000)])
            .with_data_center_info(BasicDataCenterInfo::new("dc", "host"))
            .build()
            .unwrap();

        let deltas = old.diff(&newer).unwrap();
        let fields: Vec<_> = deltas.iter().map(Delta::field).collect();
        assert_eq!(
            fields,
            vec![
                InstanceField::Ports,
                InstanceField::Status,
                InstanceField::DataCenterInfo
            ]
        );

        let rebuilt = deltas
            .iter()
            .try_fold(old, |acc, delta| acc.apply_delta(delta))
            .unwrap();
        assert_eq!(rebuilt, newer);
    }

    #[test]
    fn diff_of_equal_instances_is_empty() {
        assert!(sample().diff(&sample()).unwrap().is_empty());
    }
}
