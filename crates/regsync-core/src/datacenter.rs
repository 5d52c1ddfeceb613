//! Datacenter placement of a registered instance.
//!
//! The two variants are carried with serde's external tagging, so the wire
//! form always names the variant (`{"Basic": {...}}` / `{"Aws": {...}}`)
//! instead of relying on which fields happen to be present.

use serde::{Deserialize, Serialize};

/// Where an instance runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataCenterInfo {
    /// Plain host with a name and public/private addresses
    Basic(BasicDataCenterInfo),
    /// Cloud-hosted (AWS) instance metadata
    Aws(AwsDataCenterInfo),
}

impl DataCenterInfo {
    /// Datacenter name used for display and logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            DataCenterInfo::Basic(info) => &info.name,
            DataCenterInfo::Aws(info) => &info.name,
        }
    }

    /// The address other nodes should prefer when connecting, if known.
    #[must_use]
    pub fn default_address(&self) -> Option<&str> {
        match self {
            DataCenterInfo::Basic(info) => info
                .public_address
                .as_deref()
                .or(info.private_address.as_deref()),
            DataCenterInfo::Aws(info) => info
                .public_ip
                .as_deref()
                .or(info.private_ip.as_deref()),
        }
    }
}

impl From<BasicDataCenterInfo> for DataCenterInfo {
    fn from(info: BasicDataCenterInfo) -> Self {
        DataCenterInfo::Basic(info)
    }
}

impl From<AwsDataCenterInfo> for DataCenterInfo {
    fn from(info: AwsDataCenterInfo) -> Self {
        DataCenterInfo::Aws(info)
    }
}

/// Non-cloud host description.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BasicDataCenterInfo {
    /// Datacenter name
    pub name: String,
    /// Host name
    pub hostname: Option<String>,
    /// Publicly routable address
    pub public_address: Option<String>,
    /// Address inside the datacenter network
    pub private_address: Option<String>,
}

impl BasicDataCenterInfo {
    /// Create a basic datacenter description for a single host.
    #[must_use]
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: Some(hostname.into()),
            public_address: None,
            private_address: None,
        }
    }

    /// Set the public address.
    #[must_use]
    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    /// Set the private address.
    #[must_use]
    pub fn with_private_address(mut self, address: impl Into<String>) -> Self {
        self.private_address = Some(address.into());
        self
    }
}

/// AWS EC2 instance metadata.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AwsDataCenterInfo {
    /// Datacenter name
    pub name: String,
    /// Region, e.g. `us-east-1`
    pub region: String,
    /// Availability zone, e.g. `us-east-1a`
    pub zone: String,
    /// EC2 instance id
    pub instance_id: String,
    /// AMI the instance was launched from
    pub ami_id: Option<String>,
    /// EC2 instance type
    pub instance_type: Option<String>,
    /// Placement group
    pub placement_group: Option<String>,
    /// Public IPv4 address
    pub public_ip: Option<String>,
    /// Public DNS name
    pub public_hostname: Option<String>,
    /// Private IPv4 address
    pub private_ip: Option<String>,
    /// Private DNS name
    pub private_hostname: Option<String>,
    /// VPC identifier
    pub vpc_id: Option<String>,
    /// Owning account
    pub account_id: Option<String>,
}

impl AwsDataCenterInfo {
    /// Create AWS metadata with the mandatory placement fields.
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            name: "aws".to_string(),
            region: region.into(),
            zone: zone.into(),
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    /// Set the AMI id.
    #[must_use]
    pub fn with_ami_id(mut self, ami_id: impl Into<String>) -> Self {
        self.ami_id = Some(ami_id.into());
        self
    }

    /// Set the instance type.
    #[must_use]
    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    /// Set the public IP and host name.
    #[must_use]
    pub fn with_public(mut self, ip: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self.public_hostname = Some(hostname.into());
        self
    }

    /// Set the private IP and host name.
    #[must_use]
    pub fn with_private(mut self, ip: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.private_ip = Some(ip.into());
        self.private_hostname = Some(hostname.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_carry_explicit_discriminator() {
        let basic: DataCenterInfo = BasicDataCenterInfo::new("dc1", "host-1").into();
        let aws: DataCenterInfo = AwsDataCenterInfo::new("us-east-1", "us-east-1a", "i-123").into();

        let basic_json = serde_json::to_value(&basic).unwrap();
        let aws_json = serde_json::to_value(&aws).unwrap();

        assert!(basic_json.get("Basic").is_some());
        assert!(aws_json.get("Aws").is_some());
    }

    #[test]
    fn default_address_prefers_public() {
        let info: DataCenterInfo = AwsDataCenterInfo::new("us-east-1", "us-east-1c", "i-9")
            .with_private("10.0.0.1", "ip-10-0-0-1")
            .with_public("54.1.2.3", "ec2-54-1-2-3")
            .into();
        assert_eq!(info.default_address(), Some("54.1.2.3"));

        let private_only: DataCenterInfo = BasicDataCenterInfo::new("dc1", "h")
            .with_private_address("192.168.1.5")
            .into();
        assert_eq!(private_only.default_address(), Some("192.168.1.5"));
    }
}
