//! Subscription filters over the registry.
//!
//! Interests compose by union. Unions are kept in a canonical form so that
//! structural equality coincides with set semantics:
//!
//! - `None` is dropped, `FullRegistry` absorbs everything else;
//! - nested composites are flattened;
//! - once a `MultipleApps` takes part, every `Application` and
//!   `MultipleApps` operand is folded into a single `MultipleApps`;
//! - a single remaining operand is returned as is, zero operands is `None`.
//!
//! This makes `union` commutative and associative with `None` as identity.

use crate::instance::InstanceInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A filter selecting a subset of registry instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interest {
    /// Matches nothing
    None,
    /// Matches every instance
    FullRegistry,
    /// Matches one instance by id
    Instance(String),
    /// Matches instances of one application
    Application(String),
    /// Matches instances behind a virtual IP address
    Vip(String),
    /// Matches instances behind a secure virtual IP address
    SecureVip(String),
    /// Matches instances of any of the named applications
    MultipleApps(BTreeSet<String>),
    /// Matches instances matched by any member
    Composite(BTreeSet<Interest>),
}

impl Interest {
    /// Interest in a single instance.
    #[must_use]
    pub fn for_instance(id: impl Into<String>) -> Self {
        Interest::Instance(id.into())
    }

    /// Interest in one application.
    #[must_use]
    pub fn for_application(name: impl Into<String>) -> Self {
        Interest::Application(name.into())
    }

    /// Interest in several applications.
    #[must_use]
    pub fn for_applications<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Interest::MultipleApps(names.into_iter().map(Into::into).collect())
    }

    /// Interest in a virtual IP address.
    #[must_use]
    pub fn for_vip(address: impl Into<String>) -> Self {
        Interest::Vip(address.into())
    }

    /// Interest in a secure virtual IP address.
    #[must_use]
    pub fn for_secure_vip(address: impl Into<String>) -> Self {
        Interest::SecureVip(address.into())
    }

    /// Union of two interests.
    #[must_use]
    pub fn union(&self, other: &Interest) -> Interest {
        Self::from_operands([self.clone(), other.clone()])
    }

    /// Canonical union of any number of interests.
    #[must_use]
    pub fn from_operands<I>(operands: I) -> Interest
    where
        I: IntoIterator<Item = Interest>,
    {
        let mut atoms = BTreeSet::new();
        for operand in operands {
            if operand.collect_atoms(&mut atoms) {
                return Interest::FullRegistry;
            }
        }

        if atoms
            .iter()
            .any(|atom| matches!(atom, Interest::MultipleApps(_)))
        {
            let mut apps = BTreeSet::new();
            atoms.retain(|atom| match atom {
                Interest::Application(name) => {
                    apps.insert(name.clone());
                    false
                }
                Interest::MultipleApps(names) => {
                    apps.extend(names.iter().cloned());
                    false
                }
                _ => true,
            });
            atoms.insert(Interest::MultipleApps(apps));
        }

        if atoms.len() > 1 {
            return Interest::Composite(atoms);
        }
        atoms.pop_first().unwrap_or(Interest::None)
    }

    /// Flatten into `atoms`, returning `true` if `FullRegistry` was seen.
    fn collect_atoms(self, atoms: &mut BTreeSet<Interest>) -> bool {
        match self {
            Interest::None => false,
            Interest::FullRegistry => true,
            Interest::Composite(members) => members
                .into_iter()
                .fold(false, |full, member| member.collect_atoms(atoms) || full),
            atom => {
                atoms.insert(atom);
                false
            }
        }
    }

    /// The canonical form of this interest.
    #[must_use]
    pub fn normalize(self) -> Interest {
        Self::from_operands([self])
    }

    /// Check that this interest is in canonical form.
    ///
    /// Interests built through [`Interest::union`] always are; a value that
    /// is not (e.g. a hand-built or decoded `Composite` holding `None`) is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInterestError`] if the interest is not canonical.
    pub fn validate(&self) -> Result<(), MalformedInterestError> {
        if self.clone().normalize() == *self {
            Ok(())
        } else {
            Err(MalformedInterestError {
                interest: self.clone(),
            })
        }
    }

    /// Whether `instance` is selected by this interest.
    #[must_use]
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Interest::None => false,
            Interest::FullRegistry => true,
            Interest::Instance(id) => instance.id() == id,
            Interest::Application(name) => instance.app() == Some(name.as_str()),
            Interest::Vip(address) => instance.vip_address() == Some(address.as_str()),
            Interest::SecureVip(address) => instance.secure_vip_address() == Some(address.as_str()),
            Interest::MultipleApps(names) => instance.app().is_some_and(|app| names.contains(app)),
            Interest::Composite(members) => members.iter().any(|member| member.matches(instance)),
        }
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest::from_operands([self, rhs])
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interest::None => write!(f, "none"),
            Interest::FullRegistry => write!(f, "full-registry"),
            Interest::Instance(id) => write!(f, "instance:{id}"),
            Interest::Application(name) => write!(f, "app:{name}"),
            Interest::Vip(address) => write!(f, "vip:{address}"),
            Interest::SecureVip(address) => write!(f, "secure-vip:{address}"),
            Interest::MultipleApps(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "apps:[{}]", names.join(","))
            }
            Interest::Composite(members) => {
                let members: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "({})", members.join(" | "))
            }
        }
    }
}

/// Union of two interests; see [`Interest::union`].
#[must_use]
pub fn union(a: &Interest, b: &Interest) -> Interest {
    a.union(b)
}

/// Whether `interest` selects `instance`; see [`Interest::matches`].
#[must_use]
pub fn matches(interest: &Interest, instance: &InstanceInfo) -> bool {
    interest.matches(instance)
}

/// An interest outside the canonical closed form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed interest: {interest:?}")]
pub struct MalformedInterestError {
    /// The offending interest
    pub interest: Interest,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Interest> {
        vec![
            Interest::None,
            Interest::FullRegistry,
            Interest::for_instance("id1"),
            Interest::for_application("discovery"),
            Interest::for_application("zuul"),
            Interest::for_vip("discovery:7001"),
            Interest::for_secure_vip("discovery:7002"),
            Interest::for_applications(["discovery", "search"]),
            Interest::for_applications(["api"]),
            Interest::for_vip("a") | Interest::for_instance("x"),
        ]
    }

    fn instance(app: &str) -> InstanceInfo {
        InstanceInfo::builder()
            .with_id(format!("{app}-1"))
            .with_app(app)
            .with_vip_address(format!("{app}:7001"))
            .build()
            .unwrap()
    }

    #[test]
    fn none_is_identity() {
        for a in samples() {
            assert_eq!(a.union(&Interest::None), a, "{a}");
            assert_eq!(Interest::None.union(&a), a, "{a}");
        }
    }

    #[test]
    fn full_registry_absorbs() {
        for a in samples() {
            assert_eq!(a.union(&Interest::FullRegistry), Interest::FullRegistry);
        }
    }

    #[test]
    fn union_is_commutative() {
        let all = samples();
        for a in &all {
            for b in &all {
                assert_eq!(a.union(b), b.union(a), "{a} / {b}");
            }
        }
    }

    #[test]
    fn union_is_associative() {
        let all = samples();
        for a in &all {
            for b in &all {
                for c in &all {
                    assert_eq!(
                        a.union(b).union(c),
                        a.union(&b.union(c)),
                        "{a} / {b} / {c}"
                    );
                }
            }
        }
    }

    #[test]
    fn multiple_apps_absorbs_application() {
        let merged =
            Interest::for_applications(["discovery"]).union(&Interest::for_application("zuul"));
        assert_eq!(merged, Interest::for_applications(["discovery", "zuul"]));
    }

    #[test]
    fn composite_matches_either_side() {
        let interest = Interest::for_application("discovery").union(&Interest::for_vip("zuul:7001"));
        assert!(matches!(interest, Interest::Composite(_)));

        assert!(interest.matches(&instance("discovery")));
        assert!(interest.matches(&instance("zuul")));
        assert!(!interest.matches(&instance("api")));
    }

    #[test]
    fn free_functions_follow_the_methods() {
        let all = samples();
        let discovery = instance("discovery");
        for a in &all {
            assert_eq!(matches(a, &discovery), a.matches(&discovery), "{a}");
            for b in &all {
                assert_eq!(union(a, b), a.union(b), "{a} / {b}");
            }
        }

        let widened = union(
            &Interest::for_vip("zuul:7001"),
            &Interest::for_application("discovery"),
        );
        assert!(matches(&widened, &discovery));
        assert!(!matches(&widened, &instance("api")));
    }

    #[test]
    fn atomic_matching() {
        let discovery = instance("discovery");

        assert!(!Interest::None.matches(&discovery));
        assert!(Interest::FullRegistry.matches(&discovery));
        assert!(Interest::for_instance("discovery-1").matches(&discovery));
        assert!(Interest::for_vip("discovery:7001").matches(&discovery));
        assert!(!Interest::for_secure_vip("discovery:7001").matches(&discovery));
        assert!(Interest::for_applications(["api", "discovery"]).matches(&discovery));
    }

    #[test]
    fn non_canonical_interest_is_malformed() {
        for interest in samples() {
            assert!(interest.validate().is_ok(), "{interest}");
        }

        let nested = Interest::Composite(
            [Interest::None, Interest::for_vip("a")].into_iter().collect(),
        );
        assert_eq!(
            nested.validate(),
            Err(MalformedInterestError {
                interest: nested.clone()
            })
        );
        assert_eq!(nested.normalize(), Interest::for_vip("a"));
    }
}
