//! Delegation record sets and the differences between them.

use std::{
    collections::BTreeSet,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use domain::base::Name;
use serde::Serialize;

//----------- DelegationRecordSet ----------------------------------------------

/// The delegation of a zone as seen from one side.
///
/// This holds the NS names of the delegation and the glue addresses for those
/// of them that lie inside the zone.  Names compare case-insensitively and
/// are stored in lower case; duplicates collapse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegationRecordSet {
    /// The delegated zone.
    zone: Option<Name<Vec<u8>>>,

    /// The name servers of the zone.
    ns: BTreeSet<Name<Vec<u8>>>,

    /// IPv4 glue.
    a: BTreeSet<(Name<Vec<u8>>, Ipv4Addr)>,

    /// IPv6 glue.
    aaaa: BTreeSet<(Name<Vec<u8>>, Ipv6Addr)>,
}

impl DelegationRecordSet {
    /// Create an empty record set for the given zone.
    pub fn new(zone: Name<Vec<u8>>) -> Self {
        Self {
            zone: Some(normalize(&zone)),
            ..Default::default()
        }
    }

    /// Add a name server.
    pub fn add_ns(&mut self, name: &Name<Vec<u8>>) {
        self.ns.insert(normalize(name));
    }

    /// Add a glue address for a name server.
    pub fn add_glue(&mut self, name: &Name<Vec<u8>>, addr: IpAddr) {
        let name = normalize(name);
        match addr {
            IpAddr::V4(addr) => {
                self.a.insert((name, addr));
            }
            IpAddr::V6(addr) => {
                self.aaaa.insert((name, addr));
            }
        }
    }

    /// Whether a name server needs glue in this delegation.
    pub fn needs_glue(&self, name: &Name<Vec<u8>>) -> bool {
        self.zone.as_ref().is_some_and(|zone| name.ends_with(zone))
    }

    /// The name servers, in canonical order.
    pub fn ns(&self) -> impl Iterator<Item = &Name<Vec<u8>>> + '_ {
        self.ns.iter()
    }

    /// The IPv4 glue, in canonical order.
    pub fn a(&self) -> impl Iterator<Item = &(Name<Vec<u8>>, Ipv4Addr)> + '_ {
        self.a.iter()
    }

    /// The IPv6 glue, in canonical order.
    pub fn aaaa(&self) -> impl Iterator<Item = &(Name<Vec<u8>>, Ipv6Addr)> + '_ {
        self.aaaa.iter()
    }

    /// Whether the set has no records at all.
    pub fn is_empty(&self) -> bool {
        self.ns.is_empty() && self.a.is_empty() && self.aaaa.is_empty()
    }
}

impl fmt::Display for DelegationRecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let zone = self
            .zone
            .as_ref()
            .map(|zone| zone.to_string())
            .unwrap_or_default();
        for ns in &self.ns {
            writeln!(f, "{zone}. NS {ns}.")?;
        }
        for (name, addr) in &self.a {
            writeln!(f, "{name}. A {addr}")?;
        }
        for (name, addr) in &self.aaaa {
            writeln!(f, "{name}. AAAA {addr}")?;
        }
        Ok(())
    }
}

/// Bring a name into its canonical, lower case form.
pub fn normalize(name: &Name<Vec<u8>>) -> Name<Vec<u8>> {
    let mut name = name.clone();
    name.make_canonical();
    name
}

//----------- DelegationDiff ---------------------------------------------------

/// The changes that turn the parent's view of a delegation into the child's.
///
/// Every list is sorted by owner name in canonical DNS order and then by
/// address, so equal inputs always produce identical diffs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DelegationDiff {
    /// Name servers present in the child but not the parent.
    #[serde(serialize_with = "ser_names")]
    pub ns_add: Vec<Name<Vec<u8>>>,

    /// Name servers present in the parent but not the child.
    #[serde(serialize_with = "ser_names")]
    pub ns_remove: Vec<Name<Vec<u8>>>,

    /// IPv4 glue present in the child but not the parent.
    #[serde(serialize_with = "ser_glue")]
    pub a_add: Vec<(Name<Vec<u8>>, Ipv4Addr)>,

    /// IPv4 glue present in the parent but not the child.
    #[serde(serialize_with = "ser_glue")]
    pub a_remove: Vec<(Name<Vec<u8>>, Ipv4Addr)>,

    /// IPv6 glue present in the child but not the parent.
    #[serde(serialize_with = "ser_glue")]
    pub aaaa_add: Vec<(Name<Vec<u8>>, Ipv6Addr)>,

    /// IPv6 glue present in the parent but not the child.
    #[serde(serialize_with = "ser_glue")]
    pub aaaa_remove: Vec<(Name<Vec<u8>>, Ipv6Addr)>,
}

impl DelegationDiff {
    /// Compute the diff between the child's and the parent's delegation.
    ///
    /// Records only the child has are to be added; records only the parent
    /// has are to be removed.  Records both have appear in neither list.
    pub fn compute(child: &DelegationRecordSet, parent: &DelegationRecordSet) -> Self {
        fn minus<T: Ord + Clone>(left: &BTreeSet<T>, right: &BTreeSet<T>) -> Vec<T> {
            left.difference(right).cloned().collect()
        }

        Self {
            ns_add: minus(&child.ns, &parent.ns),
            ns_remove: minus(&parent.ns, &child.ns),
            a_add: minus(&child.a, &parent.a),
            a_remove: minus(&parent.a, &child.a),
            aaaa_add: minus(&child.aaaa, &parent.aaaa),
            aaaa_remove: minus(&parent.aaaa, &child.aaaa),
        }
    }

    /// Whether applying the diff would change anything.
    pub fn changed(&self) -> bool {
        !(self.ns_add.is_empty()
            && self.ns_remove.is_empty()
            && self.a_add.is_empty()
            && self.a_remove.is_empty()
            && self.aaaa_add.is_empty()
            && self.aaaa_remove.is_empty())
    }

    /// The number of individual record changes.
    pub fn len(&self) -> usize {
        self.ns_add.len()
            + self.ns_remove.len()
            + self.a_add.len()
            + self.a_remove.len()
            + self.aaaa_add.len()
            + self.aaaa_remove.len()
    }

    /// Whether the diff is empty.
    pub fn is_empty(&self) -> bool {
        !self.changed()
    }
}

/// Compute the diff between the child's and the parent's delegation.
///
/// Returns whether anything changed together with the diff itself.
pub fn diff(
    child: &DelegationRecordSet,
    parent: &DelegationRecordSet,
) -> (bool, DelegationDiff) {
    let diff = DelegationDiff::compute(child, parent);
    (diff.changed(), diff)
}

impl fmt::Display for DelegationDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ns in &self.ns_remove {
            writeln!(f, "- NS {ns}.")?;
        }
        for ns in &self.ns_add {
            writeln!(f, "+ NS {ns}.")?;
        }
        for (name, addr) in &self.a_remove {
            writeln!(f, "- {name}. A {addr}")?;
        }
        for (name, addr) in &self.a_add {
            writeln!(f, "+ {name}. A {addr}")?;
        }
        for (name, addr) in &self.aaaa_remove {
            writeln!(f, "- {name}. AAAA {addr}")?;
        }
        for (name, addr) in &self.aaaa_add {
            writeln!(f, "+ {name}. AAAA {addr}")?;
        }
        Ok(())
    }
}

//--- Serialization

fn ser_names<S: serde::Serializer>(names: &[Name<Vec<u8>>], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(names.iter().map(|name| name.fmt_with_dot().to_string()))
}

fn ser_glue<S, A>(glue: &[(Name<Vec<u8>>, A)], s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
    A: fmt::Display,
{
    s.collect_seq(
        glue.iter()
            .map(|(name, addr)| format!("{} {addr}", name.fmt_with_dot())),
    )
}

//============ Tests ===========================================================
