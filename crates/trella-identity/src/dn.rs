//! Distinguished-name attribute access.
//!
//! Certificates carry subject and issuer names as RDN sequences.
//! These helpers read and write individual attributes by OID without
//! disturbing the rest of the name.

use der::asn1::{ObjectIdentifier, SetOfVec};
use der::{Any, Tag};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use crate::Result;

/// Distinguished-name attributes the toolkit exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnAttr {
    CommonName,
    CountryName,
    LocalityName,
    StateOrProvinceName,
    OrganizationName,
    OrganizationalUnit,
    EmailAddress,
}

impl DnAttr {
    /// The X.500 / PKCS#9 OID for this attribute.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            DnAttr::CommonName => ObjectIdentifier::new_unwrap("2.5.4.3"),
            DnAttr::CountryName => ObjectIdentifier::new_unwrap("2.5.4.6"),
            DnAttr::LocalityName => ObjectIdentifier::new_unwrap("2.5.4.7"),
            DnAttr::StateOrProvinceName => ObjectIdentifier::new_unwrap("2.5.4.8"),
            DnAttr::OrganizationName => ObjectIdentifier::new_unwrap("2.5.4.10"),
            DnAttr::OrganizationalUnit => ObjectIdentifier::new_unwrap("2.5.4.11"),
            DnAttr::EmailAddress => ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1"),
        }
    }
}

/// Build a single-attribute name (`CN=<value>` and friends).
pub(crate) fn single_attr_name(attr: DnAttr, value: &str) -> Result<Name> {
    Ok(RdnSequence(vec![rdn(attr.oid(), value)?]))
}

/// Read an attribute's value from a name.
pub(crate) fn get_attr(name: &Name, attr: DnAttr) -> Option<String> {
    let oid = attr.oid();
    name.0.iter().flat_map(|rdn| rdn.0.iter()).find_map(|atv| {
        if atv.oid == oid {
            std::str::from_utf8(atv.value.value())
                .ok()
                .map(str::to_owned)
        } else {
            None
        }
    })
}

/// Add an attribute to a name, overwriting an existing value for the
/// same OID.
pub(crate) fn set_attr(name: &mut Name, attr: DnAttr, value: &str) -> Result<()> {
    let oid = attr.oid();
    let fresh = attr_value(oid, value)?;

    for entry in name.0.iter_mut() {
        if entry.0.iter().any(|atv| atv.oid == oid) {
            let mut kept: Vec<AttributeTypeAndValue> = entry
                .0
                .iter()
                .filter(|atv| atv.oid != oid)
                .cloned()
                .collect();
            kept.push(fresh);
            *entry = RelativeDistinguishedName(SetOfVec::try_from(kept)?);
            return Ok(());
        }
    }

    name.0
        .push(RelativeDistinguishedName(SetOfVec::try_from(vec![fresh])?));
    Ok(())
}

fn rdn(oid: ObjectIdentifier, value: &str) -> Result<RelativeDistinguishedName> {
    Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![
        attr_value(oid, value)?,
    ])?))
}

fn attr_value(oid: ObjectIdentifier, value: &str) -> Result<AttributeTypeAndValue> {
    Ok(AttributeTypeAndValue {
        oid,
        value: Any::new(Tag::Utf8String, value.as_bytes())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_attr_roundtrip() {
        let name = single_attr_name(DnAttr::CommonName, "John Doe").expect("name");
        assert_eq!(get_attr(&name, DnAttr::CommonName).as_deref(), Some("John Doe"));
        assert_eq!(get_attr(&name, DnAttr::EmailAddress), None);
    }

    #[test]
    fn test_set_appends_new_attribute() {
        let mut name = single_attr_name(DnAttr::CommonName, "John Doe").expect("name");
        set_attr(&mut name, DnAttr::EmailAddress, "john@doe.org").expect("set");
        assert_eq!(
            get_attr(&name, DnAttr::EmailAddress).as_deref(),
            Some("john@doe.org")
        );
        assert_eq!(get_attr(&name, DnAttr::CommonName).as_deref(), Some("John Doe"));
    }

    #[test]
    fn test_set_overwrites_existing_attribute() {
        let mut name = single_attr_name(DnAttr::CommonName, "John Doe").expect("name");
        set_attr(&mut name, DnAttr::EmailAddress, "john@doe.org").expect("set");
        set_attr(&mut name, DnAttr::EmailAddress, "jane@doe.org").expect("overwrite");
        assert_eq!(
            get_attr(&name, DnAttr::EmailAddress).as_deref(),
            Some("jane@doe.org")
        );
    }
}
