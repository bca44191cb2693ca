//! Agent address parsing and canonicalization.
//!
//! Addresses take one of two forms:
//!
//! ```text
//! scheme://organization          organization address
//! scheme://organization/agent    agent address
//! ```
//!
//! Raw input is percent-decoded (UTF-8) before it is split, so
//! `agentdns://testorg/%E5%9B%BE%E5%83%8F` and `agentdns://testorg/图像`
//! parse to the same address. Only the scheme token is case-folded;
//! segments are kept verbatim.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scheme used when none is configured.
pub const DEFAULT_SCHEME: &str = "agentdns";

const SCHEME_DELIMITER: &str = "://";
const PATH_SEPARATOR: char = '/';

/// Which entity an address names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Organization,
    Agent,
}

/// A parsed, canonical address.
///
/// Equality, hashing and ordering all use the rendered canonical string,
/// so sorting addresses matches sorting their byte representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    canonical: String,
    scheme: String,
    organization: String,
    agent: Option<String>,
}

impl Address {
    /// Parse with the default scheme.
    pub fn parse(raw: &str) -> Result<Self> {
        AddressParser::default().parse(raw)
    }

    fn from_parts(scheme: String, organization: String, agent: Option<String>) -> Self {
        let mut canonical = format!("{}{}{}", scheme, SCHEME_DELIMITER, organization);
        if let Some(agent) = &agent {
            canonical.push(PATH_SEPARATOR);
            canonical.push_str(agent);
        }
        Self {
            canonical,
            scheme,
            organization,
            agent,
        }
    }

    /// The lower-cased scheme token.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The organization segment.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// The agent segment, if this is an agent address.
    pub fn agent_name(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    pub fn kind(&self) -> AddressKind {
        if self.agent.is_some() {
            AddressKind::Agent
        } else {
            AddressKind::Organization
        }
    }

    pub fn is_agent(&self) -> bool {
        self.agent.is_some()
    }

    pub fn is_organization(&self) -> bool {
        self.agent.is_none()
    }

    /// The `scheme://organization` prefix of this address.
    pub fn organization_address(&self) -> Address {
        Address::from_parts(self.scheme.clone(), self.organization.clone(), None)
    }

    /// Build the address of an agent under this organization.
    pub fn child(&self, agent: &str) -> Result<Address> {
        if self.is_agent() {
            return Err(Error::malformed(
                &self.canonical,
                "agent addresses cannot have children",
            ));
        }
        validate_segment(&self.canonical, agent)?;
        Ok(Address::from_parts(
            self.scheme.clone(),
            self.organization.clone(),
            Some(agent.to_string()),
        ))
    }

    /// The canonical rendering.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Render to the canonical form.
    pub fn render(&self) -> String {
        self.canonical.clone()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        AddressParser::any().parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.canonical
    }
}

/// Parser bound to one expected scheme, or to any scheme.
#[derive(Debug, Clone)]
pub struct AddressParser {
    scheme: Option<String>,
}

impl Default for AddressParser {
    fn default() -> Self {
        Self {
            scheme: Some(DEFAULT_SCHEME.to_string()),
        }
    }
}

impl AddressParser {
    /// Create a parser for `scheme`. The scheme is case-folded.
    pub fn new(scheme: &str) -> Result<Self> {
        if !is_valid_scheme(scheme) {
            return Err(Error::Config(format!("invalid address scheme '{}'", scheme)));
        }
        Ok(Self {
            scheme: Some(scheme.to_ascii_lowercase()),
        })
    }

    /// A parser that accepts any well-formed scheme. Used when reading
    /// back stored records.
    pub fn any() -> Self {
        Self { scheme: None }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Parse either address form.
    pub fn parse(&self, raw: &str) -> Result<Address> {
        let decoded = urlencoding::decode(raw)
            .map_err(|_| Error::malformed(raw, "percent-encoding is not valid UTF-8"))?;

        let (scheme, rest) = decoded
            .split_once(SCHEME_DELIMITER)
            .ok_or_else(|| Error::malformed(raw, "missing scheme delimiter '://'"))?;

        if !is_valid_scheme(scheme) {
            return Err(Error::malformed(raw, format!("invalid scheme '{}'", scheme)));
        }
        let scheme = scheme.to_ascii_lowercase();
        if let Some(expected) = &self.scheme {
            if &scheme != expected {
                return Err(Error::malformed(
                    raw,
                    format!("expected scheme '{}', got '{}'", expected, scheme),
                ));
            }
        }

        let segments: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
        for segment in &segments {
            validate_segment(raw, segment)?;
        }

        match segments.as_slice() {
            [organization] => Ok(Address::from_parts(
                scheme,
                organization.to_string(),
                None,
            )),
            [organization, agent] => Ok(Address::from_parts(
                scheme,
                organization.to_string(),
                Some(agent.to_string()),
            )),
            _ => Err(Error::malformed(
                raw,
                format!("expected 1 or 2 path segments, found {}", segments.len()),
            )),
        }
    }

    /// Parse and require an organization address.
    pub fn parse_organization(&self, raw: &str) -> Result<Address> {
        let address = self.parse(raw)?;
        if address.is_agent() {
            return Err(Error::malformed(raw, "expected an organization address"));
        }
        Ok(address)
    }

    /// Parse and require an agent address.
    pub fn parse_agent(&self, raw: &str) -> Result<Address> {
        let address = self.parse(raw)?;
        if address.is_organization() {
            return Err(Error::malformed(raw, "expected an agent address"));
        }
        Ok(address)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

// A literal '%' after decoding would decode again on re-parse, so it is
// rejected to keep parse(render(parse(x))) == parse(x).
fn validate_segment(raw: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::malformed(raw, "empty path segment"));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| *c == PATH_SEPARATOR || *c == '%' || c.is_control())
    {
        return Err(Error::malformed(
            raw,
            format!("segment '{}' contains forbidden character {:?}", segment, c),
        ));
    }
    Ok(())
}
