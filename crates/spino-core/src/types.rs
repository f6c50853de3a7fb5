//! Value types shared by the routing layer and its collaborators.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AddressError, SpinoError, SpinoResult};

/// Identity of a cluster member. Opaque, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A validated network endpoint: `scheme://host[:port][/path]`.
///
/// Scheme and host are lowercased. The port is always resolved, either
/// explicitly or from the scheme default, so `http://h1` and `http://h1:80`
/// are the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl Address {
    /// Parse an endpoint string, rejecting anything the routing table
    /// should never see.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(raw.to_string()))?;
        if !valid_scheme(scheme) {
            return Err(AddressError::UnsupportedScheme(raw.to_string()));
        }
        let scheme = scheme.to_ascii_lowercase();

        if rest.contains(['?', '#']) {
            return Err(AddressError::UnsupportedComponent(raw.to_string()));
        }
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if authority.contains('@') {
            return Err(AddressError::UnsupportedComponent(raw.to_string()));
        }

        let (host, port) = split_authority(authority, raw)?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(raw.to_string()));
        }

        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(AddressError::InvalidPort(raw.to_string())),
                Ok(p) => p,
            },
            None => default_port(&scheme)
                .ok_or_else(|| AddressError::MissingPort(raw.to_string()))?,
        };

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: path.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Splits `host[:port]` or `[v6]:port`. The port is returned unparsed.
/// IPv6 literals must be bracketed.
fn split_authority<'a>(
    authority: &'a str,
    raw: &str,
) -> Result<(&'a str, Option<&'a str>), AddressError> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| AddressError::MissingHost(raw.to_string()))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(AddressError::InvalidHost(raw.to_string()));
        }
        return match after {
            "" => Ok((host, None)),
            _ => after
                .strip_prefix(':')
                .map(|port| (host, Some(port)))
                .ok_or_else(|| AddressError::InvalidPort(raw.to_string())),
        };
    }

    if authority.matches(':').count() > 1 {
        return Err(AddressError::InvalidHost(raw.to_string()));
    }
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if !host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')) {
        return Err(AddressError::InvalidHost(raw.to_string()));
    }
    Ok((host, port))
}

fn valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority(), self.path)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// An immutable (service, address, owner) triple: "member `owner` says
/// `service` can be reached at `address`".
///
/// Equality and hashing cover all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationFact {
    service: String,
    address: Address,
    owner: MemberId,
}

impl LocationFact {
    pub fn new(service: impl Into<String>, address: Address, owner: MemberId) -> SpinoResult<Self> {
        let service = service.into();
        if service.is_empty() {
            return Err(SpinoError::EmptyService);
        }
        Ok(Self {
            service,
            address,
            owner,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn owner(&self) -> &MemberId {
        &self.owner
    }
}

impl fmt::Display for LocationFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} @ {}", self.service, self.address, self.owner)
    }
}
