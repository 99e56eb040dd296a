use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::TroupeError;

const SCHEME_SEPARATOR: &str = "://";

/// An addressable resource reference: `scheme://resource`.
///
/// The scheme selects how the resource is reached (a transport, a queue
/// provider, a secret store), the resource locates it within that scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentifier {
    scheme: String,
    resource: String,
}

impl ResourceIdentifier {
    /// Build an identifier from its parts. Both must be non-empty.
    pub fn new(scheme: impl Into<String>, resource: impl Into<String>) -> Result<Self, TroupeError> {
        let scheme = scheme.into();
        let resource = resource.into();
        if scheme.is_empty() || resource.is_empty() {
            return Err(TroupeError::InvalidIdentifier(format!(
                "{}{}{}",
                scheme, SCHEME_SEPARATOR, resource
            )));
        }
        if scheme.contains(SCHEME_SEPARATOR) {
            return Err(TroupeError::InvalidIdentifier(scheme));
        }
        Ok(Self { scheme, resource })
    }

    /// Parse the textual `scheme://resource` form.
    pub fn parse(s: &str) -> Result<Self, TroupeError> {
        let (scheme, resource) = s
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| TroupeError::InvalidIdentifier(s.to_string()))?;
        Self::new(scheme, resource)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl FromStr for ResourceIdentifier {
    type Err = TroupeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceIdentifier {
    type Error = TroupeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceIdentifier> for String {
    fn from(id: ResourceIdentifier) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.resource)
    }
}

/// Identifier of one runtime process instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate a new random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
