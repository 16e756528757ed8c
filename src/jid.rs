//! Federation addressing.

use std::fmt;
use std::str::FromStr;

#[derive(Debug)]
pub enum JidError {
    InvalidFormat(String),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JidError::InvalidFormat(s) => write!(f, "Invalid JID format: {s}"),
        }
    }
}

impl std::error::Error for JidError {}

/// A federation address: `user@domain/resource` with user and resource
/// optional. Empty strings stand for absent parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub user: String,
    pub domain: String,
    pub resource: String,
}

impl Jid {
    pub fn new(user: &str, domain: &str) -> Self {
        Self {
            user: user.to_string(),
            domain: domain.to_string(),
            resource: String::new(),
        }
    }

    pub fn with_resource(user: &str, domain: &str, resource: &str) -> Self {
        Self {
            user: user.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
        }
    }

    /// The address without its resource part.
    pub fn bare(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            domain: self.domain.clone(),
            resource: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_empty()
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }
        let (rest, resource) = match s.split_once('/') {
            Some((rest, resource)) => (rest, resource),
            None => (s, ""),
        };
        let (user, domain) = match rest.split_once('@') {
            Some((user, domain)) => (user, domain),
            None => ("", rest),
        };
        if domain.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }
        Ok(Jid {
            user: user.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
        write!(f, "{}", self.domain)?;
        if !self.resource.is_empty() {
            write!(f, "/{}", self.resource)?;
        }
        Ok(())
    }
}
