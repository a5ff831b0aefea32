//! Endpoint addresses of the form `scheme://location`.

use crate::error::{TandemError, TandemResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// `tcp://host:port`
    Tcp,
    /// `ipc://path` (Unix-domain socket).
    Ipc,
    /// `inproc://name` (same process only).
    Inproc,
}

impl Scheme {
    /// The scheme prefix as written in endpoint strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ipc => "ipc",
            Self::Inproc => "inproc",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "ipc" => Ok(Self::Ipc),
            "inproc" => Ok(Self::Inproc),
            other => Err(TandemError::InvalidEndpoint(format!(
                "unknown transport scheme '{other}'"
            ))),
        }
    }
}

/// A transport scheme plus a scheme-specific location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    scheme: Scheme,
    location: String,
}

impl Endpoint {
    /// Build an endpoint, validating the location for its scheme.
    pub fn new(scheme: Scheme, location: impl Into<String>) -> TandemResult<Self> {
        let location = location.into();
        if location.is_empty() {
            return Err(TandemError::InvalidEndpoint(format!(
                "empty location for {scheme} endpoint"
            )));
        }
        let endpoint = Self { scheme, location };
        if scheme == Scheme::Tcp {
            endpoint.host_port()?;
        }
        Ok(endpoint)
    }

    /// The transport scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The scheme-specific location (`host:port`, a path, or a name).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Split a TCP location into host and port.
    ///
    /// A `*` host means every interface and maps to `0.0.0.0`. IPv6 hosts may
    /// be bracketed (`[::1]:5555`).
    pub fn host_port(&self) -> TandemResult<(String, u16)> {
        let (host, port) = self.location.rsplit_once(':').ok_or_else(|| {
            TandemError::InvalidEndpoint(format!("missing port in '{}'", self.location))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            TandemError::InvalidEndpoint(format!("invalid port in '{}'", self.location))
        })?;
        let host = match host {
            "" => {
                return Err(TandemError::InvalidEndpoint(format!(
                    "missing host in '{}'",
                    self.location
                )))
            }
            "*" => "0.0.0.0",
            h => h.trim_start_matches('[').trim_end_matches(']'),
        };
        Ok((host.to_string(), port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.location)
    }
}

impl FromStr for Endpoint {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, location) = s
            .split_once("://")
            .ok_or_else(|| TandemError::InvalidEndpoint(format!("'{s}' lacks a scheme://")))?;
        Self::new(scheme.parse()?, location)
    }
}
