use std::fmt;
use std::str::FromStr;

use crate::protocol::error::MajordomoError;

/// A `tcp://host:port` endpoint.
///
/// `*` as host means all interfaces when binding. The `tcp://` scheme may
/// be omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        socket_addr(if self.host == "*" { "0.0.0.0" } else { &self.host }, self.port)
    }

    /// Address suitable for `TcpStream::connect`.
    pub fn connect_addr(&self) -> String {
        socket_addr(if self.host == "*" { "127.0.0.1" } else { &self.host }, self.port)
    }
}

fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl FromStr for Endpoint {
    type Err = MajordomoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(MajordomoError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in '{}'",
                    scheme, s
                )))
            }
            None => s,
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| MajordomoError::InvalidEndpoint(format!("missing port in '{}'", s)))?;
        if host.is_empty() {
            return Err(MajordomoError::InvalidEndpoint(format!("missing host in '{}'", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| MajordomoError::InvalidEndpoint(format!("invalid port in '{}'", s)))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", socket_addr(&self.host, self.port))
    }
}
