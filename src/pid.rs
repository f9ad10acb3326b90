//! Persistent identifiers of datacubes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// PID parse error
#[derive(Debug, Error, PartialEq)]
pub enum PidError {
    #[error("PID {0:?} is not of the form <server>/<container>/<datacube>")]
    Format(String),

    #[error("PID server is not a valid URL")]
    Server(#[from] url::ParseError),

    #[error("PID refers to server {found}, expected {expected}")]
    ForeignServer { expected: String, found: String },
}

/// Identifier of a datacube: `<server_uri>/<container_id>/<datacube_id>`.
#[derive(Clone, Debug, PartialEq)]
pub struct Pid {
    pub server: Url,
    pub container: i64,
    pub datacube: i64,
}

impl Pid {
    pub fn new(server: Url, container: i64, datacube: i64) -> Self {
        Self {
            server,
            container,
            datacube,
        }
    }

    /// Check that the PID belongs to `server`.
    pub fn check_server(&self, server: &Url) -> Result<(), PidError> {
        let expected = server.as_str().trim_end_matches('/');
        let found = self.server.as_str().trim_end_matches('/');
        if expected != found {
            return Err(PidError::ForeignServer {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }
}

impl FromStr for Pid {
    type Err = PidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_error = || PidError::Format(s.to_string());
        let mut parts = s.trim().rsplitn(3, '/');
        let datacube = parts.next().and_then(|id| id.parse().ok());
        let container = parts.next().and_then(|id| id.parse().ok());
        match (datacube, container, parts.next()) {
            (Some(datacube), Some(container), Some(server)) if !server.is_empty() => {
                Ok(Self::new(Url::parse(server)?, container, datacube))
            }
            _ => Err(format_error()),
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.server.as_str().trim_end_matches('/'),
            self.container,
            self.datacube
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let pid: Pid = "http://127.0.0.1/ophidia/3/17".parse().unwrap();
        assert_eq!("http://127.0.0.1/ophidia", pid.server.as_str());
        assert_eq!(3, pid.container);
        assert_eq!(17, pid.datacube);
        assert_eq!("http://127.0.0.1/ophidia/3/17", pid.to_string());
    }

    #[test]
    fn test_display_bare_host() {
        let pid = Pid::new(Url::parse("http://example.com").unwrap(), 1, 2);
        assert_eq!("http://example.com/1/2", pid.to_string());
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            Err(PidError::Format("http://host/ophidia/x/1".into())),
            "http://host/ophidia/x/1".parse::<Pid>()
        );
        assert!(matches!("1/2".parse::<Pid>(), Err(PidError::Format(_))));
        assert!(matches!(
            "nothing/1/2".parse::<Pid>(),
            Err(PidError::Server(_))
        ));
    }

    #[test]
    fn test_check_server() {
        let pid: Pid = "http://127.0.0.1/ophidia/3/17".parse().unwrap();
        let server = Url::parse("http://127.0.0.1/ophidia/").unwrap();
        pid.check_server(&server).unwrap();
        let other = Url::parse("http://example.com/ophidia").unwrap();
        assert!(matches!(
            pid.check_server(&other),
            Err(PidError::ForeignServer { .. })
        ));
    }
}
