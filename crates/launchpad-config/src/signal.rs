// SPDX-License-Identifier: MIT OR Apache-2.0
//! Termination signals accepted by `term_code`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// POSIX-style signal used to ask a supervised service to shut down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermSignal {
    /// `SIGINT`, the default.
    #[default]
    #[serde(rename = "SIGINT")]
    Interrupt,
    /// `SIGTERM`.
    #[serde(rename = "SIGTERM")]
    Terminate,
    /// `SIGQUIT`.
    #[serde(rename = "SIGQUIT")]
    Quit,
    /// `SIGKILL`. Cannot be trapped by the service.
    #[serde(rename = "SIGKILL")]
    Kill,
    /// `SIGHUP`.
    #[serde(rename = "SIGHUP")]
    Hangup,
}

impl TermSignal {
    /// Every accepted signal, in the order they are listed in usage text.
    pub const ALL: [TermSignal; 5] = [
        TermSignal::Terminate,
        TermSignal::Interrupt,
        TermSignal::Quit,
        TermSignal::Kill,
        TermSignal::Hangup,
    ];

    /// Conventional `SIG*` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit => "SIGQUIT",
            Self::Kill => "SIGKILL",
            Self::Hangup => "SIGHUP",
        }
    }
}

impl fmt::Display for TermSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the accepted signals.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown termination signal '{0}'")]
pub struct UnknownSignal(pub String);

impl FromStr for TermSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TermSignal::ALL
            .into_iter()
            .find(|sig| sig.as_str() == s)
            .ok_or_else(|| UnknownSignal(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_listed_name() {
        for sig in TermSignal::ALL {
            assert_eq!(sig.as_str().parse::<TermSignal>().unwrap(), sig);
        }
    }

    #[test]
    fn rejects_lowercase_and_bare_names() {
        assert!("sigint".parse::<TermSignal>().is_err());
        assert!("INT".parse::<TermSignal>().is_err());
        assert!("SIGUSR1".parse::<TermSignal>().is_err());
    }

    #[test]
    fn serde_uses_sig_names() {
        let json = serde_json::to_string(&TermSignal::Hangup).unwrap();
        assert_eq!(json, "\"SIGHUP\"");
        let back: TermSignal = serde_json::from_str("\"SIGQUIT\"").unwrap();
        assert_eq!(back, TermSignal::Quit);
    }

    #[test]
    fn default_is_interrupt() {
        assert_eq!(TermSignal::default(), TermSignal::Interrupt);
    }
}
