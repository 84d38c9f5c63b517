//! Connectivity oracle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Current network state as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Offline,
    /// Cellular or otherwise billed connection
    Metered,
    #[default]
    Unmetered,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        self != Connectivity::Offline
    }

    pub fn is_unmetered(self) -> bool {
        self == Connectivity::Unmetered
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Offline => write!(f, "offline"),
            Connectivity::Metered => write!(f, "metered"),
            Connectivity::Unmetered => write!(f, "unmetered"),
        }
    }
}

impl FromStr for Connectivity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "offline" | "none" => Ok(Connectivity::Offline),
            "metered" | "cellular" => Ok(Connectivity::Metered),
            "unmetered" | "wifi" => Ok(Connectivity::Unmetered),
            _ => Err(Error::Validation(format!("Unknown connectivity: {}", s))),
        }
    }
}

/// Source of connectivity state
pub trait ConnectivityOracle: Send + Sync {
    /// Current state
    fn current(&self) -> Connectivity;

    /// Subscribe to state changes
    fn subscribe(&self) -> watch::Receiver<Connectivity>;
}

/// Oracle whose state is set explicitly
///
/// The CLI uses it with the state from configuration; tests flip it to
/// exercise the download policy gate.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<Connectivity>,
}

impl ManualConnectivity {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Change the state and notify subscribers
    pub fn set(&self, state: Connectivity) {
        self.tx.send_replace(state);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(Connectivity::Unmetered)
    }
}

impl ConnectivityOracle for ManualConnectivity {
    fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("wifi".parse::<Connectivity>().unwrap(), Connectivity::Unmetered);
        assert_eq!("metered".parse::<Connectivity>().unwrap(), Connectivity::Metered);
        assert!("carrier-pigeon".parse::<Connectivity>().is_err());
    }

    #[tokio::test]
    async fn test_manual_notifies_subscribers() {
        let oracle = ManualConnectivity::new(Connectivity::Metered);
        let mut rx = oracle.subscribe();
        assert!(!oracle.current().is_unmetered());

        oracle.set(Connectivity::Unmetered);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connectivity::Unmetered);
        assert!(oracle.current().is_connected());
    }
}
