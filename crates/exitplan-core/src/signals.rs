//! Termination signals and waiting on them

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PlanError;

/// A process signal that can start the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
    User1,
    User2,
}

/// SIGINT, SIGTERM, SIGHUP
pub fn default_signals() -> Vec<Signal> {
    vec![Signal::Interrupt, Signal::Terminate, Signal::Hangup]
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::User1 => "SIGUSR1",
            Self::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::Hangup => SignalKind::hangup(),
            Self::Quit => SignalKind::quit(),
            Self::User1 => SignalKind::user_defined1(),
            Self::User2 => SignalKind::user_defined2(),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts `SIGTERM`, `TERM`, `sigterm`, `term`, ...
impl FromStr for Signal {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" => Ok(Self::Interrupt),
            "TERM" => Ok(Self::Terminate),
            "HUP" => Ok(Self::Hangup),
            "QUIT" => Ok(Self::Quit),
            "USR1" => Ok(Self::User1),
            "USR2" => Ok(Self::User2),
            _ => Err(PlanError::UnknownSignal(s.to_string())),
        }
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Signal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Wait until any of `signals` is delivered; returns which one.
///
/// Fails if a handler cannot be installed.
#[cfg(unix)]
pub async fn wait_for_any(signals: &[Signal]) -> std::io::Result<Signal> {
    use futures_util::future::select_all;
    use tokio::signal::unix::signal;

    let mut streams = Vec::with_capacity(signals.len());
    for &sig in signals {
        streams.push((sig, signal(sig.kind())?));
    }
    if streams.is_empty() {
        return std::future::pending().await;
    }

    let waits = streams.iter_mut().map(|(sig, stream)| {
        let sig = *sig;
        Box::pin(async move {
            stream.recv().await;
            sig
        })
    });
    let (sig, _, _) = select_all(waits).await;
    Ok(sig)
}

/// Only Ctrl+C is observable off unix; it stands in for every configured signal.
#[cfg(not(unix))]
pub async fn wait_for_any(signals: &[Signal]) -> std::io::Result<Signal> {
    if signals.is_empty() {
        return std::future::pending().await;
    }
    tokio::signal::ctrl_c().await?;
    Ok(Signal::Interrupt)
}
