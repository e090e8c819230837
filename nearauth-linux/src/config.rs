//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use nearauth_core::Mode;
use serde::Deserialize;

/// Daemon configuration. File: `--config <path>`, ~/.config/nearauth/config.toml or /etc/nearauth/config.toml.
/// Env overrides: NEARAUTH_LISTEN_PORT, NEARAUTH_MODE, NEARAUTH_RELAY, NEARAUTH_PAIRINGS_FILE,
/// NEARAUTH_EXIT_WHEN_IDLE, NEARAUTH_AVAILABILITY_TIMEOUT_MS, NEARAUTH_PROXY_TIMEOUT_MS,
/// NEARAUTH_CONTROL_SOCKET.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Offer listener TCP port (default 47000).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// How sessions reach their service.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Pairings file (default ~/.config/nearauth/pairings.toml).
    #[serde(default = "default_pairings_file")]
    pub pairings_file: PathBuf,
    /// Exit once the last session closes.
    #[serde(default)]
    pub exit_when_idle: bool,
    /// Local control socket (default $XDG_RUNTIME_DIR/nearauth.sock).
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,
    #[serde(default)]
    pub auth: nearauth_core::Config,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Connect straight to the address the offer (or pairing) carries.
    #[default]
    Direct,
    /// Go through a rendezvous relay at `relay` ("host:port").
    Rendezvous { relay: String },
}

fn default_listen_port() -> u16 {
    47000
}

fn default_pairings_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config/nearauth/pairings.toml"),
        None => PathBuf::from("/etc/nearauth/pairings.toml"),
    }
}

fn default_control_socket() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => PathBuf::from(dir).join("nearauth.sock"),
        None => std::env::temp_dir().join("nearauth.sock"),
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            channel: ChannelConfig::default(),
            pairings_file: default_pairings_file(),
            exit_when_idle: false,
            control_socket: default_control_socket(),
            auth: nearauth_core::Config::default(),
        }
    }
}

/// Load config: defaults, then the config file (explicit path, or the first that exists), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => read_file(&path)?,
            None => DaemonConfig::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok())?;
    c.auth.validate()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/nearauth/config.toml"));
    }
    out.push(PathBuf::from("/etc/nearauth/config.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<DaemonConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse(s: &str) -> anyhow::Result<DaemonConfig> {
    Ok(toml::from_str::<DaemonConfig>(s)?)
}

fn apply_env(c: &mut DaemonConfig, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(s) = var("NEARAUTH_LISTEN_PORT") {
        c.listen_port = s
            .parse()
            .with_context(|| format!("NEARAUTH_LISTEN_PORT={s}"))?;
    }
    if let Some(s) = var("NEARAUTH_MODE") {
        c.auth.mode = s.parse::<Mode>().map_err(anyhow::Error::msg)?;
    }
    if let Some(s) = var("NEARAUTH_RELAY") {
        c.channel = if s.is_empty() {
            ChannelConfig::Direct
        } else {
            ChannelConfig::Rendezvous { relay: s }
        };
    }
    if let Some(s) = var("NEARAUTH_PAIRINGS_FILE") {
        c.pairings_file = PathBuf::from(s);
    }
    if let Some(s) = var("NEARAUTH_EXIT_WHEN_IDLE") {
        c.exit_when_idle = match s.as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => bail!("NEARAUTH_EXIT_WHEN_IDLE={other}: expected true or false"),
        };
    }
    if let Some(s) = var("NEARAUTH_CONTROL_SOCKET") {
        c.control_socket = PathBuf::from(s);
    }
    if let Some(s) = var("NEARAUTH_AVAILABILITY_TIMEOUT_MS") {
        c.auth.availability_timeout_ms = s
            .parse()
            .with_context(|| format!("NEARAUTH_AVAILABILITY_TIMEOUT_MS={s}"))?;
    }
    if let Some(s) = var("NEARAUTH_PROXY_TIMEOUT_MS") {
        c.auth.proxy_timeout_ms = s
            .parse()
            .with_context(|| format!("NEARAUTH_PROXY_TIMEOUT_MS={s}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.listen_port, 47000);
        assert_eq!(c.channel, ChannelConfig::Direct);
        assert!(!c.exit_when_idle);
        assert_eq!(c.auth, nearauth_core::Config::default());
    }

    #[test]
    fn full_file() {
        let c = parse(
            r#"
            listen_port = 47100
            pairings_file = "/var/lib/nearauth/pairings.toml"
            exit_when_idle = true
            control_socket = "/run/user/1000/nearauth.sock"

            [channel]
            kind = "rendezvous"
            relay = "relay.local:47200"

            [auth]
            mode = "automatic"
            proxy_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_port, 47100);
        assert_eq!(
            c.channel,
            ChannelConfig::Rendezvous {
                relay: "relay.local:47200".into()
            }
        );
        assert_eq!(c.pairings_file, PathBuf::from("/var/lib/nearauth/pairings.toml"));
        assert!(c.exit_when_idle);
        assert_eq!(c.control_socket, PathBuf::from("/run/user/1000/nearauth.sock"));
        assert_eq!(c.auth.mode, Mode::Automatic);
        assert_eq!(c.auth.proxy_timeout(), Duration::from_millis(5000));
        assert_eq!(c.auth.availability_timeout(), Duration::from_millis(6000));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse("listen_prot = 1").is_err());
        assert!(parse("[auth]\nmod = \"manual\"").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = parse("listen_port = 1").unwrap();
        apply_env(
            &mut c,
            env(&[
                ("NEARAUTH_LISTEN_PORT", "47001"),
                ("NEARAUTH_MODE", "notification"),
                ("NEARAUTH_RELAY", "10.0.0.9:47200"),
                ("NEARAUTH_EXIT_WHEN_IDLE", "yes"),
                ("NEARAUTH_AVAILABILITY_TIMEOUT_MS", "8000"),
                ("NEARAUTH_CONTROL_SOCKET", "/tmp/na.sock"),
            ]),
        )
        .unwrap();
        assert_eq!(c.listen_port, 47001);
        assert_eq!(c.auth.mode, Mode::Notification);
        assert!(matches!(c.channel, ChannelConfig::Rendezvous { .. }));
        assert!(c.exit_when_idle);
        assert_eq!(c.auth.availability_timeout_ms, 8000);
        assert_eq!(c.control_socket, PathBuf::from("/tmp/na.sock"));
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut c = DaemonConfig::default();
        assert!(apply_env(&mut c, env(&[("NEARAUTH_LISTEN_PORT", "lots")])).is_err());
        assert!(apply_env(&mut c, env(&[("NEARAUTH_MODE", "sometimes")])).is_err());
    }
}
