use std::collections::HashMap;
use std::time::Duration;

use wiremail_domain::Credentials;
use wiremail_transport::{SessionConfig, DEFAULT_RETRY_INTERVAL, DEFAULT_SUB_PROTOCOL};

/// Settings read from `WIREMAIL_*` variables.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub imap_url: String,
    pub smtp_url: String,
    pub credentials: Credentials,
    pub from: String,
    pub retry_interval: Duration,
    pub debug: bool,
    pub sub_protocol: String,
}

impl CliConfig {
    pub fn from_env() -> Result<Self, String> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(|name| vars.get(name).cloned())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let required = |name: &str| {
            get(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("{name} env var not set"))
        };

        let imap_url = required("WIREMAIL_IMAP_URL")?;
        let smtp_url = required("WIREMAIL_SMTP_URL")?;
        let username = required("WIREMAIL_USERNAME")?;
        let password = required("WIREMAIL_PASSWORD")?;
        let from = get("WIREMAIL_FROM").unwrap_or_else(|| username.clone());

        let retry_interval = match get("WIREMAIL_RETRY_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .map_err(|e| format!("invalid WIREMAIL_RETRY_MS: {e}"))?,
            ),
            None => DEFAULT_RETRY_INTERVAL,
        };
        let debug = get("WIREMAIL_DEBUG")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let sub_protocol =
            get("WIREMAIL_SUBPROTOCOL").unwrap_or_else(|| DEFAULT_SUB_PROTOCOL.to_string());

        Ok(Self {
            imap_url,
            smtp_url,
            credentials: Credentials::new(username, password),
            from,
            retry_interval,
            debug,
            sub_protocol,
        })
    }

    pub fn session(&self, url: &str) -> SessionConfig {
        SessionConfig::new(url, self.credentials.clone())
            .with_sub_protocol(self.sub_protocol.clone())
            .with_retry_interval(self.retry_interval)
            .with_debug(self.debug)
    }

    /// Domain part of the sender, used for Message-IDs.
    pub fn domain(&self) -> &str {
        self.from
            .rsplit_once('@')
            .map(|(_, d)| d.trim_end_matches('>'))
            .filter(|d| !d.is_empty())
            .unwrap_or("localhost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: [(&str, &str); 4] = [
        ("WIREMAIL_IMAP_URL", "wss://tunnel/imap"),
        ("WIREMAIL_SMTP_URL", "wss://tunnel/smtp"),
        ("WIREMAIL_USERNAME", "ann@example.org"),
        ("WIREMAIL_PASSWORD", "pw"),
    ];

    #[test]
    fn defaults_fill_optional_settings() {
        let config = CliConfig::from_vars(vars(&BASE)).unwrap();
        assert_eq!(config.from, "ann@example.org");
        assert_eq!(config.domain(), "example.org");
        assert_eq!(config.retry_interval, DEFAULT_RETRY_INTERVAL);
        assert_eq!(config.sub_protocol, DEFAULT_SUB_PROTOCOL);
        assert!(!config.debug);
    }

    #[test]
    fn overrides_are_applied() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("WIREMAIL_RETRY_MS", "0"),
            ("WIREMAIL_DEBUG", "true"),
            ("WIREMAIL_FROM", "Ann <ann@mail.example.org>"),
        ]);
        let config = CliConfig::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.retry_interval, Duration::ZERO);
        assert!(config.debug);
        assert_eq!(config.domain(), "mail.example.org");
        assert_eq!(config.session(&config.imap_url).url, "wss://tunnel/imap");
    }

    #[test]
    fn missing_variable_is_named() {
        let err = CliConfig::from_vars(vars(&BASE[..3])).unwrap_err();
        assert_eq!(err, "WIREMAIL_PASSWORD env var not set");

        let mut pairs = BASE.to_vec();
        pairs.push(("WIREMAIL_RETRY_MS", "soon"));
        assert!(CliConfig::from_vars(vars(&pairs))
            .unwrap_err()
            .starts_with("invalid WIREMAIL_RETRY_MS"));
    }
}
