use std::path::PathBuf;

/// Credentials and callback URLs for the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub register_url: String,
    pub user: String,
    pub password: String,
    pub return_url: String,
    pub fail_url: String,
}

/// Server configuration, read once at startup from `FLEETBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// Expose storage and gateway error text to clients.
    pub diagnostics: bool,
    /// `None` when `FLEETBOOK_GATEWAY_URL` is unset.
    pub gateway: Option<GatewaySettings>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        fn parse_var<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            get(key).and_then(|s| s.trim().parse().ok())
        }
        let gateway = get("FLEETBOOK_GATEWAY_URL")
            .filter(|url| !url.is_empty())
            .map(|register_url| GatewaySettings {
                register_url,
                user: get("FLEETBOOK_GATEWAY_USER").unwrap_or_default(),
                password: get("FLEETBOOK_GATEWAY_PASSWORD").unwrap_or_default(),
                return_url: get("FLEETBOOK_GATEWAY_RETURN_URL").unwrap_or_default(),
                fail_url: get("FLEETBOOK_GATEWAY_FAIL_URL").unwrap_or_default(),
            });

        Self {
            port: parse_var(&get, "FLEETBOOK_PORT").unwrap_or(5433),
            bind: get("FLEETBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("FLEETBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("FLEETBOOK_PASSWORD").unwrap_or_else(|| "fleetbook".into()),
            max_connections: parse_var(&get, "FLEETBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parse_var(&get, "FLEETBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            tls_cert: get("FLEETBOOK_TLS_CERT"),
            tls_key: get("FLEETBOOK_TLS_KEY"),
            metrics_port: parse_var(&get, "FLEETBOOK_METRICS_PORT"),
            diagnostics: get("FLEETBOOK_DIAGNOSTICS")
                .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
            gateway,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.wal_path(), PathBuf::from("./data/fleetbook.wal"));
        assert_eq!(c.password, "fleetbook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert!(!c.diagnostics);
        assert!(c.gateway.is_none());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let c = config(&[
            ("FLEETBOOK_PORT", "6000"),
            ("FLEETBOOK_MAX_CONNECTIONS", "lots"),
            ("FLEETBOOK_METRICS_PORT", "9100"),
            ("FLEETBOOK_DIAGNOSTICS", "1"),
        ]);
        assert_eq!(c.port, 6000);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.metrics_port, Some(9100));
        assert!(c.diagnostics);
    }

    #[test]
    fn gateway_enabled_by_url() {
        let c = config(&[
            ("FLEETBOOK_GATEWAY_URL", "https://pay.example/register.do"),
            ("FLEETBOOK_GATEWAY_USER", "merchant"),
        ]);
        let gw = c.gateway.unwrap();
        assert_eq!(gw.register_url, "https://pay.example/register.do");
        assert_eq!(gw.user, "merchant");
        assert_eq!(gw.password, "");
        assert!(config(&[("FLEETBOOK_GATEWAY_URL", "")]).gateway.is_none());
    }
}
