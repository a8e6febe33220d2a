use std::env;

use bpg_common::Secret;
use log::*;

const DEFAULT_BPG_HOST: &str = "127.0.0.1";
const DEFAULT_BPG_PORT: u16 = 8330;
const DEFAULT_ACCOUNTING_CURRENCY: &str = "USD";
/// How long a freshly created order accepts payment before it expires, in seconds.
const DEFAULT_ORDER_LIFETIME_SECS: i64 = 1800;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The platform accounting currency. Fixed-fee tariff rows are expressed in it.
    pub accounting_currency: String,
    /// Base URL of the payment gateway's submission API.
    pub gateway_url: String,
    /// Bearer token for the gateway API.
    pub gateway_token: Secret<String>,
    /// Base URL of the catalog/tariff/rates reference service.
    pub reference_url: String,
    /// Base URL of the side-effect services (notifications, key inventory, card vault).
    pub services_url: String,
    pub order_lifetime_secs: i64,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address,
    /// rather than the connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather
    /// than the connection's remote address.
    pub use_forwarded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BPG_HOST.to_string(),
            port: DEFAULT_BPG_PORT,
            database_url: String::default(),
            accounting_currency: DEFAULT_ACCOUNTING_CURRENCY.to_string(),
            gateway_url: String::default(),
            gateway_token: Secret::new(String::default()),
            reference_url: String::default(),
            services_url: String::default(),
            order_lifetime_secs: DEFAULT_ORDER_LIFETIME_SECS,
            use_x_forwarded_for: false,
            use_forwarded: false,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("BPG_HOST").ok().unwrap_or_else(|| DEFAULT_BPG_HOST.into());
        let port = env::var("BPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for BPG_PORT. {e} Using the default, {DEFAULT_BPG_PORT}, instead."
                    );
                    DEFAULT_BPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_BPG_PORT);
        let database_url = env::var("BPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_DATABASE_URL is not set. Please set it to the URL for the billing database.");
            String::default()
        });
        let accounting_currency = env::var("BPG_ACCOUNTING_CURRENCY").ok().unwrap_or_else(|| {
            info!("🪛️ BPG_ACCOUNTING_CURRENCY is not set. Using {DEFAULT_ACCOUNTING_CURRENCY}.");
            DEFAULT_ACCOUNTING_CURRENCY.into()
        });
        let gateway_url = env::var("BPG_GATEWAY_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_GATEWAY_URL is not set. Please set it to the payment gateway base URL.");
            String::default()
        });
        let gateway_token = Secret::new(env::var("BPG_GATEWAY_TOKEN").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_GATEWAY_TOKEN is not set. Gateway requests will be unauthenticated.");
            String::default()
        }));
        let reference_url = env::var("BPG_REFERENCE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_REFERENCE_URL is not set. Please set it to the reference service base URL.");
            String::default()
        });
        let services_url = env::var("BPG_SERVICES_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_SERVICES_URL is not set. Please set it to the side-effect services base URL.");
            String::default()
        });
        let order_lifetime_secs = env::var("BPG_ORDER_LIFETIME_SECS")
            .map(|s| {
                s.parse::<i64>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid value for BPG_ORDER_LIFETIME_SECS. {e} Using the default, \
                         {DEFAULT_ORDER_LIFETIME_SECS}, instead."
                    );
                    DEFAULT_ORDER_LIFETIME_SECS
                })
            })
            .ok()
            .unwrap_or(DEFAULT_ORDER_LIFETIME_SECS);
        let use_x_forwarded_for =
            env::var("BPG_USE_X_FORWARDED_FOR").map(|s| &s == "1" || &s == "true").unwrap_or(false);
        let use_forwarded = env::var("BPG_USE_FORWARDED").map(|s| &s == "1" || &s == "true").unwrap_or(false);
        Self {
            host,
            port,
            database_url,
            accounting_currency,
            gateway_url,
            gateway_token,
            reference_url,
            services_url,
            order_lifetime_secs,
            use_x_forwarded_for,
            use_forwarded,
        }
    }
}

/// The subset of the configuration the request handlers need to resolve the payer's address
/// behind reverse proxies.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyConfig {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

impl From<&ServerConfig> for ProxyConfig {
    fn from(config: &ServerConfig) -> Self {
        Self { use_x_forwarded_for: config.use_x_forwarded_for, use_forwarded: config.use_forwarded }
    }
}
