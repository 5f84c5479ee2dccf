use anyhow::bail;
use clap::Parser;
use core::fmt;
use core::time::Duration;

/// Runtime configuration for the `product-catalog-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first). The store connection descriptor is deliberately not
/// baked into the binary: it must be supplied by the deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "product-catalog-server",
    version,
    about = "A gRPC service for creating and reading catalog products"
)]
pub struct CliArgs {
    /// TCP address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// MongoDB connection string (`mongodb://` or `mongodb+srv://`).
    ///
    /// Credentials embedded here are redacted from every log line.
    ///
    /// Environment variable: `STORE_URI`
    #[arg(long, env = "STORE_URI", default_value_t = String::from("mongodb://localhost:27017"), hide_env_values = true)]
    pub store_uri: String,

    /// Database holding the product collection.
    ///
    /// Environment variable: `STORE_DATABASE`
    #[arg(long, env = "STORE_DATABASE", default_value_t = String::from("catalog"))]
    pub store_database: String,

    /// Collection products are written to and read from.
    ///
    /// Environment variable: `STORE_COLLECTION`
    #[arg(long, env = "STORE_COLLECTION", default_value_t = String::from("product"))]
    pub store_collection: String,

    /// Deadline applied to every store call made while serving a request, in
    /// milliseconds. `0` disables the deadline.
    ///
    /// Environment variable: `STORE_TIMEOUT_MS`
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5_000)]
    pub store_timeout_ms: u64,

    /// How long shutdown waits for in-flight requests before giving up on
    /// them, in seconds. `0` waits indefinitely.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

/// A store connection string that never prints its password.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreUri(String);

impl StoreUri {
    const SCHEMES: [&'static str; 2] = ["mongodb://", "mongodb+srv://"];

    pub fn parse(raw: impl Into<String>) -> anyhow::Result<Self> {
        let raw = raw.into();
        if !Self::SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
            bail!("STORE_URI must start with one of {:?}", Self::SCHEMES);
        }
        let authority = Self::authority(&raw);
        if authority.rsplit('@').next().is_none_or(str::is_empty) {
            bail!("STORE_URI is missing a host");
        }
        Ok(Self(raw))
    }

    /// The raw connection string, including any credentials.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The connection string with the password replaced by `***`.
    pub fn redacted(&self) -> String {
        let scheme_end = self.0.find("://").map_or(0, |i| i + 3);
        let authority = Self::authority(&self.0);
        let Some((userinfo, host)) = authority.rsplit_once('@') else {
            return self.0.clone();
        };
        let Some((user, _)) = userinfo.split_once(':') else {
            return self.0.clone();
        };
        let rest = &self.0[scheme_end + authority.len()..];
        format!("{}{user}:***@{host}{rest}", &self.0[..scheme_end])
    }

    fn authority(raw: &str) -> &str {
        let after_scheme = raw.find("://").map_or(raw, |i| &raw[i + 3..]);
        let end = after_scheme.find(['/', '?']).unwrap_or(after_scheme.len());
        &after_scheme[..end]
    }
}

impl fmt::Debug for StoreUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreUri").field(&self.redacted()).finish()
    }
}

impl fmt::Display for StoreUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Connection settings consumed by the store adapter.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: StoreUri,
    pub database: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub store: StoreConfig,
    pub store_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        if args.store_database.is_empty() {
            bail!("STORE_DATABASE must not be empty");
        }

        if args.store_collection.is_empty() {
            bail!("STORE_COLLECTION must not be empty");
        }

        let uri = StoreUri::parse(args.store_uri)?;

        Ok(Self {
            server_addr: args.server_addr,
            store: StoreConfig {
                uri,
                database: args.store_database,
                collection: args.store_collection,
            },
            store_timeout: non_zero(Duration::from_millis(args.store_timeout_ms)),
            shutdown_timeout: non_zero(Duration::from_secs(args.shutdown_timeout_secs)),
        })
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
