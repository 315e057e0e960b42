use crate::config::{StoreArgs, StoreSettings};
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;

/// Runtime configuration for the `relatedness-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. A
/// `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relatedness-server",
    version,
    about = "HTTP access to the lease queue, batch and distance store"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Address to listen on.
    ///
    /// Example: "0.0.0.0:8000"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8000"))]
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub settings: StoreSettings,
    pub server_addr: SocketAddr,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR ({}) is not a socket address", args.server_addr))?;

        Ok(Self {
            settings: StoreSettings::try_from(args.store)?,
            server_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_address() {
        let args = CliArgs::try_parse_from(["relatedness-server", "--server-addr", "nowhere"]).unwrap();
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test]
    fn accepts_explicit_address() {
        let args =
            CliArgs::try_parse_from(["relatedness-server", "--server-addr", "127.0.0.1:9000"]).unwrap();
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }
}
