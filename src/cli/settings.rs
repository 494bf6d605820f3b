//! Validated, immutable run settings built once from the command line.

use crate::cli::app_config::{ClientArgs, ServerArgs};
use crate::server::selector::TIER_COUNT;
use hyper::Uri;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TraceSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_uri: Uri,
    pub body_size: usize,
    pub concurrency: usize,
    pub experiment: u64,
    pub metrics_path: PathBuf,
    pub deadline: Duration,
    pub skip_certificate_validate: bool,
    pub certificate_path: Option<PathBuf>,
    pub trace: TraceSettings,
}

impl ClientSettings {
    /// The full URI of one experiment request, like `https://host:4433/2`.
    pub fn target(&self) -> Result<Uri, anyhow::Error> {
        let base = self.base_uri.to_string();
        let uri = format!("{}/{}", base.trim_end_matches('/'), self.experiment).parse()?;
        Ok(uri)
    }
}

impl TryFrom<ClientArgs> for ClientSettings {
    type Error = anyhow::Error;

    fn try_from(args: ClientArgs) -> Result<Self, Self::Error> {
        ensure!(args.parallel >= 1, "--parallel must be at least 1");
        ensure!(
            (1..=TIER_COUNT as u64).contains(&args.expernumber),
            "--expernumber must be between 1 and {}",
            TIER_COUNT
        );
        ensure!(args.timeout >= 1, "--timeout must be at least one second");
        let scheme = if args.plaintext { "http" } else { "https" };
        let base_uri: Uri = format!("{}://{}", scheme, args.server)
            .parse()
            .map_err(|e| anyhow!("Invalid server address '{}': {}", args.server, e))?;
        ensure!(
            base_uri.host().is_some(),
            "Server address '{}' has no host",
            args.server
        );

        Ok(Self {
            base_uri,
            body_size: args.bytes,
            concurrency: args.parallel,
            experiment: args.expernumber,
            metrics_path: args.metrics,
            deadline: Duration::from_secs(args.timeout),
            skip_certificate_validate: args.skip_certificate_validate,
            certificate_path: args.certificate_path_option,
            trace: TraceSettings {
                enabled: args.qlog,
                dir: args.qlogpath,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub base_size: usize,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub trace: TraceSettings,
}

impl TryFrom<ServerArgs> for ServerSettings {
    type Error = anyhow::Error;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let tls = match (args.cert, args.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => return Err(anyhow!("--cert and --key must be given together")),
        };
        Ok(Self {
            addr: args.addr,
            base_size: args.bytes,
            tls,
            trace: TraceSettings {
                enabled: args.qlog,
                dir: args.qlogpath,
            },
        })
    }
}
