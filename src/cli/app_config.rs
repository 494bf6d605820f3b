use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send concurrent timed requests to a benchmark server.
    Client(ClientArgs),
    /// Serve precomputed payload tiers.
    Server(ServerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// The server address, like localhost:4433
    #[arg(long, value_name = "host:port", default_value = "localhost:4433")]
    pub server: String,
    /// Write a protocol event trace.
    #[arg(long)]
    pub qlog: bool,
    /// Directory of the event trace files. Requires --qlog.
    #[arg(long, value_name = "dir", default_value = "qlog")]
    pub qlogpath: PathBuf,
    /// Number of random bytes to POST to the server, 0 sends a GET.
    #[arg(long, value_name = "bytes", default_value_t = 0)]
    pub bytes: usize,
    /// Number of parallel requests.
    #[arg(long, value_name = "count", default_value_t = 1)]
    pub parallel: usize,
    /// Payload tier to request, from 1 to 4.
    #[arg(long, value_name = "index", default_value_t = 1)]
    pub expernumber: u64,
    /// The metrics log the rows are appended to.
    #[arg(long, value_name = "file", default_value = "logs/metrics.csv")]
    pub metrics: PathBuf,
    /// Per-request deadline in seconds.
    #[arg(long, value_name = "seconds", default_value_t = 30)]
    pub timeout: u64,
    /// Use http:// instead of https://.
    #[arg(long)]
    pub plaintext: bool,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// Extra root certificates in PEM format.
    #[arg(long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// The listening address, like localhost:4433
    #[arg(long, value_name = "host:port", default_value = "localhost:4433")]
    pub addr: String,
    /// Write a protocol event trace.
    #[arg(long)]
    pub qlog: bool,
    /// Directory of the event trace files. Requires --qlog.
    #[arg(long, value_name = "dir", default_value = "qlog")]
    pub qlogpath: PathBuf,
    /// Size of the smallest payload tier; the others are 2x, 4x and 8x.
    #[arg(long, value_name = "bytes", default_value_t = 1_000_000)]
    pub bytes: usize,
    /// Certificate chain in PEM format.
    #[arg(long, value_name = "file", requires = "key")]
    pub cert: Option<PathBuf>,
    /// Private key in PEM format.
    #[arg(long, value_name = "file", requires = "cert")]
    pub key: Option<PathBuf>,
}
