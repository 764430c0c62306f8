use camino::Utf8PathBuf;
use clap::Parser;

/// Headless, network-attached playback control-plane daemon.
#[derive(clap::Parser)]
pub(crate) struct Cli {
    /// TOML config file (the `connection_timeout`/`max_connections`/...
    /// variables). Anything it doesn't set, and the file itself if this is
    /// omitted, falls back to the built-in defaults.
    #[clap(long)]
    pub(crate) config: Option<Utf8PathBuf>,

    /// TCP port to listen on.
    #[clap(long, default_value_t = 6600)]
    pub(crate) port: u16,

    /// Don't listen on TCP at all (only `--socket`, if given, accepts
    /// connections).
    #[clap(long)]
    pub(crate) no_tcp: bool,

    /// Unix domain socket path to listen on, in addition to TCP.
    #[clap(long)]
    pub(crate) socket: Option<Utf8PathBuf>,

    /// Directory holding stored playlists.
    #[clap(long, default_value = "playlists")]
    pub(crate) playlist_dir: Utf8PathBuf,
}
