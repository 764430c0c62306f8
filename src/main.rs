use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::Context;

use crate::cli::Cli;
use crate::config::Config;
use crate::database::{DatabaseBackend, MemoryDatabase};
use crate::dispatch::PasswordEntry;
use crate::partition::Partition;
use crate::playlist_controller::PlaylistController;
use crate::playlist_store::PlaylistStore;
use crate::server::ListenAddrs;

mod cli;
mod client;
mod config;
mod database;
mod dispatch;
mod error;
mod idle;
mod mpd_protocol;
mod partition;
mod player_control;
mod player_driver;
mod playlist_controller;
mod playlist_store;
mod queue;
mod server;
mod song;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install().unwrap();
    setup_tracing();

    let cli = Cli::parse();

    let config = Arc::new(match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    });
    let passwords: Arc<[PasswordEntry]> = Arc::from(config.passwords().wrap_err("Bad password config")?);

    let playlists =
        PlaylistStore::load_from_dir(cli.playlist_dir.clone()).wrap_err("Could not load stored playlists")?;
    let controller = PlaylistController::new(config.max_playlist_length);
    let database = DatabaseBackend::Memory(MemoryDatabase::new());
    let partition = Arc::new(Partition::new("default", controller, playlists, database));
    let player_driver = player_driver::spawn(Arc::clone(&partition));

    let addrs = ListenAddrs {
        tcp_port: if cli.no_tcp { None } else { Some(cli.port) },
        unix_socket_path: cli.socket.map(|path| path.into_std_path_buf()),
    };

    server::run(addrs, partition, config, passwords, player_driver).await
}

pub fn setup_tracing() {
    use tracing_subscriber::filter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = filter::EnvFilter::builder().from_env().unwrap();
    let fmt = fmt::layer().pretty().with_line_number(true);

    let _ignore_err = tracing_subscriber::registry().with(fmt).with(filter).try_init();
}
