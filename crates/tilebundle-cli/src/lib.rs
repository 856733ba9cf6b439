//! Command-line front end for tilebundle caches.
//!
//! The `tilebundle` binary is a thin wrapper over [`run`]; everything it
//! does is reachable from here so it can be tested without a process.
//!
//! ```text
//! tilebundle --root /srv/tiles put 3 5 5 tile.png
//! tilebundle --root /srv/tiles get 3 5 5 -o out.png
//! tilebundle --root /srv/tiles inspect 3 5 5 --raw
//! tilebundle --root /srv/tiles path 3 5 5
//! ```

pub mod commands;
pub mod config;

pub use commands::run;
pub use config::{Cli, Command, TileArgs};
