//! Torrent daemon abstraction.
//!
//! This module provides a `TorrentClient` trait for reading and removing
//! torrents on the seedbox daemon. qBittorrent is the only backend.

mod qbittorrent;
mod types;

pub use qbittorrent::QBittorrentClient;
pub use types::*;
