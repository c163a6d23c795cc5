//! Concrete adapters over the external transfer clients.

mod aria2;
mod qbittorrent;
mod rclone;
mod sabnzbd;

pub use aria2::Aria2Client;
pub use qbittorrent::QbittorrentClient;
pub use rclone::RcloneClient;
pub use sabnzbd::SabnzbdClient;
