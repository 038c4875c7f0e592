use clap::Parser;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

/// Entries shown per listing page.
pub const PAGE_SIZE: usize = 20;
/// Transfer buffer for streamed file content (16 KiB).
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Directories whose recursive size is remembered.
pub const SIZE_CACHE_CAPACITY: usize = 128;
/// URL prefix (and directory under the shared root) for viewer assets.
pub const STATIC_DIR_NAME: &str = "static";
/// Suffix that turns a directory path into an archive request.
pub const ARCHIVE_SUFFIX: &str = ".zip";

// --- Command line ---
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The directory to share
    #[arg(value_name = "DIR", default_value = ".")]
    pub shared_directory: PathBuf,

    /// Also write logs to server_<timestamp>.log in the current directory
    #[arg(long)]
    pub logs: bool,

    /// First port to try; taken ports are skipped upwards
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The address to bind to
    #[arg(short, long, value_name = "IP", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// List and serve entries whose names start with '.'
    #[arg(long)]
    pub show_hidden: bool,

    /// Do not load syntax highlighting assets in the code viewer
    #[arg(long)]
    pub no_highlight: bool,

    /// Rebuild a cached archive when its directory changed after it was written
    #[arg(long)]
    pub rebuild_stale_archives: bool,
}

/// Settings the request handlers depend on.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root_dir: PathBuf,
    pub show_hidden: bool,
    pub highlight: bool,
    pub archive_reuse: ArchiveReuse,
}

/// What to do when an archive already exists at the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveReuse {
    /// Serve it as-is, whatever happened to the source since.
    Always,
    /// Rebuild it if the source directory was modified after the archive.
    WhileFresh,
}

impl ServerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            show_hidden: false,
            highlight: true,
            archive_reuse: ArchiveReuse::Always,
        }
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            root_dir: args.shared_directory.clone(),
            show_hidden: args.show_hidden,
            highlight: !args.no_highlight,
            archive_reuse: if args.rebuild_stale_archives {
                ArchiveReuse::WhileFresh
            } else {
                ArchiveReuse::Always
            },
        }
    }
}
