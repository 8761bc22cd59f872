use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default reported capacity of the storage root (64 MiB).
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "secstore",
    about = "SecStore: path-addressed storage with integrity digests",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Storage root directory
    #[arg(long, global = true, default_value = ".secstore-data")]
    pub root: PathBuf,

    /// Capacity reported for the storage root, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_CAPACITY)]
    pub capacity: u64,

    /// TOML configuration file; overrides --root and --capacity
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store bytes at a path
    Write(WriteArgs),
    /// Print the bytes stored at a path
    Read(ReadArgs),
    /// Delete a leaf or subtree
    Rm(PathArg),
    /// Total size of a subtree
    Size(OptionalPathArg),
    /// List the immediate children of a path
    Ls(OptionalPathArg),
    /// Show total and free space
    Space,
    /// Copy a subtree to an empty destination
    Cp(RelocateArgs),
    /// Move a subtree to an empty destination
    Mv(RelocateArgs),
    /// Export the integrity metadata to a path
    CopyMeta(PathArg),
    /// Compare stored content with the integrity metadata
    Verify,
    /// Rebuild integrity metadata after an external restore
    Reinit,
    /// Show the meta digest of a subtree
    Digest(OptionalPathArg),
}

#[derive(Args)]
pub struct PathArg {
    pub path: String,
}

#[derive(Args)]
pub struct OptionalPathArg {
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args)]
pub struct WriteArgs {
    pub path: String,
    /// Literal value to store
    #[arg(long, conflicts_with = "file")]
    pub value: Option<String>,
    /// Read the value from a file (stdin when neither is given)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct ReadArgs {
    pub path: String,
    /// Write the bytes to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct RelocateArgs {
    pub src: String,
    pub dest: String,
}
