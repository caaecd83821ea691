use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use fatdisk::config::DEFAULT_TABLE_ROWS;
use fatdisk::{create_image, EntryKind, FatError, FatVolume, ImageSpec, MountConfig, TreeEntry};

mod logger;

// --- Define Command-Line Interface ---
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Inspect and modify a FAT-style virtual disk image."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a freshly formatted image
    Format {
        /// Image file to create
        image: PathBuf,
        /// Number of clusters in the data region
        clusters: u32,
        /// Bytes per cluster
        cluster_size: u16,
        /// Number of redundant allocation tables
        #[arg(long, default_value_t = 2)]
        copies: u8,
        /// Volume label
        #[arg(long, default_value = "big empty fat")]
        label: String,
    },
    /// Copy a host file into a directory of the image
    Add {
        #[command(flatten)]
        mount: MountArgs,
        /// Host file to copy
        source: PathBuf,
        /// Destination directory inside the image
        dest: String,
    },
    /// Create a directory
    Mkdir {
        #[command(flatten)]
        mount: MountArgs,
        /// Name of the new directory
        name: String,
        /// Parent directory inside the image
        parent: String,
    },
    /// Remove a file
    RmFile {
        #[command(flatten)]
        mount: MountArgs,
        path: String,
    },
    /// Remove an empty directory
    Rmdir {
        #[command(flatten)]
        mount: MountArgs,
        path: String,
    },
    /// Print the clusters of a file in chain order
    Clusters {
        #[command(flatten)]
        mount: MountArgs,
        path: String,
    },
    /// Print the content of a file
    Cat {
        #[command(flatten)]
        mount: MountArgs,
        path: String,
    },
    /// Print the directory tree
    Tree {
        #[command(flatten)]
        mount: MountArgs,
    },
    /// Print the first rows of the allocation table
    Table {
        #[command(flatten)]
        mount: MountArgs,
        /// Number of rows
        #[arg(default_value_t = DEFAULT_TABLE_ROWS)]
        rows: usize,
    },
    /// Stamp the bad-sector signature on a cluster
    Corrupt {
        #[command(flatten)]
        mount: MountArgs,
        cluster: u32,
    },
}

#[derive(clap::Args, Debug)]
struct MountArgs {
    /// Image file
    image: PathBuf,
    /// Threads used to load the directory tree
    #[arg(short, long, default_value_t = fatdisk::config::DEFAULT_WORKERS)]
    workers: usize,
    /// Seed for the repair roll
    #[arg(long)]
    seed: Option<u64>,
}

impl MountArgs {
    fn open(&self) -> Result<FatVolume, FatError> {
        let mut config = MountConfig::default().with_workers(self.workers);
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        FatVolume::open(&self.image, &config)
    }
}

// --- Main Application Logic ---
fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logger::init(cli.verbose) {
        eprintln!("failed to install logger: {e}");
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            if e.is_fatal() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(command: Commands) -> Result<(), FatError> {
    match command {
        Commands::Format {
            image,
            clusters,
            cluster_size,
            copies,
            label,
        } => {
            let spec = ImageSpec {
                label,
                ..ImageSpec::new(clusters, cluster_size).with_copies(copies)
            };
            create_image(&image, &spec)?;
            println!(
                "Created {} with {clusters} clusters of {cluster_size} bytes",
                image.display()
            );
        }
        Commands::Add {
            mount,
            source,
            dest,
        } => {
            mount.open()?.add_file(&source, &dest)?;
            println!("OK");
        }
        Commands::Mkdir {
            mount,
            name,
            parent,
        } => {
            mount.open()?.create_dir(&name, &parent)?;
            println!("OK");
        }
        Commands::RmFile { mount, path } => {
            mount.open()?.remove(&path, EntryKind::File)?;
            println!("OK");
        }
        Commands::Rmdir { mount, path } => {
            mount.open()?.remove(&path, EntryKind::Directory)?;
            println!("OK");
        }
        Commands::Clusters { mount, path } => {
            let volume = mount.open()?;
            let clusters = volume.list_clusters(&path)?;
            let name = volume.tree()[volume.resolve(&path)?].name.clone();
            let list: Vec<String> = clusters.iter().map(u32::to_string).collect();
            println!("{name} {}", list.join(" "));
        }
        Commands::Cat { mount, path } => {
            let content = mount.open()?.read_file(&path)?;
            print!("{}", String::from_utf8_lossy(&content));
        }
        Commands::Tree { mount } => {
            let entries = mount.open()?.walk()?;
            print!("{}", render_tree(&entries));
        }
        Commands::Table { mount, rows } => {
            for (cluster, entry) in mount.open()?.table_rows(rows) {
                println!("{cluster}: {entry}");
            }
        }
        Commands::Corrupt { mount, cluster } => {
            mount.open()?.inject_bad_signature(cluster)?;
            println!("Cluster {cluster} corrupted");
        }
    }
    Ok(())
}

/// Indented listing: `+name` opens a directory and `--` closes it, files are
/// `-name <first cluster> <cluster count>`
fn render_tree(entries: &[TreeEntry]) -> String {
    if entries.len() <= 1 {
        return "Empty\n".to_string();
    }

    let mut out = String::new();
    let mut open_dirs: Vec<usize> = Vec::new();
    for entry in entries {
        close_dirs(&mut out, &mut open_dirs, entry.depth);
        out.push_str(&"\t".repeat(entry.depth));
        if entry.is_file {
            out.push_str(&format!(
                "-{} {} {}\n",
                entry.name, entry.cluster, entry.cluster_count
            ));
        } else {
            let name = if entry.depth == 0 { "ROOT" } else { &entry.name };
            out.push_str(&format!("+{name}\n"));
            open_dirs.push(entry.depth);
        }
    }
    close_dirs(&mut out, &mut open_dirs, 0);
    out
}

fn close_dirs(out: &mut String, open_dirs: &mut Vec<usize>, depth: usize) {
    while let Some(&open) = open_dirs.last() {
        if open < depth {
            break;
        }
        out.push_str(&"\t".repeat(open));
        out.push_str("--\n");
        open_dirs.pop();
    }
}
