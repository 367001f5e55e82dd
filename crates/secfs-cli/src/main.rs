#![deny(unsafe_code)]

//! `secfs`: mount an encrypted dataset as a regular directory.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use secfs_core::{MasterKey, StorageSession};
use tracing_subscriber::EnvFilter;

const MIN_PASSWORD_LEN: usize = 8;

/// Mount an encrypted secfs dataset as a directory
#[derive(Parser)]
#[command(name = "secfs")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Mount an existing dataset (creates one interactively if absent)
    secfs ~/secure-data /mnt/secure

    # Flush metadata every 2 seconds instead of the default 10
    secfs --flush-interval 2 ~/secure-data /mnt/secure
")]
struct Cli {
    /// Directory holding (or to hold) the encrypted dataset
    data_dir: PathBuf,

    /// Empty directory to mount the decrypted tree at
    mount_point: PathBuf,

    /// Seconds between background metadata flushes
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    flush_interval: u64,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let session = if StorageSession::exists(&cli.data_dir) {
        unlock_dataset(&cli)?
    } else {
        create_dataset(&cli)?
    };

    println!("Mounting at {} (Ctrl-C or unmount to stop)", cli.mount_point.display());
    secfs_fuse::mount(
        Arc::new(session),
        &cli.mount_point,
        Duration::from_secs(cli.flush_interval),
    )
    .context("mounting the filesystem")?;
    Ok(())
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Prompt for the password of an existing dataset until it verifies.
fn unlock_dataset(cli: &Cli) -> Result<StorageSession> {
    let dataset_iv = StorageSession::read_dataset_iv(&cli.data_dir)
        .context("reading the dataset IV")?;

    loop {
        let password = rpassword::prompt_password("Password: ")?;
        let key = MasterKey::derive(&password, &dataset_iv);
        if StorageSession::verify_key(&cli.data_dir, &key, &dataset_iv)? {
            return StorageSession::load(&cli.data_dir, key).context("loading the dataset");
        }
        eprintln!("Incorrect password, try again.");
    }
}

/// Interactively bootstrap a new dataset in an empty data directory.
fn create_dataset(cli: &Cli) -> Result<StorageSession> {
    print!(
        "No dataset found at {}. Create one? [y/N] ",
        cli.data_dir.display()
    );
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        bail!("aborted, no dataset created");
    }

    let password = loop {
        let password = rpassword::prompt_password("New password: ")?;
        if password.len() < MIN_PASSWORD_LEN {
            eprintln!("Password must be at least {MIN_PASSWORD_LEN} characters.");
            continue;
        }
        let confirmation = rpassword::prompt_password("Confirm password: ")?;
        if password != confirmation {
            eprintln!("Passwords do not match, try again.");
            continue;
        }
        break password;
    };

    let session =
        StorageSession::create(&cli.data_dir, &password).context("creating the dataset")?;
    println!("Dataset created. Keep the password safe: there is no recovery without it.");
    Ok(session)
}
