// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Maps flags onto the loader's options.

use chainrun::config::LoadOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "chainrun")]
#[command(about = "Run a shell script on a host reached through a chain of SSH bastions")]
#[command(version)]
pub struct Cli {
    /// Comma-separated hops, in order; the script runs on the last one.
    /// Blank entries are skipped
    #[arg(long, value_name = "HOST[:PORT],...")]
    pub hosts: String,

    /// Path to the shell script to run
    #[arg(long, value_name = "PATH")]
    pub script: PathBuf,

    /// Path to the private key used for every hop
    #[arg(long, value_name = "PATH")]
    pub key: PathBuf,

    /// Login user for every hop
    #[arg(long)]
    pub user: String,

    /// Only parse and echo the script remotely (prepends `set -nv`)
    #[arg(long, visible_alias = "dry-run")]
    pub dryrun: bool,

    /// Prompt for the private key passphrase
    #[arg(long)]
    pub prompt: bool,

    /// TCP connect timeout for the first hop (e.g. 5s, 1500ms)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration, default_value = "5s")]
    pub timeout: Duration,

    /// Verify server keys against this OpenSSH known_hosts file
    #[arg(long, value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Accept only servers presenting this public key (repeatable)
    #[arg(long = "host-key", value_name = "PATH", conflicts_with = "known_hosts")]
    pub host_keys: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            hosts: self.hosts.clone(),
            script: self.script.clone(),
            key: self.key.clone(),
            user: self.user.clone(),
            dry_run: self.dryrun,
            prompt: self.prompt,
            timeout: self.timeout,
            known_hosts: self.known_hosts.clone(),
            host_keys: self.host_keys.clone(),
        }
    }
}
