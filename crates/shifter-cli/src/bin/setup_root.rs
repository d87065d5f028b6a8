//! `setupRoot [-u user] [-U uid] [-G gid] [-s sshpubkey] [-N nodespec]
//! [-v volume]... <type> <identifier>` — builds the UDI (C5) and commits
//! it. Exit 0 on `Committed`, non-zero otherwise.

use anyhow::{Context, Result};
use clap::Parser;

use libshifter::rootfs::{self, BuildRequest};
use libshifter::syscall::LinuxSyscall;
use shifter_cli::common;
use shifter_image::{manifest_path, ImageDescriptor, ImageType, ManifestRecord, NullGatewayClient};

#[derive(Parser, Debug)]
#[command(name = "setupRoot", version, about = "Stage a user-defined image (UDI) at the site's UDI mount point")]
struct Opts {
    /// Target username the UDI's identity files are generated for.
    #[arg(short = 'u', long = "user")]
    username: Option<String>,

    /// Target uid; defaults to the caller's real uid.
    #[arg(short = 'U', long = "uid")]
    uid: Option<u32>,

    /// Target gid; defaults to the caller's real gid.
    #[arg(short = 'G', long = "gid")]
    gid: Option<u32>,

    /// SSH public key installed into the UDI's authorized_keys.
    #[arg(short = 's', long = "ssh-pubkey")]
    ssh_pubkey: Option<String>,

    /// Space-separated `host/k` node-spec tokens for `/etc/hosts`.
    #[arg(short = 'N', long = "node-spec")]
    node_spec: Option<String>,

    /// `src:dst[:flags]` volume mapping; repeatable, joined with `;`.
    #[arg(short = 'v', long = "volume")]
    volume: Vec<String>,

    /// Image type: docker, custom, id, local, or scratch.
    image_type: String,

    /// Image identifier, interpretation depends on `image_type`.
    image_identifier: String,
}

fn main() {
    common::init_logging();
    common::run_and_exit(body);
}

fn body() -> Result<()> {
    let opts = Opts::parse();
    common::require_effective_root()?;

    let config = common::load_config(&common::config_path())?;

    let image_type = ImageType::parse(&opts.image_type)
        .with_context(|| format!("unrecognized image type {:?}", opts.image_type))?;
    let requested = ImageDescriptor::new(image_type, opts.image_identifier.clone());
    let resolved = shifter_image::resolve(&requested, &NullGatewayClient, config.allow_local_chroot)
        .context("image descriptor resolution failed")?;

    let manifest = if matches!(resolved.image_type, ImageType::Scratch) {
        ManifestRecord::default()
    } else {
        let path = manifest_path(&config.image_base_path, &resolved.identifier);
        ManifestRecord::load(&path).with_context(|| format!("failed to load manifest at {path:?}"))?
    };

    let caller = libshifter::credentials::CallerIdentity::capture()
        .context("failed to capture caller identity")?;

    let uid = opts.uid.unwrap_or_else(|| caller.uid.as_raw());
    let gid = opts.gid.unwrap_or_else(|| caller.gid.as_raw());
    let username = opts.username.unwrap_or_else(|| uid.to_string());

    let request = BuildRequest {
        descriptor: resolved,
        username,
        uid,
        gid,
        ssh_pubkey: opts.ssh_pubkey,
        node_spec: opts.node_spec,
        volume_spec: if opts.volume.is_empty() { None } else { Some(opts.volume.join(";")) },
    };

    let commit = rootfs::build(&config, &manifest, &request, &LinuxSyscall)
        .context("setupRoot failed; UDI was rolled back")?;

    tracing::info!(
        udi_mount_point = %config.udi_mount_point.display(),
        image = %commit.image_identifier,
        uid = commit.uid,
        gid = commit.gid,
        "UDI committed"
    );
    Ok(())
}
