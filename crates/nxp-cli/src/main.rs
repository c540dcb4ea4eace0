#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use nxp_layout::{StructLayout, apfs};
use nxp_ondisk::scan_volumes;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        // Bare invocation keeps the original contract: one line, the
        // decimal offset of apfs_role within apfs_superblock.
        None => {
            println!("{}", apfs::apfs_superblock().offset_of("apfs_role")?);
            Ok(())
        }
        Some("offset") => {
            let [structure, field] = require_args::<2>(&args[1..], "offset <struct> <field>")?;
            let layout = apfs::find(structure)?;
            println!("{}", layout.offset_of(field)?);
            Ok(())
        }
        Some("layout") => {
            let Some(structure) = args.get(1) else {
                bail!("usage: nxp layout <struct> [--json]");
            };
            let json = args.iter().any(|arg| arg == "--json");
            print_layout(&apfs::find(structure)?, json)
        }
        Some("structs") => {
            for layout in apfs::registry() {
                println!("{:<28} {:>5} bytes", layout.name(), layout.size());
            }
            Ok(())
        }
        Some("inspect") => {
            let Some(path) = args.get(1) else {
                bail!("usage: nxp inspect <image> [--json]");
            };
            let json = args.iter().any(|arg| arg == "--json");
            inspect(Path::new(path), json)
        }
        Some("--help" | "-h" | "help") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn require_args<'a, const N: usize>(args: &'a [String], usage: &str) -> Result<[&'a str; N]> {
    if args.len() != N {
        bail!("usage: nxp {usage}");
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}

fn print_usage() {
    println!("nxp: APFS on-disk layout and container inspector\n");
    println!("USAGE:");
    println!("  nxp                          print the offset of apfs_role in apfs_superblock");
    println!("  nxp offset <struct> <field>  print the offset of a field");
    println!("  nxp layout <struct> [--json] print the full field table of a structure");
    println!("  nxp structs                  list the registered structures");
    println!("  nxp inspect <image> [--json] enumerate the volumes of a container image");
}

fn print_layout(layout: &StructLayout, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(layout).context("serialize layout")?
        );
        return Ok(());
    }

    println!(
        "{} ({} bytes, align {})",
        layout.name(),
        layout.size(),
        layout.align()
    );
    for field in layout.fields() {
        println!("  {:>5}  {:>5}  {}", field.offset, field.size, field.name);
    }
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let image =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let report = scan_volumes(&image)
        .with_context(|| format!("failed to scan {} as an APFS container", path.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
        return Ok(());
    }

    println!("container: {}", report.uuid);
    println!("block_size: {}", report.block_size);
    println!("block_count: {}", report.block_count);
    println!("checkpoint_xid: {}", report.checkpoint_xid);
    println!("volumes: {}", report.volumes.len());
    for volume in &report.volumes {
        println!();
        println!("  name: {}", volume.name);
        println!("  uuid: {}", volume.uuid);
        if let Some(group) = &volume.volume_group_id {
            println!("  volume_group: {group}");
        }
        println!("  role: {}", volume.role);
        println!("  files: {}", volume.num_files);
        println!("  directories: {}", volume.num_directories);
        println!("  snapshots: {}", volume.num_snapshots);
    }
    Ok(())
}
