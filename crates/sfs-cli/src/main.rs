//! Command-line driver for the salvagefs toolkit.
//!
//! Thin wrappers over the library crates: open a volume session, run one
//! operation, print what it found, close. Human-readable output goes to
//! stdout by default; `--json` switches every command to pretty-printed
//! JSON for scripting.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use salvagefs::repair::{GroupScanReport, RepairMode, scan_descriptors};
use salvagefs::types::{BlockNumber, GroupNumber, InodeNumber, SectorNumber};
use salvagefs::{
    DirListing, DirWalkOptions, OpenOptions, Volume, list_directory, load_inode_table,
    scan_inode_table,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_logging()?;

    let (mut positional, globals) = split_args(std::env::args().skip(1))?;
    if positional.is_empty() {
        print_usage();
        return Ok(());
    }

    let command = positional.remove(0);
    let mut rest = positional.into_iter();

    let started = Instant::now();
    let outcome = match command.as_str() {
        "inspect" => {
            let Some(descriptor) = rest.next() else {
                bail!("inspect: missing volume descriptor");
            };
            cmd_inspect(&descriptor, &globals)
        }
        "groups" => {
            let Some(descriptor) = rest.next() else {
                bail!("groups: missing volume descriptor");
            };
            cmd_group_scan(&descriptor, &globals, RepairMode::Report)
        }
        "repair-groups" => {
            let Some(descriptor) = rest.next() else {
                bail!("repair-groups: missing volume descriptor");
            };
            cmd_group_scan(&descriptor, &globals, RepairMode::Apply)
        }
        "inode" => {
            let Some(descriptor) = rest.next() else {
                bail!("inode: missing volume descriptor");
            };
            let Some(raw) = rest.next() else {
                bail!("inode: missing inode number");
            };
            let ino = parse_u32(&raw, "inode number")?;
            cmd_inode(&descriptor, &globals, InodeNumber(ino))
        }
        "ls" => {
            let Some(descriptor) = rest.next() else {
                bail!("ls: missing volume descriptor");
            };
            cmd_ls(&descriptor, &globals, rest)
        }
        "dump-block" => {
            let Some(descriptor) = rest.next() else {
                bail!("dump-block: missing volume descriptor");
            };
            let Some(raw) = rest.next() else {
                bail!("dump-block: missing block number");
            };
            let block = parse_u64(&raw, "block number")?;
            cmd_dump_block(&descriptor, &globals, BlockNumber(block))
        }
        "check-itables" => {
            let Some(descriptor) = rest.next() else {
                bail!("check-itables: missing volume descriptor");
            };
            let group = match rest.next() {
                Some(raw) => Some(GroupNumber(parse_u32(&raw, "group number")?)),
                None => None,
            };
            cmd_check_itables(&descriptor, &globals, group)
        }
        "show-itable" => {
            let Some(descriptor) = rest.next() else {
                bail!("show-itable: missing volume descriptor");
            };
            let Some(raw) = rest.next() else {
                bail!("show-itable: missing group number");
            };
            let group = GroupNumber(parse_u32(&raw, "group number")?);
            cmd_show_itable(&descriptor, &globals, group)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    };

    if outcome.is_ok() {
        tracing::info!(
            target: "sfs::cli",
            command = %command,
            elapsed_ms = started.elapsed().as_millis(),
            "command_finished"
        );
    }
    outcome
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize logging: {err}"))
}

// ── Argument handling ───────────────────────────────────────────────────────

/// Options recognized anywhere on the command line.
#[derive(Debug, Default)]
struct GlobalOptions {
    superblock: Option<u64>,
    overlay: Option<PathBuf>,
    json: bool,
}

/// Separate global flags from positional arguments, in one pass so the
/// flags may appear before or after the command.
fn split_args(mut raw: impl Iterator<Item = String>) -> Result<(Vec<String>, GlobalOptions)> {
    let mut positional = Vec::new();
    let mut globals = GlobalOptions::default();

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--superblock" => {
                let Some(value) = raw.next() else {
                    bail!("--superblock requires a sector number");
                };
                globals.superblock = Some(parse_u64(&value, "superblock sector")?);
            }
            "--overlay" => {
                let Some(value) = raw.next() else {
                    bail!("--overlay requires a file path");
                };
                globals.overlay = Some(PathBuf::from(value));
            }
            "--json" => globals.json = true,
            _ => positional.push(arg),
        }
    }

    Ok((positional, globals))
}

fn parse_u32(raw: &str, what: &str) -> Result<u32> {
    raw.parse::<u32>()
        .with_context(|| format!("not a {what}: {raw}"))
}

fn parse_u64(raw: &str, what: &str) -> Result<u64> {
    raw.parse::<u64>()
        .with_context(|| format!("not a {what}: {raw}"))
}

// ── Session plumbing ────────────────────────────────────────────────────────

fn open_session(descriptor: &str, globals: &GlobalOptions) -> Result<Volume> {
    let mut options = OpenOptions::default();
    if let Some(sector) = globals.superblock {
        options.superblock_sector = SectorNumber(sector);
    }
    options.overlay_path = globals.overlay.clone();
    Volume::open_with_options(descriptor, &options)
        .with_context(|| format!("failed to open volume session on {descriptor}"))
}

fn close_session(volume: Volume) -> Result<()> {
    volume.close().context("failed to close volume session")
}

// ── inspect ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct InspectOutput {
    backend: String,
    magic_ok: bool,
    block_size: u32,
    groups: u32,
    degraded_geometry: bool,
    sparse_super: bool,
    inodes_count: u32,
    blocks_count: u32,
    free_blocks: u32,
    free_inodes: u32,
    first_data_block: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    inode_size: u16,
    first_ino: u32,
    rev_level: u32,
    state: u16,
    mnt_count: u16,
    max_mnt_count: u16,
    uuid: String,
    volume_name: String,
    last_mounted: String,
    feature_compat: String,
    feature_incompat: String,
    feature_ro_compat: String,
    journal_inum: u32,
    last_orphan: u32,
}

fn cmd_inspect(descriptor: &str, globals: &GlobalOptions) -> Result<()> {
    let volume = open_session(descriptor, globals)?;
    let model = volume.model();
    let sb = volume.superblock();

    let output = InspectOutput {
        backend: volume.disk().backend_name().to_string(),
        magic_ok: sb.magic_matches(),
        block_size: model.block_size.get(),
        groups: model.groups_count,
        degraded_geometry: model.degraded_geometry,
        sparse_super: sb.has_sparse_super(),
        inodes_count: sb.inodes_count,
        blocks_count: sb.blocks_count,
        free_blocks: sb.free_blocks_count,
        free_inodes: sb.free_inodes_count,
        first_data_block: sb.first_data_block,
        blocks_per_group: sb.blocks_per_group,
        inodes_per_group: sb.inodes_per_group,
        inode_size: sb.inode_size,
        first_ino: sb.first_ino,
        rev_level: sb.rev_level,
        state: sb.state,
        mnt_count: sb.mnt_count,
        max_mnt_count: sb.max_mnt_count,
        uuid: hex::encode(sb.uuid),
        volume_name: sb.volume_name.clone(),
        last_mounted: sb.last_mounted.clone(),
        feature_compat: sb.feature_compat.to_string(),
        feature_incompat: sb.feature_incompat.to_string(),
        feature_ro_compat: sb.feature_ro_compat.to_string(),
        journal_inum: sb.journal_inum,
        last_orphan: sb.last_orphan,
    };

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("backend:           {}", output.backend);
        println!(
            "magic:             {}",
            if output.magic_ok { "ok" } else { "MISMATCH" }
        );
        println!("block size:        {}", output.block_size);
        println!(
            "groups:            {}{}",
            output.groups,
            if output.degraded_geometry {
                " (degraded geometry)"
            } else {
                ""
            }
        );
        println!("sparse_super:      {}", output.sparse_super);
        println!(
            "inodes:            {} total, {} free",
            output.inodes_count, output.free_inodes
        );
        println!(
            "blocks:            {} total, {} free",
            output.blocks_count, output.free_blocks
        );
        println!("first data block:  {}", output.first_data_block);
        println!("blocks per group:  {}", output.blocks_per_group);
        println!("inodes per group:  {}", output.inodes_per_group);
        println!(
            "inode size:        {} (first usable inode {})",
            output.inode_size, output.first_ino
        );
        println!(
            "revision:          {} (state 0x{:x}, mounted {}/{})",
            output.rev_level, output.state, output.mnt_count, output.max_mnt_count
        );
        println!("uuid:              {}", output.uuid);
        println!("volume name:       {:?}", output.volume_name);
        println!("last mounted:      {:?}", output.last_mounted);
        println!("compat features:   {}", output.feature_compat);
        println!("incompat features: {}", output.feature_incompat);
        println!("ro-compat:         {}", output.feature_ro_compat);
        if output.journal_inum != 0 {
            println!("journal inode:     {}", output.journal_inum);
        }
        if output.last_orphan != 0 {
            println!("orphan list head:  {}", output.last_orphan);
        }
    }

    close_session(volume)
}

// ── groups / repair-groups ──────────────────────────────────────────────────

fn cmd_group_scan(descriptor: &str, globals: &GlobalOptions, mode: RepairMode) -> Result<()> {
    if mode == RepairMode::Apply {
        eprintln!("repair-groups stages descriptor rewrites in the session overlay.");
        eprintln!("The backing media is never written; pass --overlay <path> to keep");
        eprintln!("the staged sectors as a sidecar for later sessions.");
    }

    let mut volume = open_session(descriptor, globals)?;
    let report = scan_descriptors(&mut volume, mode)?;

    print_group_report(&report, globals.json)?;
    close_session(volume)
}

fn print_group_report(report: &GroupScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for finding in &report.findings {
        println!("{finding}");
    }
    println!("{report}");
    Ok(())
}

// ── inode ───────────────────────────────────────────────────────────────────

fn cmd_inode(descriptor: &str, globals: &GlobalOptions, ino: InodeNumber) -> Result<()> {
    let volume = open_session(descriptor, globals)?;
    let record = volume.read_inode(ino)?;

    if globals.json {
        #[derive(Serialize)]
        struct InodeOutput<'r> {
            ino: u32,
            reserved_label: Option<&'static str>,
            record: &'r salvagefs::ondisk::Ext2Inode,
        }
        let output = InodeOutput {
            ino: ino.0,
            reserved_label: ino.reserved_label(),
            record: &record,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match ino.reserved_label() {
            Some(label) => println!("inode {ino} ({label})"),
            None => println!("inode {ino}"),
        }
        println!("  kind:        {}", record.file_type());
        println!("  mode:        {:06o}", record.mode);
        println!("  uid/gid:     {}/{}", record.uid, record.gid);
        println!("  size:        {}", record.size64());
        println!("  links:       {}", record.links_count);
        println!("  blocks:      {} sectors", record.blocks);
        println!("  flags:       {}", record.flags);
        println!(
            "  times:       atime {} ctime {} mtime {} dtime {}",
            record.atime, record.ctime, record.mtime, record.dtime
        );
        println!("  generation:  {}", record.generation);
        println!(
            "  acl/faddr:   file_acl {} dir_acl {} faddr {}",
            record.file_acl, record.dir_acl, record.faddr
        );
        println!("  pointers:    {:?}", record.block);
        if let Some(reason) = record.looks_bogus() {
            println!("  BOGUS:       {reason}");
        } else if record.suspicious_links() {
            println!("  suspicious:  links count above the plausible ceiling");
        }
    }

    close_session(volume)
}

// ── ls ──────────────────────────────────────────────────────────────────────

fn cmd_ls(
    descriptor: &str,
    globals: &GlobalOptions,
    mut rest: impl Iterator<Item = String>,
) -> Result<()> {
    let mut options = DirWalkOptions::default();
    let mut inodes = Vec::new();

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-R" => options.recursive = true,
            "--max-depth" => {
                let Some(value) = rest.next() else {
                    bail!("--max-depth requires a depth");
                };
                options.max_depth = parse_u32(&value, "depth")?;
            }
            other => inodes.push(InodeNumber(parse_u32(other, "ls inode number")?)),
        }
    }
    if inodes.is_empty() {
        inodes.push(InodeNumber::ROOT);
    }

    let volume = open_session(descriptor, globals)?;

    if globals.json {
        #[derive(Serialize)]
        struct LsOutput {
            ino: u32,
            listing: DirListing,
        }
        let mut outputs = Vec::new();
        for ino in inodes {
            let listing = list_directory(&volume, ino, options)?;
            outputs.push(LsOutput {
                ino: ino.0,
                listing,
            });
        }
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        for ino in inodes {
            let listing = list_directory(&volume, ino, options)?;
            println!("inode {ino}:");
            for row in &listing.rows {
                let indent = "  ".repeat(row.depth as usize + 1);
                if row.is_padding {
                    println!("{indent}--- {:>8} {:>5} (padding)", "", row.rec_len);
                } else {
                    println!(
                        "{indent}{} {:>8} {:>5} {}",
                        row.kind.tag(),
                        row.inode,
                        row.rec_len,
                        row.name
                    );
                }
            }
            if listing.corrupt_blocks != 0 {
                println!("  ({} corrupt directory blocks skipped)", listing.corrupt_blocks);
            }
            if listing.skipped_subdirs != 0 {
                println!("  ({} unwalkable subdirectories skipped)", listing.skipped_subdirs);
            }
        }
    }

    close_session(volume)
}

// ── dump-block ──────────────────────────────────────────────────────────────

fn cmd_dump_block(descriptor: &str, globals: &GlobalOptions, block: BlockNumber) -> Result<()> {
    let volume = open_session(descriptor, globals)?;
    let mut buf = volume.block_buffer();
    volume
        .read_block(block, &mut buf)
        .with_context(|| format!("failed to read block {block}"))?;

    if globals.json {
        #[derive(Serialize)]
        struct DumpOutput {
            block: u64,
            hex: String,
        }
        let output = DumpOutput {
            block: block.0,
            hex: hex::encode(&buf),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&buf)
            .with_context(|| format!("failed to write block {block} to stdout"))?;
        stdout.flush().context("failed to flush stdout")?;
    }

    close_session(volume)
}

// ── check-itables / show-itable ─────────────────────────────────────────────

fn cmd_check_itables(
    descriptor: &str,
    globals: &GlobalOptions,
    group: Option<GroupNumber>,
) -> Result<()> {
    let volume = open_session(descriptor, globals)?;

    let groups: Vec<GroupNumber> = match group {
        Some(one) => vec![one],
        None => (0..volume.model().groups_count).map(GroupNumber).collect(),
    };

    let mut reports = Vec::new();
    for group in groups {
        reports.push(scan_inode_table(&volume, group)?);
    }

    if globals.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let mut total_scanned: u64 = 0;
        let mut total_bogus: u64 = 0;
        for report in &reports {
            println!("{report}");
            for tally in &report.per_block {
                if tally.bogus != 0 {
                    println!("  {tally}");
                }
            }
            total_scanned += u64::from(report.inodes_scanned);
            total_bogus += u64::from(report.bogus_count);
        }
        println!("total: {total_scanned} inodes scanned, {total_bogus} bogus");
    }

    close_session(volume)
}

fn cmd_show_itable(descriptor: &str, globals: &GlobalOptions, group: GroupNumber) -> Result<()> {
    let volume = open_session(descriptor, globals)?;
    let records = load_inode_table(&volume, group)?;

    if globals.json {
        #[derive(Serialize)]
        struct RecordOutput<'r> {
            ino: u32,
            record: &'r salvagefs::ondisk::Ext2Inode,
        }
        let outputs: Vec<RecordOutput<'_>> = records
            .iter()
            .map(|(ino, record)| RecordOutput {
                ino: ino.0,
                record,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        for (ino, record) in &records {
            let mut line = format!(
                "{:>8} {} mode {:06o} links {:>5} size {:>12}",
                ino.0,
                record.file_type().tag(),
                record.mode,
                record.links_count,
                record.size64()
            );
            if let Some(reason) = record.looks_bogus() {
                line.push_str("  BOGUS: ");
                line.push_str(reason);
            } else if record.suspicious_links() {
                line.push_str("  (suspicious links)");
            }
            println!("{line}");
        }
    }

    close_session(volume)
}

// ── Usage ───────────────────────────────────────────────────────────────────

fn print_usage() {
    println!("sfs: forensic recovery toolkit for damaged ext2 volumes");
    println!();
    println!("USAGE:");
    println!("  sfs inspect <descriptor>                  decode and print the superblock");
    println!("  sfs groups <descriptor>                   verify group descriptor pointers");
    println!("  sfs repair-groups <descriptor>            stage fixes for misdirected pointers");
    println!("  sfs inode <descriptor> <ino>              decode one inode record");
    println!("  sfs ls <descriptor> [ino...] [-R] [--max-depth N]");
    println!("                                            list directories (default inode 2)");
    println!("  sfs dump-block <descriptor> <block>       write one block's bytes to stdout");
    println!("  sfs check-itables <descriptor> [group]    tally bogus inode records");
    println!("  sfs show-itable <descriptor> <group>      print one group's inode table");
    println!();
    println!("VOLUME DESCRIPTORS:");
    println!("  simple:<path>   flat image file, read-only");
    println!("  raid:           reassembled RAID5 member set at the default loop devices");
    println!();
    println!("GLOBAL OPTIONS:");
    println!("  --superblock <sector>   read the superblock from this sector instead of 2");
    println!("  --overlay <path>        import/export staged sectors as a sidecar file");
    println!("  --json                  machine-readable output");
}
