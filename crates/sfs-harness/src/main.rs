#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use sfs_harness::{
    ImageBuilder, extract_region, extract_superblock, scatter_into_members,
    validate_dir_block_fixture, validate_inode_fixture, validate_superblock_fixture,
};
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
        Some("check-fixtures") => check_fixtures(),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("build-image") => build_image(&args[1..]),
        Some("split-raid") => split_raid(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn check_fixtures() -> Result<()> {
    let dir = Path::new("conformance/fixtures");
    let sb = validate_superblock_fixture(&dir.join("ext2_superblock_sparse.json"))?;
    let inode = validate_inode_fixture(&dir.join("ext2_inode_regular_file.json"))?;
    let entries = validate_dir_block_fixture(&dir.join("ext2_dir_block.json"))?;

    println!(
        "superblock: volume={:?} blocks={} magic_ok={}",
        sb.volume_name,
        sb.blocks_count,
        sb.magic_matches()
    );
    println!("inode: kind={} size={}", inode.file_type(), inode.size64());
    println!("dir block: {} entries", entries.len());
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: sfs-harness generate-fixture <image> [superblock|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("superblock", String::as_str);
    let fixture = match kind {
        "superblock" => extract_superblock(&image_data)?,
        "region" => {
            let offset: usize = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&image_data, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

fn build_image(args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("usage: sfs-harness build-image <path>");
    };
    let image = ImageBuilder::two_groups().finish();
    fs::write(path, &image).with_context(|| format!("failed to write {path}"))?;
    println!("wrote {} bytes to {path}", image.len());
    Ok(())
}

fn split_raid(args: &[String]) -> Result<()> {
    let (Some(image_path), Some(out_dir)) = (args.first(), args.get(1)) else {
        bail!("usage: sfs-harness split-raid <image> <out-dir>");
    };

    let image = fs::read(image_path).with_context(|| format!("failed to read {image_path}"))?;
    let members = scatter_into_members(&image)?;

    let out = Path::new(out_dir);
    fs::create_dir_all(out).with_context(|| format!("failed to create {out_dir}"))?;
    for (index, member) in members.iter().enumerate() {
        let path = out.join(format!("member{index}.img"));
        fs::write(&path, member)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {} bytes to {}", member.len(), path.display());
    }
    Ok(())
}

fn print_usage() {
    println!("sfs-harness: fixture and test-image tooling");
    println!();
    println!("USAGE:");
    println!("  sfs-harness check-fixtures");
    println!("  sfs-harness generate-fixture <image> [superblock|region <offset> <len>]");
    println!("  sfs-harness build-image <path>");
    println!("  sfs-harness split-raid <image> <out-dir>");
    println!();
    println!("FIXTURE GENERATION:");
    println!("  Extracts sparse JSON fixtures from real volume images. The default");
    println!("  mode cuts out the primary superblock sector; 'region' cuts any byte");
    println!("  range for descriptors, inode records, or directory blocks.");
    println!();
    println!("TEST IMAGES:");
    println!("  build-image writes the standard two-group volume. split-raid scatters");
    println!("  a flat image into member0/1/2.img for the raid: backend, for example");
    println!("  behind loop devices.");
}
