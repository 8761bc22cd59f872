use std::io::{Read, Write};
use std::ops::ControlFlow;

use anyhow::Context;
use colored::Colorize;

use secstore_sdk::{SecStore, SecStoreConfig};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;
    match cli.command {
        Command::Write(args) => cmd_write(&store, args),
        Command::Read(args) => cmd_read(&store, args),
        Command::Rm(args) => {
            store.delete(&args.path)?;
            println!("{} Deleted {}", "✓".green().bold(), args.path.yellow());
            Ok(())
        }
        Command::Size(args) => {
            let size = store.get_size(&args.path)?;
            println!("{} {}", size.to_string().bold(), args.path);
            Ok(())
        }
        Command::Ls(args) => cmd_ls(&store, args),
        Command::Space => cmd_space(&store),
        Command::Cp(args) => {
            store.copy(&args.dest, &args.src)?;
            println!("{} Copied {} → {}", "✓".green().bold(), args.src.yellow(), args.dest.yellow());
            Ok(())
        }
        Command::Mv(args) => {
            store.move_to(&args.dest, &args.src)?;
            println!("{} Moved {} → {}", "✓".green().bold(), args.src.yellow(), args.dest.yellow());
            Ok(())
        }
        Command::CopyMeta(args) => {
            store.copy_meta_to(&args.path)?;
            println!("{} Meta data exported to {}", "✓".green().bold(), args.path.yellow());
            Ok(())
        }
        Command::Verify => cmd_verify(&store),
        Command::Reinit => cmd_reinit(&store),
        Command::Digest(args) => {
            let digest = store.subtree_digest(&args.path)?;
            println!("{} {}", digest.to_hex().cyan(), args.path);
            Ok(())
        }
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<SecStore> {
    let config = match &cli.config {
        Some(path) => SecStoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SecStoreConfig::filesystem(&cli.root, cli.capacity),
    };
    SecStore::open(&config).context("opening secure storage")
}

fn cmd_write(store: &SecStore, args: WriteArgs) -> anyhow::Result<()> {
    let data = match (args.value, args.file) {
        (Some(value), _) => value.into_bytes(),
        (None, Some(file)) => {
            std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?
        }
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            buf
        }
    };
    store.write(&args.path, &data)?;
    println!(
        "{} Wrote {} bytes to {}",
        "✓".green().bold(),
        data.len(),
        args.path.yellow()
    );
    Ok(())
}

fn cmd_read(store: &SecStore, args: ReadArgs) -> anyhow::Result<()> {
    let data = store.read_to_vec(&args.path)?;
    match args.out {
        Some(out) => {
            std::fs::write(&out, &data).with_context(|| format!("writing {}", out.display()))?;
            println!("{} {} bytes → {}", "✓".green().bold(), data.len(), out.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_ls(store: &SecStore, args: OptionalPathArg) -> anyhow::Result<()> {
    let count = store.get_entries(&args.path, |name, is_leaf| {
        if is_leaf {
            println!("  {name}");
        } else {
            println!("  {}/", name.blue().bold());
        }
        ControlFlow::Continue(())
    })?;
    if count == 0 {
        println!("{}", "(empty)".dimmed());
    }
    Ok(())
}

fn cmd_space(store: &SecStore) -> anyhow::Result<()> {
    let stats = store.get_total_space()?;
    println!("Total: {} bytes", stats.total.to_string().bold());
    println!("Used:  {} bytes", stats.used());
    println!("Free:  {} bytes", stats.free.to_string().green());
    Ok(())
}

fn cmd_verify(store: &SecStore) -> anyhow::Result<()> {
    let report = store.verify()?;
    if report.is_clean() {
        println!("{} Integrity verified (root {})", "✓".green().bold(), report.expected_root.short_hex().cyan());
        return Ok(());
    }
    println!("{} {}", "✗".red().bold(), report);
    for path in &report.modified {
        println!("  {} {}", "modified:".yellow(), path);
    }
    for path in &report.missing {
        println!("  {} {}", "missing:".red(), path);
    }
    for path in &report.unexpected {
        println!("  {} {}", "unexpected:".blue(), path);
    }
    anyhow::bail!("integrity check failed with {} issue(s)", report.issue_count())
}

fn cmd_reinit(store: &SecStore) -> anyhow::Result<()> {
    let event = store.try_reinit()?;
    println!("{} Meta data rebuilt", "✓".green().bold());
    println!("  Root:   {}", event.digest.to_hex().cyan());
    println!("  Leaves: {}", event.leaf_count);
    println!("  At:     {}", event.completed_at.to_rfc3339());
    Ok(())
}
