//! Man pages for swdflash
//!
//! Renders `swdflash.1` plus one `swdflash-<command>.1` page per
//! subcommand, the layout `man swdflash-write` expects.

use clap::{CommandFactory, Parser};
use std::fs;
use std::io;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

#[derive(Parser)]
#[command(name = "gen-manpage", about = "Render the swdflash man pages")]
struct Args {
    /// Directory the pages are written to
    #[arg(default_value = "man")]
    out_dir: PathBuf,

    /// Only render the top-level page
    #[arg(long)]
    no_subcommands: bool,
}

/// Render the top-level page and, unless `top_only`, one per subcommand
///
/// Subcommand pages are titled `<bin>-<command>`.
fn render_pages(cmd: clap::Command, top_only: bool) -> io::Result<Vec<(String, Vec<u8>)>> {
    let cmd = cmd.disable_help_subcommand(true);
    let name = cmd.get_name().to_string();

    let mut pages = Vec::new();
    let mut page = Vec::new();
    clap_mangen::Man::new(cmd.clone()).render(&mut page)?;
    pages.push((format!("{}.1", name), page));

    if top_only {
        return Ok(pages);
    }
    for sub in cmd.get_subcommands() {
        let full = format!("{}-{}", name, sub.get_name());
        let sub = sub
            .clone()
            .display_name(full.clone())
            .bin_name(full.clone());
        let mut page = Vec::new();
        clap_mangen::Man::new(sub).render(&mut page)?;
        pages.push((format!("{}.1", full), page));
    }
    Ok(pages)
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    fs::create_dir_all(&args.out_dir)?;

    for (file, page) in render_pages(cli::Cli::command(), args.no_subcommands)? {
        let path = args.out_dir.join(file);
        fs::write(&path, page)?;
        println!("{}", path.display());
    }
    Ok(())
}
