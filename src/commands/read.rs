//! Read command implementation

use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use swdflash_session::Session;

/// Default chunk size for reading (4 KiB)
const READ_CHUNK_SIZE: usize = 4096;

/// Run the read command
pub fn run_read(
    session: &mut Session,
    output: &Path,
    addr: u32,
    len: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_with_progress(session, addr, len as usize)?;

    let mut file = File::create(output)?;
    file.write_all(&data)?;

    println!("Wrote {} bytes to {:?}", data.len(), output);

    Ok(())
}

/// Read target memory with a progress bar
fn read_with_progress(
    session: &mut Session,
    addr: u32,
    total_size: usize,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut data = vec![0u8; total_size];

    let pb = ProgressBar::new(total_size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );

    for (n, chunk) in data.chunks_mut(READ_CHUNK_SIZE).enumerate() {
        let offset = n * READ_CHUNK_SIZE;
        session.read(addr + offset as u32, chunk)?;
        pb.set_position((offset + chunk.len()) as u64);
    }

    pb.finish_with_message("Read complete");
    Ok(data)
}
