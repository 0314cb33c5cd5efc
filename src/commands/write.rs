//! Write command implementation

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use swdflash_session::{Session, WriteProgress, WriteStats};

/// Progress reporter using indicatif progress bars
struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_bar(&mut self, total: u64, phase: &'static str) {
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                    phase
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl WriteProgress for IndicatifProgress {
    fn reading(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes as u64, "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_read as u64);
        }
    }

    fn erasing(&mut self, blocks: usize, bytes: usize) {
        self.finish("Read complete");
        self.create_spinner(format!("Erasing {} blocks ({} bytes)...", blocks, bytes));
    }

    fn erase_progress(&mut self, blocks_erased: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!("Erased {} blocks...", blocks_erased));
        }
    }

    fn writing(&mut self, bytes: usize) {
        self.finish("Erase complete");
        self.create_bar(bytes as u64, "Writing");
    }

    fn write_progress(&mut self, bytes_written: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_written as u64);
        }
    }

    fn complete(&mut self, stats: &WriteStats) {
        self.finish("Write complete");

        if !stats.flash_modified {
            println!("NVM already contains the image - no changes needed");
        } else {
            println!(
                "Smart write: {} bytes changed, {} blocks erased ({} bytes), {} bytes written",
                stats.bytes_changed, stats.erases_performed, stats.bytes_erased, stats.bytes_written
            );
        }
    }
}

/// Run the write command
pub fn run_write(
    session: &mut Session,
    input: &Path,
    addr: u32,
    do_verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::open(input)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    println!("Read {} bytes from {:?}", data.len(), input);

    let mut progress = IndicatifProgress::new();
    session.write_image(addr, &data, &mut progress)?;

    if do_verify {
        let pb = ProgressBar::new_spinner();
        pb.set_message("Verifying...");
        pb.enable_steady_tick(Duration::from_millis(100));
        let result = session.verify(addr, &data);
        pb.finish_and_clear();
        result?;
        println!("Verified {} bytes at 0x{:08x}", data.len(), addr);
    }

    println!("Write complete!");

    Ok(())
}
