use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use tokio::sync::mpsc;

use crate::bytes::compress_folder;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::networking::connect_to_relay;
use crate::password::TransferPassword;
use crate::protocol::{Role, TransferMetadata};
use crate::sender::Sender;
use crate::session::{CloseSignal, DataSource, Progress};

/// Function handler to kick off sender logic:
///     - Generate a single-use transfer password to share with the receiver
///     - Open the file, or compress the folder into an in-memory archive
///     - Join the relay slot and wait for the receiver to pair
///     - Run the sender engine, rendering progress as chunks go out
pub async fn run(file_path: &str, config: &Config) -> Result<()> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(Error::Usage(format!("path does not exist: {}", file_path)));
    }

    let password = TransferPassword::generate();
    println!("Transfer password: \x1b[4m\x1b[1m{}\x1b[0m", password);
    println!("On the receiving computer run: tran receive {}", password);

    // Build the payload stream before pairing so compression time does not
    // eat into the pairing window.
    let (payload, metadata) = open_payload(path, file_path)?;
    debug!(
        "payload ready: {} ({} bytes, folder: {})",
        metadata.filename, metadata.payload_size, metadata.is_folder
    );

    debug!("connecting to relay at {}", config.relay_addr);
    let (reader, writer) =
        connect_to_relay(&config.relay_addr, password.slot(), Role::Sender).await?;
    println!("Paired with receiver, starting transfer");

    let close = CloseSignal::new();
    let ctrl_close = close.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_close.trigger();
        }
    });

    let (progress_tx, progress_rx) = mpsc::channel::<Progress>(64);
    let total = metadata.payload_size;
    let bar_task = tokio::spawn(render_progress(progress_rx, total));

    let sender = Sender::new(password, payload, metadata, progress_tx, close);
    let result = sender.run(reader, writer).await;
    let _ = bar_task.await;
    result?;

    println!("Transfer complete!");
    Ok(())
}

fn open_payload(path: &Path, file_path: &str) -> Result<(DataSource, TransferMetadata)> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string());

    if fs::metadata(path)?.is_dir() {
        let spinner = ProgressBar::new_spinner();
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message("Compressing folder");

        let zip_data = compress_folder(path)?;
        let payload_size = zip_data.len() as u64;
        spinner.finish_with_message("Folder compressed");

        Ok((
            Box::new(Cursor::new(zip_data)),
            TransferMetadata {
                filename,
                payload_size,
                is_folder: true,
            },
        ))
    } else {
        let file = File::open(path)?;
        let payload_size = file.metadata()?.len();

        Ok((
            Box::new(file),
            TransferMetadata {
                filename,
                payload_size,
                is_folder: false,
            },
        ))
    }
}

async fn render_progress(mut rx: mpsc::Receiver<Progress>, total: u64) {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap(),
    );
    while let Some(progress) = rx.recv().await {
        bar.set_position(progress.bytes);
    }
    bar.finish_and_clear();
}
