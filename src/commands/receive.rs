use std::io::Write;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::bytes::{create_file_bufwriter, decompress_folder};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::networking::connect_to_relay;
use crate::password::{prompt_for_password, TransferPassword};
use crate::protocol::{Role, TransferMetadata};
use crate::receiver::Receiver;
use crate::session::{CloseSignal, Progress};

/// Function handler to kick off receiver logic:
///     - Parse the transfer password (or prompt for it)
///     - Join the relay slot and pair with the waiting sender
///     - Run the receiver engine in one task and the file/folder writer in
///       another, connected by a channel of decrypted chunks
pub async fn run(password: Option<String>, config: &Config) -> Result<()> {
    let password = match password {
        Some(raw) => TransferPassword::parse(&raw)?,
        None => prompt_for_password()?,
    };
    debug!("using slot {}", password.slot());

    debug!("connecting to relay at {}", config.relay_addr);
    let (reader, writer) =
        connect_to_relay(&config.relay_addr, password.slot(), Role::Receiver).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Waiting for the sender handshake");

    let close = CloseSignal::new();
    let ctrl_close = close.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_close.trigger();
        }
    });

    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(100);
    let (metadata_tx, metadata_rx) = oneshot::channel::<TransferMetadata>();
    let (progress_tx, progress_rx) = mpsc::channel::<Progress>(64);

    let receiver = Receiver::new(password, chunk_tx, metadata_tx, progress_tx, close);
    let engine = tokio::spawn(receiver.run(reader, writer));

    // The writer task needs the advertised name and size before the first
    // chunk lands.
    let metadata = match metadata_rx.await {
        Ok(metadata) => metadata,
        Err(_) => {
            spinner.finish_and_clear();
            return match engine.await {
                Ok(Ok(())) => Err(Error::Protocol(
                    "transfer ended before the sender handshake".into(),
                )),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Protocol(format!("engine task failed: {}", e))),
            };
        }
    };
    spinner.finish_and_clear();
    println!(
        "Receiving {} ({} bytes)",
        metadata.filename, metadata.payload_size
    );

    let bar_task = tokio::spawn(render_progress(progress_rx, metadata.payload_size));
    let writer_task = if metadata.is_folder {
        tokio::spawn(write_folder(chunk_rx, metadata))
    } else {
        tokio::spawn(write_file(chunk_rx, metadata))
    };

    let engine_result = engine
        .await
        .map_err(|e| Error::Protocol(format!("engine task failed: {}", e)))?;
    let writer_result = writer_task
        .await
        .map_err(|e| Error::Protocol(format!("writer task failed: {}", e)))?;
    let _ = bar_task.await;

    engine_result?;
    writer_result?;

    println!("Transfer complete!");
    Ok(())
}

/// Drain decrypted chunks into the output file, chunk by chunk.
async fn write_file(mut rx: mpsc::Receiver<Vec<u8>>, metadata: TransferMetadata) -> Result<()> {
    let output = format!("new_{}", metadata.filename);
    debug!("writing to file: {}", output);

    let mut writer = create_file_bufwriter(Path::new(&output))?;
    let mut total_bytes: u64 = 0;
    while let Some(chunk) = rx.recv().await {
        total_bytes += chunk.len() as u64;
        writer.write_all(&chunk)?;
    }
    writer.flush()?;

    debug!("flushed {} bytes", total_bytes);
    println!("File saved: {}", output);
    Ok(())
}

/// Collect the whole archive, then unpack it into the output folder.
async fn write_folder(mut rx: mpsc::Receiver<Vec<u8>>, metadata: TransferMetadata) -> Result<()> {
    let mut zip_data = Vec::new();
    while let Some(chunk) = rx.recv().await {
        zip_data.extend_from_slice(&chunk);
    }
    debug!("collected {} bytes of archive data", zip_data.len());

    let output = format!("new_{}", metadata.filename);
    decompress_folder(&zip_data, Path::new(&output))?;

    println!("Folder saved: {}", output);
    Ok(())
}

async fn render_progress(mut rx: mpsc::Receiver<Progress>, total: u64) {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap(),
    );
    while let Some(progress) = rx.recv().await {
        bar.set_position(progress.bytes);
    }
    bar.finish_and_clear();
}
