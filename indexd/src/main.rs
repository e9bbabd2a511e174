use std::env::set_var;

use anyhow::{anyhow, Context, Result};
use clap::{arg, command, ArgAction};
use log::info;

use barindex::{IndexHandle, Mode};
use blockdev::{BlockDevice, FileBlockDevice};
use fsprobe::FilesystemHandle;

const SCAN_CHUNK_SIZE: u64 = 4096;

fn main() -> Result<()> {
    let matches = command!()
        .arg(arg!(<command> "scan or serve").value_parser(["scan", "serve"]))
        .arg(arg!(--index <PATH> "Index database path").required(false).default_value("index.db"))
        .arg(arg!(--device <PATH> "Block device or disk image path").required(false))
        .arg(
            arg!(-v --verbose "Print more debug information, or set `RUST_LOG=debug`")
                .action(ArgAction::SetTrue)
                .required(false),
        )
        .get_matches();

    if matches.get_flag("verbose") {
        set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let command = matches.get_one::<String>("command").unwrap();
    let index_path = matches.get_one::<String>("index").unwrap();

    match command.as_str() {
        "scan" => {
            let device_path = matches
                .get_one::<String>("device")
                .ok_or_else(|| anyhow!("--device is required for 'scan'"))?;
            scan(device_path)
        }
        "serve" => serve(index_path),
        other => Err(anyhow!("unknown command '{other}'")),
    }
}

/// Walk `device` in `SCAN_CHUNK_SIZE` strides, classify its filesystem, and
/// print the used/free byte totals the used-block map reports.
fn scan(device_path: &str) -> Result<()> {
    let mut device = FileBlockDevice::open(device_path)
        .with_context(|| format!("opening device '{device_path}'"))?;
    let size = device.size();

    let mut handle = match FilesystemHandle::init(&mut device) {
        Some(handle) => handle,
        None => {
            println!("no recognized filesystem on '{device_path}'");
            return Ok(());
        }
    };
    info!("detected filesystem: {:?}", handle.fs_type());

    let mut used_bytes: u64 = 0;
    let mut offset: u64 = 0;
    while offset < size {
        if handle.block_is_used(&mut device, offset) {
            used_bytes += SCAN_CHUNK_SIZE.min(size - offset);
        }
        offset += SCAN_CHUNK_SIZE;
    }
    handle.done();

    println!("device: {device_path}");
    println!("size: {size} bytes");
    println!("used: {used_bytes} bytes");
    println!("free: {} bytes", size - used_bytes);
    Ok(())
}

/// Open (or create) the index at `index_path` and run the cleanup worker
/// until interrupted.
fn serve(index_path: &str) -> Result<()> {
    let _handle = IndexHandle::open(index_path, Mode::ReadWrite)
        .with_context(|| format!("opening index '{index_path}'"))?;
    info!("serving index '{index_path}'");

    barindex::run_worker(index_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_chunk_size_is_positive() {
        assert!(SCAN_CHUNK_SIZE > 0);
    }
}
