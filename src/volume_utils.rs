//! Raw block copies with dd

use crate::executor::{ExecResult, Executor, ShellCommand};
use std::path::Path;

pub const DEFAULT_BLOCKSIZE: &str = "1M";

const MIB: u64 = 1024 * 1024;

/// Parse a dd block size such as `4096`, `512K`, `1M` or `1G`.
/// Zero and negative sizes are rejected.
pub fn parse_blocksize(blocksize: &str) -> Option<u64> {
    let blocksize = blocksize.trim();
    let (digits, multiplier) = match blocksize.char_indices().last()? {
        (idx, 'k' | 'K') => (&blocksize[..idx], 1024),
        (idx, 'm' | 'M') => (&blocksize[..idx], MIB),
        (idx, 'g' | 'G') => (&blocksize[..idx], MIB * 1024),
        _ => (blocksize, 1),
    };

    match digits.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(n) => n.checked_mul(multiplier),
    }
}

/// Block size and block count to copy `size_mb` MiB. An invalid block size
/// falls back to the default.
pub fn calculate_count(size_mb: u64, blocksize: &str) -> (String, u64) {
    let (blocksize, bs) = match parse_blocksize(blocksize) {
        Some(bs) => (blocksize.trim().to_string(), bs),
        None => {
            log::warn!(
                "Invalid dd_blocksize {:?}, falling back to {}",
                blocksize,
                DEFAULT_BLOCKSIZE
            );
            (DEFAULT_BLOCKSIZE.to_string(), MIB)
        }
    };

    let count = (size_mb * MIB).div_ceil(bs);
    (blocksize, count)
}

/// Copy `size_mb` MiB from `src` to `dest` with dd.
///
/// Uses O_DIRECT when both ends support it, to keep the page cache out of
/// the way. Without O_DIRECT and with `sync` set, the copy ends with
/// `fdatasync` so the data is persisted before returning.
pub fn copy_volume(
    executor: &Executor,
    src: &Path,
    dest: &Path,
    size_mb: u64,
    blocksize: &str,
    sync: bool,
) -> ExecResult<()> {
    let input = format!("if={}", src.display());
    let output = format!("of={}", dest.display());

    let mut extra_flags = vec!["iflag=direct", "oflag=direct"];

    let probe = ShellCommand::new("dd")
        .args(["count=0", input.as_str(), output.as_str()])
        .args(extra_flags.iter().copied())
        .as_root();
    if executor.run(&probe).is_err() {
        log::debug!("O_DIRECT not supported between {:?} and {:?}", src, dest);
        extra_flags.clear();
    }

    if sync && extra_flags.is_empty() {
        extra_flags.push("conv=fdatasync");
    }

    let (blocksize, count) = calculate_count(size_mb, blocksize);

    let copy = ShellCommand::new("dd")
        .args([input, output, format!("count={}", count), format!("bs={}", blocksize)])
        .args(extra_flags.iter().copied())
        .as_root();
    executor.run(&copy)?;

    log::debug!("Copied {} MiB from {:?} to {:?}", size_mb, src, dest);
    Ok(())
}
