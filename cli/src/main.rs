// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use imgdelta::{CodecKind, DiffConfig, ErrorKind, ImagePatch, PatchHeader};
use log::info;

/// File extensions of formats that usually embed deflate streams
const IMAGE_EXTENSIONS: [&str; 5] = ["gz", "img", "apk", "jar", "zip"];

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Log more detail (use multiple times for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a patch that turns OLD into NEW
    Diff {
        old: PathBuf,
        new: PathBuf,
        patch: PathBuf,
        #[command(flatten)]
        options: DiffOptions,
        /// Create an image patch if NEW looks like a compressed image
        #[arg(long)]
        auto: bool,
    },
    /// Create an image patch, diffing embedded deflate streams decompressed
    Imgdiff {
        old: PathBuf,
        new: PathBuf,
        patch: PathBuf,
        #[command(flatten)]
        options: DiffOptions,
        /// Smallest decompressed size of a deflate stream to diff decompressed
        #[arg(long, default_value_t = DiffConfig::DEFAULT_MIN_DEFLATE_CHUNK)]
        min_deflate_chunk: usize,
    },
    /// Apply PATCH to OLD, writing the result to OUT
    Patch {
        old: PathBuf,
        patch: PathBuf,
        out: PathBuf,
    },
    /// Describe the contents of a patch
    Info { patch: PathBuf },
}

#[derive(clap::Args)]
struct DiffOptions {
    /// Codec to compress the patch streams with
    #[arg(long, value_enum, default_value_t = CodecArg::Zstd)]
    codec: CodecArg,
    /// Compression level [default: 19 for zstd, 9 for bzip2]
    #[arg(long, allow_negative_numbers = true)]
    level: Option<i32>,
    /// Compression worker threads (zstd only)
    #[arg(long, default_value_t = DiffConfig::DEFAULT_COMPRESSION_THREADS)]
    threads: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodecArg {
    Zstd,
    Bzip2,
}

impl DiffOptions {
    fn config(&self) -> anyhow::Result<DiffConfig> {
        let mut config = DiffConfig::new();
        config.compression_threads(self.threads);

        match self.codec {
            CodecArg::Zstd => {
                config
                    .codec(CodecKind::Zstd)
                    .compression_level(self.level.unwrap_or(DiffConfig::DEFAULT_COMPRESSION_LEVEL));
            }
            #[cfg(feature = "bzip2")]
            CodecArg::Bzip2 => {
                config
                    .codec(CodecKind::Bzip2)
                    .compression_level(self.level.unwrap_or(9));
            }
            #[cfg(not(feature = "bzip2"))]
            CodecArg::Bzip2 => anyhow::bail!("this build does not include the bzip2 codec"),
        }

        Ok(config)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("imgdelta: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Diff {
            old,
            new,
            patch,
            options,
            auto,
        } => {
            let config = options.config()?;
            let old_data = read(&old, "old")?;
            let new_data = read(&new, "new")?;

            let image = auto && looks_like_image(&new);
            info!(
                "creating {} patch for '{}'",
                if image { "image" } else { "plain" },
                new.display(),
            );

            write_patch(&patch, |out| {
                if image {
                    imgdelta::diff_image_with_config(&old_data, &new_data, out, &config)
                } else {
                    imgdelta::diff_with_config(&old_data, &new_data, out, &config)
                }
            })?;
        }
        Command::Imgdiff {
            old,
            new,
            patch,
            options,
            min_deflate_chunk,
        } => {
            let mut config = options.config()?;
            config.min_deflate_chunk(min_deflate_chunk);
            let old_data = read(&old, "old")?;
            let new_data = read(&new, "new")?;

            write_patch(&patch, |out| {
                imgdelta::diff_image_with_config(&old_data, &new_data, out, &config)
            })?;
        }
        Command::Patch { old, patch, out } => {
            let old_data = read(&old, "old")?;
            let patch_data = read(&patch, "patch")?;

            let new_data = if imgdelta::is_image_patch(&patch_data) {
                imgdelta::patch_image(&old_data, &patch_data)
            } else {
                imgdelta::patch(&old_data, &patch_data)
            }
            .with_context(|| format!("Failed to apply patch file '{}'", patch.display()))?;

            fs::write(&out, &new_data)
                .with_context(|| format!("Failed to write out file '{}'", out.display()))?;
            info!("wrote {} bytes to '{}'", new_data.len(), out.display());
        }
        Command::Info { patch } => {
            let patch_data = read(&patch, "patch")?;
            let mut stdout = std::io::stdout().lock();
            describe(&patch_data, &mut stdout)?;
        }
    }

    Ok(())
}

fn read(path: &Path, what: &str) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {what} file '{}'", path.display()))
}

/// Writes a patch to `path` only once it has been fully created.
fn write_patch<F>(path: &Path, create: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> imgdelta::Result<()>,
{
    let mut patch = Vec::new();
    create(&mut patch).context("Failed to create patch")?;

    let file = File::create(path)
        .with_context(|| format!("Failed to create patch file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&patch)
        .and_then(|()| writer.flush())
        .with_context(|| format!("Failed to write patch file '{}'", path.display()))?;

    info!("wrote {} byte patch to '{}'", patch.len(), path.display());

    Ok(())
}

fn looks_like_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|image_ext| ext.eq_ignore_ascii_case(image_ext))
        })
}

fn describe<W>(patch: &[u8], out: &mut W) -> anyhow::Result<()>
where
    W: Write,
{
    if imgdelta::is_image_patch(patch) {
        let image = ImagePatch::parse(patch)?;
        writeln!(out, "image patch")?;
        writeln!(out, "  source: {} bytes", image.source_len())?;
        writeln!(out, "  target: {} bytes", image.target_len())?;
        writeln!(out, "  chunks: {}", image.chunks().len())?;
        for chunk in image.chunks() {
            write!(
                out,
                "    {:?} target {:?} source {:?} patch {} bytes",
                chunk.kind(),
                chunk.target(),
                chunk.source(),
                chunk.patch_len(),
            )?;
            if let Some(params) = chunk.deflate_params() {
                write!(out, " level {}", params.level())?;
            }
            writeln!(out)?;
        }
    } else {
        let header = PatchHeader::parse(patch)?;
        writeln!(out, "plain patch ({})", header.magic().escape_ascii())?;
        writeln!(out, "  control stream: {} bytes", header.control_len())?;
        writeln!(out, "  diff stream: {} bytes", header.diff_len())?;
        writeln!(out, "  target: {} bytes", header.target_len())?;
    }

    Ok(())
}

/// Maps the first library error in the chain of `err` to a process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<imgdelta::Error>())
        .map(imgdelta::Error::kind);

    match kind {
        Some(ErrorKind::Format) => 2,
        Some(ErrorKind::Codec) => 3,
        Some(ErrorKind::CorruptPatch) => 4,
        Some(ErrorKind::SourceMismatch) => 5,
        Some(ErrorKind::Allocation) => 6,
        Some(ErrorKind::Io) | None => 1,
    }
}
