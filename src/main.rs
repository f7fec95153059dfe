use clap::Parser;
use musicdec::decrypter::kgg::KggDecrypter;
use musicdec::decrypter::ncm::NcmDecrypter;
use musicdec::{load_key_table, DecryptOptions, DecrypterRegistry};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Known encrypted-container extensions; everything else is skipped when
/// walking a directory.
const KNOWN_EXTENSIONS: [&str; 2] = ["ncm", "kgg"];

#[derive(Parser)]
#[command(name = "musicdec", about = "Decrypt NCM/KGG encrypted music containers")]
struct Cli {
    /// Input file or directory
    #[arg(short, long)]
    input: PathBuf,
    /// Output directory (defaults to the input's directory)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Overwrite existing output files
    #[arg(long)]
    overwrite: bool,
    /// Recurse into subdirectories
    #[arg(short, long)]
    recursive: bool,
    /// Path to the KGG key database (defaults to the player's per-user file)
    #[arg(long)]
    kgdb: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let registry = build_registry(cli.kgdb.as_deref());

    let files = collect_inputs(&cli.input, cli.recursive)?;
    if files.is_empty() {
        warn!("no .ncm/.kgg files under {}", cli.input.display());
        return Ok(());
    }

    let mut done = 0usize;
    let mut failed = 0usize;
    for path in &files {
        let output_dir = cli
            .output
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        match decrypt_file(&registry, path, &output_dir, cli.overwrite) {
            Ok(Some(dest)) => {
                info!("{} → {}", path.display(), dest.display());
                done += 1;
            }
            Ok(None) => {}
            Err(e) => {
                error!("{}: {e}", path.display());
                failed += 1;
            }
        }
    }
    info!("{done} decrypted, {failed} failed, {} total", files.len());
    Ok(())
}

/// Registry with NCM always available; KGG only once its key database loads.
fn build_registry(kgdb: Option<&Path>) -> DecrypterRegistry {
    let mut registry = DecrypterRegistry::new();
    let path = kgdb.map(Path::to_path_buf).or_else(default_kgdb_path);
    match path {
        Some(path) if path.exists() => match load_key_table(&path) {
            Ok(table) => {
                info!("loaded {} key(s) from {}", table.len(), path.display());
                registry.register(Box::new(KggDecrypter::new(table)));
            }
            Err(e) => warn!("key database unusable, skipping .kgg files: {e}"),
        },
        _ => warn!("no key database found, skipping .kgg files"),
    }
    registry
}

fn default_kgdb_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("KuGou8").join("KGMusicV3.db"))
}

fn collect_inputs(root: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    dirs.push(path);
                }
            } else if has_known_extension(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn has_known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| KNOWN_EXTENSIONS.iter().any(|k| ext.eq_ignore_ascii_case(k)))
        .unwrap_or(false)
}

/// Decrypt one file into `output_dir`. Returns the destination path, or
/// `None` when an existing output was left alone.
fn decrypt_file(
    registry: &DecrypterRegistry,
    path: &Path,
    output_dir: &Path,
    overwrite: bool,
) -> musicdec::Result<Option<PathBuf>> {
    let mut input = File::open(path)?;
    let decrypter = registry.find(&mut input)?;
    let format = decrypter.detect_format(&mut input)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let dest = output_dir.join(format!("{stem}.{}", format.extension()));
    if dest.exists() && !overwrite {
        warn!("{} exists, skipping (use --overwrite)", dest.display());
        return Ok(None);
    }

    std::fs::create_dir_all(output_dir)?;
    let mut output = File::create(&dest)?;
    decrypter.decrypt_range(&mut input, &mut output, DecryptOptions::default())?;
    drop(output);

    // Cover art rides in the container header, not the payload; stitch it
    // into the finished file afterwards. Losing it is not worth failing the
    // decryption over.
    if decrypter.name() == "ncm" {
        if let Err(e) = NcmDecrypter::new().patch_cover_image(&mut input, &dest) {
            warn!("{}: cover art not embedded: {e}", dest.display());
        }
    }
    Ok(Some(dest))
}
