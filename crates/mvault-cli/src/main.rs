//! mvault: MediaVault command-line client
//!
//! Commands:
//!   keygen [--wrap]                          - generate a data key
//!   wrap-key <base64-key>                    - wrap a data key under the master secret
//!   unwrap-key <wrapped>                     - recover a data key
//!   encrypt <in> <out>                       - chunk-encrypt a file, print its wrapped key
//!   decrypt <in> <out> --wrapped-key <key>   - reverse `encrypt`
//!   config show                              - display effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use mvault_core::config::{MasterSecret, VaultConfig, MASTER_SECRET_ENV};
use mvault_core::types::WrappedKey;
use mvault_crypto::stream::ChunkLayout;
use mvault_crypto::{provider, CipherEngine, KeyEnvelope, SymmetricKey};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "mvault",
    version,
    about = "MediaVault client",
    long_about = "mvault: manage MediaVault data keys and encrypt files in the daemon's chunked format"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "MVAULT_CONFIG",
        default_value = "/etc/mediavault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MVAULT_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random data key of the configured size
    Keygen {
        /// Also print the key wrapped under the master secret
        #[arg(long)]
        wrap: bool,
    },

    /// Wrap a base64 data key under the master secret
    WrapKey { key: String },

    /// Unwrap a wrapped data key and print it as base64
    UnwrapKey { wrapped: String },

    /// Encrypt a file with a fresh data key
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Plaintext bytes per frame (default: crypto.chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Decrypt a file produced by `encrypt`
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Wrapped data key printed by `encrypt`
        #[arg(long)]
        wrapped_key: String,
        /// Plaintext bytes per frame used at encryption time
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration (secrets omitted)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = VaultConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    config.crypto.validate()?;
    provider::ensure_initialized().context("crypto self-test")?;
    let engine = CipherEngine::new(&config.crypto)?;

    match cli.command {
        Commands::Keygen { wrap } => cmd_keygen(&config, &engine, wrap),
        Commands::WrapKey { key } => cmd_wrap_key(&config, &engine, &key),
        Commands::UnwrapKey { wrapped } => cmd_unwrap_key(&config, &engine, &wrapped),
        Commands::Encrypt {
            input,
            output,
            chunk_size,
        } => {
            let chunk_size = chunk_size.unwrap_or(config.crypto.chunk_size);
            let envelope = envelope(&config, &engine)?;
            cmd_encrypt(&envelope, &input, &output, chunk_size).await
        }
        Commands::Decrypt {
            input,
            output,
            wrapped_key,
            chunk_size,
        } => {
            let chunk_size = chunk_size.unwrap_or(config.crypto.chunk_size);
            let envelope = envelope(&config, &engine)?;
            let key = envelope
                .unwrap(&WrappedKey(wrapped_key.trim().to_string()))
                .context("unwrapping data key (wrong master secret?)")?;
            cmd_decrypt(&envelope, key, &input, &output, chunk_size).await
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Master secret ─────────────────────────────────────────────────────────────

/// Master secret from config or `MVAULT_MASTER_SECRET`, else an interactive prompt.
fn master_secret(config: &VaultConfig) -> Result<MasterSecret> {
    if let Some(secret) = &config.crypto.master_secret {
        return Ok(secret.clone());
    }
    let entered = rpassword::prompt_password("master secret: ").with_context(|| {
        format!("no master secret configured; set {MASTER_SECRET_ENV} or crypto.master_secret")
    })?;
    if entered.is_empty() {
        anyhow::bail!("master secret must not be empty");
    }
    Ok(MasterSecret::new(entered))
}

fn envelope(config: &VaultConfig, engine: &CipherEngine) -> Result<KeyEnvelope> {
    let secret = master_secret(config)?;
    Ok(KeyEnvelope::new(engine.clone(), &secret)?)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `mvault keygen` / `wrap-key` / `unwrap-key` ───────────────────────────────

fn cmd_keygen(config: &VaultConfig, engine: &CipherEngine, wrap: bool) -> Result<()> {
    let key = engine.generate_key()?;
    println!("key:      {}", key.to_base64());
    println!("bits:     {}", key.bits());
    if wrap {
        let wrapped = envelope(config, engine)?.wrap(&key)?;
        println!("wrapped:  {}", wrapped.as_str());
    }
    Ok(())
}

fn cmd_wrap_key(config: &VaultConfig, engine: &CipherEngine, key: &str) -> Result<()> {
    let key = SymmetricKey::from_base64(key.trim()).context("decoding data key")?;
    if key.len() != engine.key_len() {
        anyhow::bail!(
            "data key is {} bits, engine is configured for {}",
            key.bits(),
            engine.key_len() * 8
        );
    }
    let wrapped = envelope(config, engine)?.wrap(&key)?;
    println!("{}", wrapped.as_str());
    Ok(())
}

fn cmd_unwrap_key(config: &VaultConfig, engine: &CipherEngine, wrapped: &str) -> Result<()> {
    let key = envelope(config, engine)?
        .unwrap(&WrappedKey(wrapped.trim().to_string()))
        .context("unwrapping data key (wrong master secret?)")?;
    println!("{}", key.to_base64());
    Ok(())
}

// ── `mvault encrypt` / `decrypt` ──────────────────────────────────────────────

async fn cmd_encrypt(
    envelope: &KeyEnvelope,
    input: &Path,
    output: &Path,
    chunk_size: usize,
) -> Result<()> {
    let plain_len = tokio::fs::metadata(input)
        .await
        .with_context(|| format!("stat {}", input.display()))?
        .len();
    let layout = ChunkLayout::new(chunk_size)?;
    let pb = make_progress_bar(layout.encrypted_len(plain_len), "encrypt");

    let wrapped = encrypt_file(envelope, input, output, chunk_size, Some(&pb)).await?;
    pb.finish_and_clear();

    println!("encrypted: {} -> {}", input.display(), output.display());
    println!("  plaintext:   {}", fmt_bytes(plain_len));
    println!("  ciphertext:  {}", fmt_bytes(layout.encrypted_len(plain_len)));
    println!("  chunk size:  {}", fmt_bytes(chunk_size as u64));
    println!("  wrapped key: {}", wrapped.as_str());
    Ok(())
}

async fn cmd_decrypt(
    envelope: &KeyEnvelope,
    key: SymmetricKey,
    input: &Path,
    output: &Path,
    chunk_size: usize,
) -> Result<()> {
    let cipher_len = tokio::fs::metadata(input)
        .await
        .with_context(|| format!("stat {}", input.display()))?
        .len();
    let pb = make_progress_bar(cipher_len, "decrypt");

    let written = decrypt_file(envelope, key, input, output, chunk_size, Some(&pb)).await?;
    pb.finish_and_clear();

    println!("decrypted: {} -> {}", input.display(), output.display());
    println!("  plaintext:  {}", fmt_bytes(written));
    Ok(())
}

/// Encrypt `input` into `output` under a fresh data key; returns the wrapped key.
async fn encrypt_file(
    envelope: &KeyEnvelope,
    input: &Path,
    output: &Path,
    chunk_size: usize,
    pb: Option<&ProgressBar>,
) -> Result<WrappedKey> {
    let engine = envelope.engine().clone();
    let key = engine.generate_key()?;
    let wrapped = envelope.wrap(&key)?;

    let source = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let frames = mvault_crypto::encrypt_stream(source, engine, key, chunk_size)?;
    pipe(frames, output, |frame_len, _| {
        if let Some(pb) = pb {
            pb.inc(frame_len);
        }
    })
    .await?;
    Ok(wrapped)
}

/// Decrypt `input` into `output`; returns the plaintext length.
async fn decrypt_file(
    envelope: &KeyEnvelope,
    key: SymmetricKey,
    input: &Path,
    output: &Path,
    chunk_size: usize,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    let layout = ChunkLayout::new(chunk_size)?;
    let frame_len = layout.frame_len() as u64;
    let source = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let chunks =
        mvault_crypto::decrypt_stream(source, envelope.engine().clone(), key, chunk_size)?;
    pipe(chunks, output, |_, _| {
        if let Some(pb) = pb {
            pb.inc(frame_len);
        }
    })
    .await
    .context("decrypting (wrong key or chunk size?)")
}

/// Drain `stream` into a new file at `output`. The partial file is removed on error.
async fn pipe(
    mut stream: mvault_core::types::ByteStream,
    output: &Path,
    mut on_chunk: impl FnMut(u64, u64),
) -> Result<u64> {
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    let result = async {
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64, written);
        }
        file.flush().await?;
        Ok::<_, std::io::Error>(written)
    }
    .await;

    match result {
        Ok(written) => Ok(written),
        Err(e) => {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(output).await {
                tracing::warn!(path = %output.display(), "removing partial output: {rm}");
            }
            Err(e).with_context(|| format!("writing {}", output.display()))
        }
    }
}

// ── `mvault config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!(
        "# master secret: {}",
        if config.crypto.master_secret.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
