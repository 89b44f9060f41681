use std::{
    env,
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::task;

use fuslib::{
    constants::{FIXED_KEY, FLEXIBLE_KEY_SUFFIX},
    crypto::FusKeys,
    decrypt::{
        decrypt_file, decrypted_path, encrypted_path, key_v2, key_v4, DecryptOutcome,
        EncryptionVersion,
    },
    download::{download_firmware, ByteCounter, TransferPlan},
    fus::{BinaryInfo, FusClientBuilder},
    imei::{validate_tac, IMEI_LEN, TAC_LEN},
    version::{normalize_version, VersionClient},
};
use progresslib::{GibSize, ProgressDisplay};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Download, resume, and decrypt firmware from the FUS service.
#[derive(Debug, Parser)]
#[command(author, version)]
struct Opts {
    /// Device's model number (eg. SM-S928B)
    #[arg(short, long)]
    model: String,
    /// Region/CSC code (eg. EUX)
    #[arg(short, long)]
    region: String,
    /// Device IMEI (15 digits) or TAC (8 digits)
    ///
    /// If a TAC is given, random IMEIs with that prefix are generated and
    /// checked against the server until one is accepted.
    #[arg(short, long)]
    imei: Option<String>,
    /// Device serial number, for devices without an IMEI
    #[arg(short, long)]
    serial: Option<String>,
    /// Set logging verbosity
    ///
    /// By default, no log messages are printed out. If set to 'debug', the
    /// protocol requests and responses are logged. If set to 'trace', every
    /// chunk of I/O is also logged, which can be extremely verbose. This
    /// option overrides the RUST_LOG environment variable.
    #[arg(value_enum, long)]
    loglevel: Option<LogLevel>,
    /// Ignore TLS validation for HTTPS connections
    #[arg(long)]
    ignore_tls_validation: bool,
    /// FUS fixed key
    ///
    /// If unspecified, the key is loaded from the `FUS_FIXED_KEY` environment
    /// variable, followed by the `fus_fixed_key` config file variable, followed
    /// by the built-in key.
    #[arg(long, env = "FUS_FIXED_KEY", hide_env_values = true)]
    fus_fixed_key: Option<String>,
    /// FUS flexible key suffix
    ///
    /// If unspecified, the key is loaded from the `FUS_FLEXIBLE_KEY_SUFFIX`
    /// environment variable, followed by the `fus_flexible_key_suffix` config
    /// file variable, followed by the built-in key.
    #[arg(long, env = "FUS_FLEXIBLE_KEY_SUFFIX", hide_env_values = true)]
    fus_flexible_key_suffix: Option<String>,
    /// Config file path
    ///
    /// If unspecified, the default config file path is used.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the latest firmware version
    CheckUpdate,
    /// List the latest firmware version and the available upgrades
    List(ListOpts),
    /// Download and decrypt firmware
    Download(DownloadOpts),
    /// Decrypt a previously downloaded firmware file
    Decrypt(DecryptOpts),
}

#[derive(Debug, Args)]
struct ListOpts {
    /// Only show the latest version
    #[arg(short, long)]
    latest: bool,
    /// Only print version strings
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("output").required(true).args(["out_dir", "out_file"])))]
struct DownloadOpts {
    /// Directory to download into, using the filename from the server
    #[arg(short = 'O', long)]
    out_dir: Option<PathBuf>,
    /// Path of the encrypted download
    ///
    /// If this is an existing directory, the filename from the server is used.
    /// A path without the server's .enc2/.enc4 suffix gets it appended. The
    /// decrypted file is written next to it with the suffix removed.
    #[arg(short = 'o', long)]
    out_file: Option<PathBuf>,
    /// Firmware version (latest if unspecified)
    ///
    /// The format is "<PDA>/<CSC>[/<Phone>[/<Data>]]". A missing <Phone> or
    /// <Data> is filled in with <PDA>.
    #[arg(short, long)]
    version: Option<String>,
    /// Show the MD5 digest sent by the download server
    #[arg(short = 'M', long)]
    show_md5: bool,
}

#[derive(Debug, Args)]
struct DecryptOpts {
    /// Firmware version of the encrypted file
    #[arg(short, long)]
    version: String,
    /// Encrypted input file
    #[arg(short = 'I', long)]
    input: PathBuf,
    /// Decrypted output file
    #[arg(short, long)]
    output: PathBuf,
    /// Encryption scheme
    #[arg(value_enum, short = 'V', long, default_value_t)]
    enc_version: EncVersion,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
enum EncVersion {
    #[value(name = "2")]
    V2,
    #[default]
    #[value(name = "4")]
    V4,
}

impl From<EncVersion> for EncryptionVersion {
    fn from(v: EncVersion) -> Self {
        match v {
            EncVersion::V2 => Self::V2,
            EncVersion::V4 => Self::V4,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Trace => f.write_str("trace"),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Config {
    fus_fixed_key: Option<String>,
    fus_flexible_key_suffix: Option<String>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(format!("{PKG_NAME}.conf"));
        p
    })
}

fn load_config_file(user_path: Option<&Path>) -> Result<Option<Config>> {
    let default_path = default_config_path();
    let path = match user_path.or(default_path.as_deref()) {
        Some(p) => p,
        None => return Ok(None),
    };

    let file = match File::open(path) {
        Ok(f) => f,
        // Only a missing default config is acceptable
        Err(e) if e.kind() == io::ErrorKind::NotFound && user_path.is_none() => {
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("Could not open file: {path:?}")),
    };

    let config = serde_json::from_reader(file)
        .with_context(|| format!("Could not parse config file: {path:?}"))?;

    Ok(Some(config))
}

/// Load FUS keys from the following list in order:
/// * User-supplied command line arguments
/// * Environment variables
/// * Config file
/// * Built-in keys
fn load_keys(opts: &Opts, config: Option<&Config>) -> Result<FusKeys> {
    let fixed_key = opts.fus_fixed_key.as_deref()
        .or_else(|| config.and_then(|c| c.fus_fixed_key.as_deref()))
        .map_or(&FIXED_KEY[..], str::as_bytes);
    let flexible_key_suffix = opts.fus_flexible_key_suffix.as_deref()
        .or_else(|| config.and_then(|c| c.fus_flexible_key_suffix.as_deref()))
        .map_or(&FLEXIBLE_KEY_SUFFIX[..], str::as_bytes);

    FusKeys::new(fixed_key, flexible_key_suffix).context("Invalid FUS key configuration")
}

/// Shared state for every subcommand.
struct App {
    opts: Opts,
    client_builder: FusClientBuilder,
    versions: VersionClient,
}

impl App {
    fn model(&self) -> &str {
        &self.opts.model
    }

    fn region(&self) -> &str {
        &self.opts.region
    }

    async fn latest_version(&self) -> Result<String> {
        self.versions.latest_version(self.model(), self.region()).await
            .with_context(|| format!(
                "Could not get latest version for {} ({})", self.model(), self.region()))
    }

    /// Get the device identifier sent to the server. An 8-digit TAC is
    /// expanded into an IMEI that the server accepts.
    async fn device_id(&self) -> Result<String> {
        if let Some(imei) = &self.opts.imei {
            match imei.len() {
                IMEI_LEN => Ok(imei.clone()),
                TAC_LEN => {
                    let version = self.latest_version().await?;
                    println!("Searching for a valid IMEI with TAC {imei}...");

                    let found = validate_tac(
                        &self.client_builder,
                        imei,
                        &version,
                        self.model(),
                        self.region(),
                    ).await.context("Could not find a valid IMEI")?;
                    println!("Using IMEI {found}");

                    Ok(found)
                }
                _ => bail!("IMEI must be {TAC_LEN} or {IMEI_LEN} digits"),
            }
        } else if let Some(serial) = &self.opts.serial {
            Ok(serial.clone())
        } else {
            Err(anyhow!("IMEI (-i) or serial number (-s) required"))
        }
    }

    async fn check_update(&self) -> Result<()> {
        println!("{}", self.latest_version().await?);
        Ok(())
    }

    async fn list(&self, opts: &ListOpts) -> Result<()> {
        let info = self.versions.fetch_info(self.model(), self.region()).await
            .context("Could not get version information")?;
        let latest = info.latest.as_deref().unwrap_or("");

        if opts.quiet {
            println!("{latest}");
            if !opts.latest {
                for u in &info.upgrades {
                    println!("{}", u.version);
                }
            }
            return Ok(());
        }

        println!("Model: {}  Region: {}", self.model(), self.region());
        println!();
        println!("Latest:");
        println!("  {latest}");

        if !opts.latest && !info.upgrades.is_empty() {
            println!();
            println!("Available upgrades:");
            for u in &info.upgrades {
                if u.size > 0 {
                    println!("  {} ({})", u.version, GibSize(u.size));
                } else {
                    println!("  {}", u.version);
                }
            }
        }

        Ok(())
    }

    async fn download(&self, opts: &DownloadOpts) -> Result<()> {
        let device_id = self.device_id().await?;
        let version = match &opts.version {
            Some(v) => normalize_version(v),
            None => self.latest_version().await?,
        };

        let mut client = self.client_builder.connect().await
            .context("Could not start FUS session")?;
        let info = client.binary_inform(&version, self.model(), self.region(), &device_id).await
            .context("Failed to query firmware information")?;
        debug!("Firmware info: {info:#?}");

        let output = download_path(opts, &info.filename);

        println!("Device: {} | CSC: {}", self.model(), self.region());
        println!("FW: {version}");
        println!("Size: {}", GibSize(info.size));
        println!("Path: {output:?}");

        let decrypted = decrypted_path(&output);
        if decrypted == output {
            bail!("Cannot decrypt {output:?}: no .enc2 or .enc4 suffix");
        }
        if decrypted.exists() {
            println!("Already decrypted: {decrypted:?}");
            return Ok(());
        }

        let plan = TransferPlan::for_path(&output, info.size).await
            .with_context(|| format!("Cannot resume download to {output:?}"))?;
        match plan {
            TransferPlan::Complete => println!("Already downloaded"),
            TransferPlan::Resume(offset) => {
                println!("Resuming from {:.1}%", offset as f64 / info.size as f64 * 100.0);
            }
            TransferPlan::Fresh => {}
        }

        let counter = ByteCounter::new(plan.start_offset());
        let display = (plan != TransferPlan::Complete).then(|| {
            let reader = counter.clone();
            ProgressDisplay::spawn(info.size, move || reader.get())
        });

        let result = download_firmware(&mut client, &info, &output, &counter).await;

        if let Some(d) = display {
            d.finish().await.context("Could not draw progress")?;
        }
        let transfer = result.context("Download failed. To resume, rerun the current command")?;

        if opts.show_md5 {
            match &transfer.content_md5 {
                Some(md5) => println!("MD5: {}", hex_string(md5)),
                None => println!("MD5: not provided by server"),
            }
        }

        self.decrypt_download(&output, &decrypted, &info, &version, &device_id).await
    }

    /// Decrypt a completed download and remove the encrypted file.
    async fn decrypt_download(
        &self,
        input: &Path,
        output: &Path,
        info: &BinaryInfo,
        version: &str,
        device_id: &str,
    ) -> Result<()> {
        let enc_version = EncryptionVersion::from_filename(&info.filename)
            .unwrap_or(EncryptionVersion::V4);
        let key = self.key(enc_version, version, device_id).await?;

        if run_decrypt(input, output, key).await? == DecryptOutcome::AlreadyDecrypted {
            println!("{output:?} already exists");
            return Ok(());
        }

        delete_if_exists(input)?;
        println!("Done.");

        Ok(())
    }

    async fn decrypt(&self, opts: &DecryptOpts) -> Result<()> {
        let device_id = self.device_id().await?;
        let key = self.key(opts.enc_version.into(), &opts.version, &device_id).await?;

        match run_decrypt(&opts.input, &opts.output, key).await? {
            DecryptOutcome::AlreadyDecrypted => println!("{:?} already exists", opts.output),
            DecryptOutcome::Decrypted(_) => println!("Done."),
        }

        Ok(())
    }

    async fn key(
        &self,
        enc_version: EncryptionVersion,
        version: &str,
        device_id: &str,
    ) -> Result<[u8; 16]> {
        let key = match enc_version {
            EncryptionVersion::V2 => key_v2(version, self.model(), self.region()),
            EncryptionVersion::V4 => {
                let mut client = self.client_builder.connect().await
                    .context("Could not start FUS session")?;

                key_v4(&mut client, version, self.model(), self.region(), device_id).await
                    .context("Failed to compute decryption key")?
            }
        };

        if log_keys() {
            debug!("Firmware decryption key: {}", hex_string(&key));
        }

        Ok(key)
    }
}

/// Decrypt on a blocking thread, printing the progress in tenths.
async fn run_decrypt(input: &Path, output: &Path, key: [u8; 16]) -> Result<DecryptOutcome> {
    let input = input.to_owned();
    let output = output.to_owned();

    let outcome = task::spawn_blocking(move || {
        decrypt_file(&input, &output, &key, |percent| {
            eprint!("\rDecrypting... {percent}%");
            let _ = io::stderr().flush();
        })
        .with_context(|| format!("Could not decrypt {input:?} to {output:?}"))
    }).await??;

    if let DecryptOutcome::Decrypted(size) = outcome {
        eprintln!();
        info!("Wrote {size} decrypted bytes");
    }

    Ok(outcome)
}

/// Where the encrypted file is downloaded to.
fn download_path(opts: &DownloadOpts, filename: &str) -> PathBuf {
    match (&opts.out_file, &opts.out_dir) {
        (Some(f), _) if f.is_dir() => f.join(filename),
        (Some(f), _) => encrypted_path(f, filename),
        (None, Some(d)) => d.join(filename),
        (None, None) => PathBuf::from(filename),
    }
}

/// Delete a file, but don't error out if the path doesn't exist.
fn delete_if_exists(path: &Path) -> Result<()> {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(e).with_context(|| format!("Failed to delete file: {path:?}"));
        }
    }

    Ok(())
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn log_keys() -> bool {
    let var = format!("{}_LOG_KEYS", PKG_NAME.to_uppercase());
    matches!(env::var(var), Ok(v) if v == "true")
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    if let Some(l) = opts.loglevel {
        env::set_var("RUST_LOG", format!("{PKG_NAME}={l},fuslib={l},progresslib={l}"));
    }

    env_logger::init();

    debug!("Arguments: {:#?}", opts);

    let config = load_config_file(opts.config.as_deref())?;
    let keys = load_keys(&opts, config.as_ref())?;
    if log_keys() {
        debug!("Config: {:#?}", config);
        debug!("Keys: {:?}", keys);
    }

    let client_builder = FusClientBuilder::new(keys)
        .ignore_tls_validation(opts.ignore_tls_validation);
    let versions = VersionClient::new(opts.ignore_tls_validation)
        .context("Could not create HTTP client")?;

    let app = App {
        opts,
        client_builder,
        versions,
    };

    match &app.opts.command {
        Command::CheckUpdate => app.check_update().await,
        Command::List(o) => app.list(o).await,
        Command::Download(o) => app.download(o).await,
        Command::Decrypt(o) => app.decrypt(o).await,
    }
}
