#![forbid(unsafe_code)]
//! `seft` command-line interface.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use seft::{
    BatchOptions, DecryptOptions, EncryptOptions, EngineConfig, Mode, Operation, decrypt_file,
    decrypt_folder, encrypt_file, encrypt_folder, folder_info, generate_password, inspect_file,
    is_folder_container, password_strength, run_batch,
};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

#[derive(Parser, Debug)]
#[command(
    name = "seft",
    version,
    about = "Encrypt/decrypt files and folders with a password"
)]
struct Cli {
    /// Config file (default: ./seft.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a file or folder
    Enc(EncArgs),
    /// Decrypt a .enc file or .tar.gz.enc folder container
    Dec(DecArgs),
    /// Encrypt or decrypt many paths
    Batch(BatchArgs),
    /// Show container header fields (no password needed), or folder size
    Info(InfoArgs),
    /// Generate a random password
    Genpass(GenpassArgs),
    /// Score a password's strength
    Strength(StrengthArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory for outputs (default: next to each input)
    #[arg(short = 'o', long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Overwrite outputs that already exist
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Read password from file instead of interactive prompt
    #[arg(short = 'p', long = "password-file")]
    password_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CipherArgs {
    #[arg(short = 'm', long, value_enum)]
    mode: Option<ModeChoice>,

    /// PBKDF2 iterations (100000..=10000000)
    #[arg(long)]
    iterations: Option<u32>,
}

#[derive(Args, Debug)]
struct EncArgs {
    /// File or folder to encrypt
    input: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    cipher: CipherArgs,
}

#[derive(Args, Debug)]
struct DecArgs {
    /// Container to decrypt
    input: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    #[arg(value_enum)]
    op: OpChoice,
    /// Files and folders
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    cipher: CipherArgs,
    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long)]
    workers: Option<usize>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    path: PathBuf,
}

#[derive(Args, Debug)]
struct GenpassArgs {
    #[arg(short = 'l', long, default_value_t = 16)]
    length: usize,
    /// Letters and digits only
    #[arg(long)]
    no_symbols: bool,
}

#[derive(Args, Debug)]
struct StrengthArgs {
    #[arg(short = 'p', long = "password-file")]
    password_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeChoice {
    /// AES-256-GCM-SIV (authenticated)
    GcmSiv,
    /// AES-256-CBC (legacy, no tag)
    Cbc,
}

impl From<ModeChoice> for Mode {
    fn from(v: ModeChoice) -> Self {
        match v {
            ModeChoice::GcmSiv => Mode::Aes256GcmSiv,
            ModeChoice::Cbc => Mode::Aes256Cbc,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OpChoice {
    Encrypt,
    Decrypt,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::discover(),
    };

    match cli.cmd {
        Command::Enc(a) => cmd_enc(a, &config),
        Command::Dec(a) => cmd_dec(a, &config),
        Command::Batch(a) => cmd_batch(a, &config),
        Command::Info(a) => cmd_info(a),
        Command::Genpass(a) => cmd_genpass(a),
        Command::Strength(a) => cmd_strength(a),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("seft=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seft=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_password(
    password_file: &Option<PathBuf>,
    prompt: &str,
    confirm: bool,
) -> Result<SecretString> {
    if let Some(path) = password_file {
        let mut s = String::new();
        fs::File::open(path)
            .and_then(|mut f| f.read_to_string(&mut s))
            .with_context(|| format!("failed to read password file {}", path.display()))?;
        let secret = SecretString::new(
            s.trim_end_matches(&['\r', '\n'][..])
                .to_owned()
                .into_boxed_str(),
        );
        s.zeroize();
        return Ok(secret);
    }

    let pw = SecretString::new(rpassword::prompt_password(prompt)?.into_boxed_str());
    if confirm {
        let again =
            SecretString::new(rpassword::prompt_password("Confirm password: ")?.into_boxed_str());
        if pw.expose_secret() != again.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(pw)
}

fn cipher_settings(config: &EngineConfig, cipher: &CipherArgs) -> (Mode, u32) {
    (
        cipher.mode.map(Mode::from).unwrap_or(config.mode),
        cipher.iterations.unwrap_or(config.iterations),
    )
}

fn out_dir<'a>(common: &'a CommonArgs, config: &'a EngineConfig) -> Option<&'a Path> {
    common.out_dir.as_deref().or(config.output_dir.as_deref())
}

fn cmd_enc(a: EncArgs, config: &EngineConfig) -> Result<()> {
    let (mode, iterations) = cipher_settings(config, &a.cipher);
    let opts = EncryptOptions::default()
        .with_mode(mode)
        .with_iterations(iterations)
        .with_force(a.common.force);
    let pw = read_password(&a.common.password_file, "Password: ", true)?;

    let out = if a.input.is_dir() {
        encrypt_folder(&a.input, pw, out_dir(&a.common, config), &opts)
    } else {
        encrypt_file(&a.input, pw, out_dir(&a.common, config), &opts)
    }
    .with_context(|| "encryption failed")?;

    eprintln!("Wrote {}", out.display());
    Ok(())
}

fn cmd_dec(a: DecArgs, config: &EngineConfig) -> Result<()> {
    let opts = DecryptOptions::default().with_force(a.common.force);
    let pw = read_password(&a.common.password_file, "Password: ", false)?;

    let out = if is_folder_container(&a.input) {
        decrypt_folder(&a.input, pw, out_dir(&a.common, config), &opts)
    } else {
        decrypt_file(&a.input, pw, out_dir(&a.common, config), &opts)
    }
    .with_context(|| "decryption failed")?;

    eprintln!("Wrote {}", out.display());
    Ok(())
}

fn cmd_batch(a: BatchArgs, config: &EngineConfig) -> Result<()> {
    let (mode, iterations) = cipher_settings(config, &a.cipher);
    let opts = BatchOptions {
        mode,
        iterations,
        force: a.common.force,
        workers: a.workers.unwrap_or(config.workers),
        ..Default::default()
    };
    let op = match a.op {
        OpChoice::Encrypt => Operation::Encrypt,
        OpChoice::Decrypt => Operation::Decrypt,
    };
    let pw = read_password(
        &a.common.password_file,
        "Password: ",
        op == Operation::Encrypt,
    )?;

    let results = run_batch(
        &a.inputs,
        op,
        &pw,
        out_dir(&a.common, config),
        &opts,
        |p| eprintln!("[{}/{}] {}", p.completed, p.total, p.current.display()),
    );

    let mut failed = 0;
    for r in &results {
        match &r.outcome {
            Ok(out) => eprintln!("ok    {} -> {}", r.path.display(), out.display()),
            Err(e) => {
                failed += 1;
                eprintln!("error {}: {e}", r.path.display());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} items failed", results.len());
    }
    Ok(())
}

fn cmd_info(a: InfoArgs) -> Result<()> {
    if a.path.is_dir() {
        let info = folder_info(&a.path)?;
        println!("files:       {}", info.files);
        println!("directories: {}", info.dirs);
        println!("total bytes: {}", info.total_bytes);
        return Ok(());
    }
    let info = inspect_file(&a.path).with_context(|| "not a valid container")?;
    println!("version:     {}", info.version);
    println!("mode:        {:?}", info.mode);
    println!("iterations:  {}", info.iterations);
    println!("header:      {} bytes", info.header_len);
    println!("ciphertext:  {} bytes", info.ciphertext_len);
    println!("total:       {} bytes", info.total_len);
    Ok(())
}

fn cmd_genpass(a: GenpassArgs) -> Result<()> {
    let pw = generate_password(a.length, !a.no_symbols)?;
    println!("{}", pw.expose_secret());
    Ok(())
}

fn cmd_strength(a: StrengthArgs) -> Result<()> {
    let pw = read_password(&a.password_file, "Password to check: ", false)?;
    let report = password_strength(&pw);
    println!(
        "{} ({}/{}, {}%)",
        report.level, report.score, report.max_score, report.percentage
    );
    for hint in &report.feedback {
        println!("  - {hint}");
    }
    Ok(())
}
