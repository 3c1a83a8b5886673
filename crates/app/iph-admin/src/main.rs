use std::{io::Write, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use iph_admin::{
    ACCEPTED_EXTENSIONS, AdminError, Banner, BannerKind, HttpTransport, SessionStore, SiteClient,
    UploadController, UploadForm, UploadState, format_file_size, has_accepted_extension,
};
use indicatif::{ProgressBar, ProgressStyle};
use release_models::PackageKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "iph-admin", version, about = "Manage photobooth releases")]
struct Cli {
    /// Base URL of the site relay
    #[arg(
        long,
        env = "IPH_SITE_URL",
        default_value = "http://localhost:3000",
        global = true
    )]
    site_url: Url,

    /// Backend URL for direct uploads of large files
    #[arg(long, env = "BACKEND_URL", global = true)]
    backend_url: Option<Url>,

    /// Session file location
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "IPH_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Upload a new release
    Upload(UploadArgs),
    /// Show the latest published versions
    Versions,
    /// Show the changelog of a package kind
    Changelog {
        #[arg(long, default_value = "installer")]
        kind: PackageKind,
    },
}

#[derive(Args)]
struct UploadArgs {
    /// Release file (.msi, .zip, .exe, .iso, .ova, .ovf)
    file: PathBuf,

    #[arg(long, default_value = "installer")]
    kind: PackageKind,

    #[arg(long)]
    version: String,

    /// File with one release note per line
    #[arg(long, conflicts_with = "note")]
    notes_file: Option<PathBuf>,

    /// Release note, repeatable
    #[arg(long)]
    note: Vec<String>,

    /// Seconds to wait for progress before giving up
    #[arg(long, default_value_t = 600)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match &cli.session_file {
        Some(path) => SessionStore::new(path),
        None => SessionStore::new(SessionStore::default_path()?),
    };

    match cli.command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password().await?,
            };
            let client = SiteClient::new(cli.site_url)?;
            match client.login(&email, &password).await {
                Ok(session) => {
                    store.save(&session)?;
                    println!("{} {}", "Signed in as".green(), session.email());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    print_banner(&Banner::error(e.user_message()));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Logout => {
            store.clear()?;
            println!("Signed out");
            Ok(ExitCode::SUCCESS)
        }
        Command::Upload(args) => upload(&cli.site_url, cli.backend_url, &store, args).await,
        Command::Versions => {
            let summary = SiteClient::new(cli.site_url)?.version().await?;
            println!("{} ({})", summary.name.bold(), summary.company);
            println!(
                "  installer  {}",
                summary.version.as_deref().unwrap_or("unavailable")
            );
            println!(
                "  vm         {}",
                summary.vm_version.as_deref().unwrap_or("unavailable")
            );
            if let Some(size) = summary.file_size {
                println!("  size       {}", format_file_size(size));
            }
            for note in &summary.release_notes {
                println!("  - {}", note);
            }
            if let Some(error) = summary.error {
                println!("{}", error.yellow());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Changelog { kind } => {
            let changelog = SiteClient::new(cli.site_url)?.changelog(kind).await?;
            if changelog.changelog.is_empty() {
                println!("No releases for {}", kind);
            }
            for entry in changelog.changelog {
                match entry.created_at {
                    Some(date) => println!("{} {}", entry.version.bold(), date.dimmed()),
                    None => println!("{}", entry.version.bold()),
                }
                for note in entry.release_notes {
                    println!("  - {}", note);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn upload(
    site_url: &Url,
    backend_url: Option<Url>,
    store: &SessionStore,
    args: UploadArgs,
) -> Result<ExitCode> {
    let session = store.load()?;

    if !has_accepted_extension(&args.file) {
        eprintln!(
            "{} expected one of: {}",
            "warning:".yellow(),
            ACCEPTED_EXTENSIONS.join(", ")
        );
    }
    if let Ok(metadata) = std::fs::metadata(&args.file) {
        println!(
            "{} ({})",
            args.file.display(),
            format_file_size(metadata.len())
        );
    }

    let release_notes = match &args.notes_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => args.note.join("\n"),
    };

    let form = UploadForm {
        file: Some(args.file),
        kind: args.kind,
        version: args.version,
        release_notes,
    };
    let transport = HttpTransport::new(site_url.clone(), backend_url)?;
    let mut controller = UploadController::new(form)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout_secs));

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}%")?
            .progress_chars("=> "),
    );

    let result = controller
        .submit(&transport, session.as_ref(), |state| {
            if let UploadState::Uploading { percent } = state {
                bar.set_position(u64::from(*percent));
            }
        })
        .await
        .cloned();
    bar.finish_and_clear();

    if let Some(banner) = controller.banner() {
        print_banner(banner);
    }

    match result {
        Ok(UploadState::Succeeded) => Ok(ExitCode::SUCCESS),
        Ok(_) | Err(AdminError::Form(_)) | Err(AdminError::NotAuthenticated) => {
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn prompt_password() -> Result<String> {
    print!("Password: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_banner(banner: &Banner) {
    match banner.kind {
        BannerKind::Success => println!("{}", banner.text.green()),
        BannerKind::Error => eprintln!("{}", banner.text.red()),
    }
}
