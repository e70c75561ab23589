use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_with, DEFAULT_SETTINGS_FILE},
    PdfArtifact, RequestOrchestrator,
};
use shared::domain::{CaseMetadata, ImageUpload, OperationResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Chest X-ray caption client with automatic demo-mode fallback")]
struct Cli {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides `api_base_url` from the settings file.
    #[arg(long)]
    api_base_url: Option<String>,
    /// Page query string, e.g. `mock=true`.
    #[arg(long)]
    query: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Caption an image.
    Caption { image: PathBuf },
    /// Save case metadata. Fields are `key=value`.
    Save {
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        #[arg(long)]
        caption: Option<String>,
    },
    /// Produce the case report, locally when in demo mode.
    Pdf {
        image: PathBuf,
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        #[arg(long)]
        caption: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the current mode.
    Mode,
    Toggle,
    UseRemote,
    UseDemo,
    Health,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn read_image(path: &PathBuf) -> Result<ImageUpload> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("dcm") => Some("application/dicom"),
        _ => None,
    };
    let upload = ImageUpload::new(filename, bytes);
    Ok(match mime {
        Some(mime) => upload.with_mime_type(mime),
        None => upload,
    })
}

fn case_from(fields: Vec<(String, String)>, caption: Option<String>) -> CaseMetadata {
    let case = fields
        .into_iter()
        .fold(CaseMetadata::new(), |case, (k, v)| case.with_field(k, v));
    match caption {
        Some(caption) => case.with_caption(caption),
        None => case,
    }
}

fn unwrap_result<T>(result: OperationResult<T>) -> Result<T> {
    match result {
        OperationResult::Success(value) => Ok(value),
        OperationResult::Failure { reason } => bail!(reason),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_with(&cli.config, |key| std::env::var(key).ok());
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }
    info!(api_base_url = %settings.api_base_url, "console: starting");
    let orchestrator = RequestOrchestrator::from_settings(&settings, cli.query.as_deref()).await?;

    match cli.command {
        Command::Caption { image } => {
            let record = unwrap_result(orchestrator.generate_caption(&read_image(&image)?).await)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Save { fields, caption } => {
            let case_id = unwrap_result(orchestrator.save_case(&case_from(fields, caption)).await)?;
            println!("saved case_id={case_id}");
        }
        Command::Pdf {
            image,
            fields,
            caption,
            out,
        } => {
            let case = case_from(fields, caption);
            let (bytes, file_name) =
                match unwrap_result(orchestrator.generate_pdf(&read_image(&image)?, &case).await)? {
                    PdfArtifact::Bytes(bytes) => (bytes, "xray_analysis_report.pdf".to_string()),
                    PdfArtifact::ConstructLocally => {
                        let report = orchestrator.build_local_report(&case).await;
                        (report.bytes, report.file_name)
                    }
                };
            let out = out.unwrap_or_else(|| PathBuf::from(file_name));
            fs::write(&out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} ({} bytes)", out.display(), bytes.len());
        }
        Command::Mode => println!("{}", orchestrator.current_mode().await.label()),
        Command::Toggle => println!("{}", orchestrator.toggle_mode().await.label()),
        Command::UseRemote => println!("{}", orchestrator.enable_remote().await.label()),
        Command::UseDemo => println!("{}", orchestrator.enable_simulated().await.label()),
        Command::Health => {
            let report = orchestrator.check_health().await;
            match report.warning() {
                Some(warning) => println!("{report:?}: {warning}"),
                None => println!("{report:?}"),
            }
        }
    }

    Ok(())
}
