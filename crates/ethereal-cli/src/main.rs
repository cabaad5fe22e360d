mod chat;
mod server;
mod telemetry;

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ethereal_contracts::prompts::{search_templates, template_categories, ALL_CATEGORIES};
use ethereal_engine::config::StudioConfig;
use ethereal_engine::export::export_image;
use ethereal_engine::generate::GenerationError;
use ethereal_engine::proxy::ProxyService;
use ethereal_engine::Studio;
use reqwest::blocking::Client as HttpClient;

#[derive(Debug, Parser)]
#[command(name = "ethereal-canvas", version, about = "Generate, collect and mint AI artwork")]
struct Cli {
    /// Overrides ETHEREAL_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat,
    Generate(GenerateArgs),
    Gallery(GalleryArgs),
    Delete(DeleteArgs),
    History(HistoryArgs),
    Mint(MintArgs),
    Serve(ServeArgs),
    Diagnose(DiagnoseArgs),
    Templates(TemplatesArgs),
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct GalleryArgs {
    /// Only minted images.
    #[arg(long)]
    nfts: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    #[arg(required = true, num_args = 1..)]
    ids: Vec<String>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long)]
    favorites: bool,
    #[arg(long, conflicts_with = "favorites")]
    clear: bool,
}

#[derive(Debug, Parser)]
struct MintArgs {
    id: String,
    /// Overrides ETHEREAL_WALLET_RPC_URL.
    #[arg(long)]
    rpc_url: Option<String>,
    /// Attempt a real on-chain mint instead of the demo path.
    #[arg(long)]
    advance: bool,
    /// Approve a network switch without asking.
    #[arg(long)]
    switch: bool,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    addr: SocketAddr,
}

#[derive(Debug, Parser)]
struct DiagnoseArgs {
    /// Also try to load every stored image URL.
    #[arg(long)]
    load: bool,
}

#[derive(Debug, Parser)]
struct TemplatesArgs {
    term: Option<String>,
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    id: String,
    /// Defaults to `<data dir>/exports`.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    telemetry::init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ethereal-canvas error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = StudioConfig::from_env()?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    match cli.command {
        Command::Chat => {
            let mut studio = Studio::open(config)?;
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            chat::run_chat(&mut studio, stdin.lock(), &mut stdout)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(config, args),
        Command::Gallery(args) => run_gallery(config, args),
        Command::Delete(args) => {
            let studio = Studio::open(config)?;
            let removed = studio.delete(&args.ids)?;
            println!("Deleted {removed} of {} image(s).", args.ids.len());
            Ok(if removed == 0 { 1 } else { 0 })
        }
        Command::History(args) => run_history(config, args),
        Command::Mint(args) => run_mint(config, args),
        Command::Serve(args) => {
            let service = ProxyService::from_config(&config, HttpClient::new());
            if !service.has_hugging_face() {
                tracing::info!("HUGGING_FACE_API_KEY not set, proxy will use pollinations or placeholders");
            }
            server::serve(service, args.addr)?;
            Ok(0)
        }
        Command::Diagnose(args) => {
            let studio = Studio::open(config)?;
            let report = studio.storage_report()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if args.load {
                let loads = studio.test_images()?;
                println!("{}", serde_json::to_string_pretty(&loads)?);
                println!("Results: {} successful, {} failed", loads.successful, loads.failed);
            }
            Ok(0)
        }
        Command::Templates(args) => {
            let category = args.category.as_deref().unwrap_or(ALL_CATEGORIES);
            let term = args.term.as_deref().unwrap_or_default();
            for template in search_templates(term, category) {
                println!("{} [{}] {}", template.id, template.category, template.name);
                println!("    {}", template.template);
            }
            println!("Categories: {}", template_categories().join(", "));
            Ok(0)
        }
        Command::Export(args) => {
            let studio = Studio::open(config)?;
            let path = match args.out {
                Some(dir) => export_image(&studio.image(&args.id)?, &dir, &HttpClient::new())?,
                None => studio.export(&args.id)?,
            };
            println!("{}", path.display());
            Ok(0)
        }
    }
}

fn run_generate(mut config: StudioConfig, args: GenerateArgs) -> Result<i32> {
    if let Some(width) = args.width {
        config.image_width = width;
    }
    if let Some(height) = args.height {
        config.image_height = height;
    }
    let mut studio = Studio::open(config)?;
    let prompt = args.prompt.join(" ");

    let generation = match studio.generate(&prompt) {
        Ok(generation) => generation,
        Err(err) => {
            if let Some(GenerationError::AllSourcesFailed { attempts }) = err.downcast_ref::<GenerationError>() {
                for attempt in attempts {
                    eprintln!(
                        "  {}: {}",
                        attempt.source,
                        attempt.error.as_deref().unwrap_or("failed")
                    );
                }
            }
            return Err(err);
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "image": generation.image,
                "outcome": generation.outcome,
            }))?
        );
    } else {
        chat::write_generation(&mut io::stdout(), &generation)?;
    }
    Ok(0)
}

fn run_gallery(config: StudioConfig, args: GalleryArgs) -> Result<i32> {
    let studio = Studio::open(config)?;
    let images = if args.nfts {
        studio.gallery().nfts()?
    } else {
        studio.images()?
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&images)?);
    } else {
        chat::write_images(&mut io::stdout(), &images, "Gallery is empty.")?;
    }
    Ok(0)
}

fn run_history(config: StudioConfig, args: HistoryArgs) -> Result<i32> {
    let studio = Studio::open(config)?;
    if args.clear {
        studio.prompts().clear_history()?;
        println!("Prompt history cleared.");
        return Ok(0);
    }
    let prompts = if args.favorites {
        studio.prompts().favorites()?
    } else {
        studio.prompts().history()?
    };
    for (index, prompt) in prompts.iter().enumerate() {
        println!("{}. {prompt}", index + 1);
    }
    Ok(0)
}

fn run_mint(mut config: StudioConfig, args: MintArgs) -> Result<i32> {
    if let Some(rpc_url) = args.rpc_url {
        config.wallet_rpc_url = Some(rpc_url);
    }
    if config.wallet_rpc_url.is_none() {
        bail!("minting needs a wallet: set ETHEREAL_WALLET_RPC_URL or pass --rpc-url");
    }
    let mut studio = Studio::open(config)?;
    let state = studio.connect_wallet()?;
    tracing::info!(address = ?state.address, chain_id = ?state.chain_id, "wallet ready");
    studio.set_advance_mode(Some(args.advance));

    let auto_switch = args.switch;
    let mut confirm = |current: u64, target: u64| {
        if auto_switch {
            return true;
        }
        print!("Network {current} has no mint contract. Switch to chain {target}? [y/N] ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        io::stdin().read_line(&mut answer).is_ok()
            && matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    };
    let result = studio.mint(&args.id, Some(&mut confirm))?;
    chat::write_mint(&mut io::stdout(), &result)?;
    Ok(0)
}
