use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use mdlive::api::{Backend, HttpBackend};
use mdlive::app::{App, FileSink};
use mdlive::catalog::DEFAULT_GROUP;
use mdlive::config;
use mdlive::theme;

#[derive(Parser)]
#[command(name = "mdlive", about = "Live-reloading Markdown previewer client")]
struct Cli {
    /// Markdown files to register with the backend before connecting
    files: Vec<PathBuf>,

    /// Group to register the files into (also the initially opened group)
    #[arg(short, long)]
    target: Option<String>,

    /// Backend port
    #[arg(short, long)]
    port: Option<u16>,

    /// Color theme name (light or dark)
    #[arg(long)]
    theme: Option<String>,

    /// HTML file the view is mirrored into
    #[arg(short, long, default_value = "mdlive.html")]
    out: PathBuf,

    /// Log output file path (enables logging when specified)
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        let file = std::fs::File::create(log_path).expect("failed to open log file");
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    } else {
        env_logger::init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Load config file and merge CLI overrides
    let mut cfg = config::load_config()?;
    cfg.merge_cli(cli.port, cli.theme);
    let config = cfg.resolve();

    let theme = theme::get(&config.theme)
        .ok_or_else(|| anyhow::anyhow!("unknown theme '{}'", config.theme))?;

    let backend = Arc::new(HttpBackend::new(config.server_url()));

    let group = cli.target.as_deref().unwrap_or(DEFAULT_GROUP);
    for file in &cli.files {
        let path = file
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", file.display()))?;
        let path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-UTF-8 path: {}", file.display()))?;
        backend
            .register_file(path, group)
            .with_context(|| format!("failed to register {path}"))?;
        info!("registered {path} in group '{group}'");
    }

    let initial_location = match cli.target.as_deref() {
        Some(name) if name != DEFAULT_GROUP => format!("/{name}"),
        _ => "/".to_string(),
    };

    let sink = FileSink::new(cli.out);
    let app = App::new(backend, &initial_location, theme, config.panels, sink);
    app.run()
}
