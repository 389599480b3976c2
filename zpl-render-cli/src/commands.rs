//! Subcommands

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zpl_render::{OutputFormat, RenderConfig, RenderEngine, RenderForm, RenderRequest};

/// Render ZPL labels through a remote rendering service
#[derive(Debug, Parser)]
#[command(name = "zpl-render", version, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Render every label into one PDF
    Document(RenderArgs),
    /// Render one label as PNG
    Preview {
        #[command(flatten)]
        args: RenderArgs,
        /// 0-based label index
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Print label marker statistics as JSON
    Analyze {
        /// ZPL file, `-` for stdin
        input: PathBuf,
    },
    /// Probe every configured upstream endpoint
    Health,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// ZPL file, `-` for stdin
    pub input: PathBuf,

    #[arg(long, env = "RENDER_DPI", default_value_t = 203)]
    pub dpi: u32,

    #[arg(long, env = "RENDER_WIDTH", default_value_t = 4.0)]
    pub width: f64,

    #[arg(long, env = "RENDER_HEIGHT", default_value_t = 6.0)]
    pub height: f64,

    /// `in` or `mm`
    #[arg(long, env = "RENDER_UNIT", default_value = "in")]
    pub unit: String,

    /// `0` or `90`
    #[arg(long, env = "RENDER_ORIENTATION", default_value = "0")]
    pub orientation: String,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print a `data:` URL instead of raw bytes
    #[arg(long)]
    pub data_url: bool,
}

impl RenderArgs {
    fn request(&self) -> anyhow::Result<RenderRequest> {
        let form = RenderForm {
            zpl: read_input(&self.input)?,
            dpi: self.dpi,
            width: self.width,
            height: self.height,
            unit: self.unit.clone(),
            orientation: self.orientation.clone(),
        };
        Ok(RenderRequest::try_from(form)?)
    }
}

pub async fn run(command: Command, config: RenderConfig) -> anyhow::Result<()> {
    match command {
        Command::Document(args) => {
            let engine = RenderEngine::new(config)?;
            let pdf = engine.render_document(&args.request()?).await?;
            tracing::info!(bytes = pdf.len(), cache = ?engine.cache_stats(), "Document rendered");
            write_output(&pdf, OutputFormat::Pdf, &args)
        }
        Command::Preview { args, index } => {
            let engine = RenderEngine::new(config)?;
            let png = engine.render_preview(&args.request()?, index).await?;
            write_output(&png, OutputFormat::Png, &args)
        }
        Command::Analyze { input } => {
            let analysis = zpl_render::analyze(&read_input(&input)?);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Command::Health => {
            let report = RenderEngine::new(config)?.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                bail!("No healthy upstream endpoint");
            }
            Ok(())
        }
    }
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input.as_os_str() == "-" {
        let mut zpl = String::new();
        std::io::stdin()
            .read_to_string(&mut zpl)
            .context("Failed to read ZPL from stdin")?;
        return Ok(zpl);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))
}

fn write_output(bytes: &[u8], format: OutputFormat, args: &RenderArgs) -> anyhow::Result<()> {
    if args.data_url {
        println!("{}", format.data_url(bytes));
        return Ok(());
    }
    match &args.output {
        Some(path) => std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
