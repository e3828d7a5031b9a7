//! mark2pdf - Markdown with LaTeX math to PDF

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mark2pdf_core::{Config, Document, Renderer};
use mark2pdf_export::resources::ResourceLoader;
use mark2pdf_export::snapshot::{self, SnapshotPolicy};
use mark2pdf_export::{
    CommandRasterizer, ExportArtifact, ExportStatus, Exporter, ImageFileRasterizer,
    OffscreenHost, Rasterizer, Session,
};

/// Convert Markdown with LaTeX math into a paginated PDF
#[derive(Parser, Debug)]
#[command(name = "mark2pdf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render Markdown to HTML
    Render {
        /// Markdown file, `-` for stdin; the demo document if omitted
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output file (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Emit the standalone snapshot document instead of a fragment
        #[arg(long)]
        standalone: bool,
    },

    /// Export Markdown to PDF
    Export {
        /// Markdown file, `-` for stdin; the demo document if omitted
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output PDF path
        #[arg(short, long, value_name = "FILE", conflicts_with = "out_dir")]
        output: Option<PathBuf>,

        /// Directory receiving the PDF under its default name
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Use a pre-captured bitmap instead of running the rasterizer
        #[arg(long, value_name = "IMAGE")]
        raster: Option<PathBuf>,

        /// Rasterizer oversampling factor
        #[arg(long, value_name = "FACTOR")]
        scale: Option<f32>,

        /// Re-export whenever the file changes
        #[arg(long)]
        watch: bool,
    },

    /// Write the built-in demo document
    Demo {
        /// Output file (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            input,
            output,
            standalone,
        } => cmd_render(&config, input.as_deref(), output.as_deref(), standalone),
        Commands::Export {
            input,
            output,
            out_dir,
            raster,
            scale,
            watch,
        } => {
            let opts = ExportArgs {
                output,
                out_dir,
                raster,
                scale,
            };
            if watch {
                cmd_watch(config, input.as_deref(), &opts)
            } else {
                cmd_export(config, input.as_deref(), &opts)
            }
        }
        Commands::Demo { output } => write_output(output.as_deref(), Document::demo().text()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let (config, events) = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    for event in &events {
        event.log();
    }
    Ok(config)
}

/// Load the input document: a file, stdin for `-`, or the demo
fn load_document(input: Option<&Path>) -> Result<Document> {
    match input {
        None => Ok(Document::demo()),
        Some(path) if path == Path::new("-") => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(Document::from_text(text))
        }
        Some(path) => Document::load(path)
            .with_context(|| format!("Failed to load document: {}", path.display())),
    }
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn cmd_render(
    config: &Config,
    input: Option<&Path>,
    output: Option<&Path>,
    standalone: bool,
) -> Result<()> {
    let doc = load_document(input)?;
    let session = Session::new(
        doc,
        Renderer::new(config),
        OffscreenHost::from_config(&config.raster),
    );

    let preview = session.preview();
    if preview.math_errors > 0 {
        log::warn!(
            "{} of {} math spans failed to render",
            preview.math_errors,
            preview.math_spans
        );
    }

    if !standalone {
        return write_output(output, &preview.html);
    }

    let policy = SnapshotPolicy::from_config(&config.styles)?;
    let mut loader = ResourceLoader::new(&config.images);
    let snapshot = snapshot::capture(session.host(), &policy, &mut loader)?;
    write_output(output, &snapshot.html)
}

struct ExportArgs {
    output: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    raster: Option<PathBuf>,
    scale: Option<f32>,
}

fn print_status(status: &ExportStatus) {
    eprintln!("{status}");
}

fn build_exporter(
    config: &mut Config,
    opts: &ExportArgs,
) -> Result<Exporter<Box<dyn Rasterizer + Send>, fn(&ExportStatus)>> {
    if let Some(scale) = opts.scale {
        anyhow::ensure!(scale > 0.0, "--scale must be positive");
        config.raster.scale = scale;
    }

    let rasterizer: Box<dyn Rasterizer + Send> = match &opts.raster {
        Some(path) => Box::new(ImageFileRasterizer::new(path)),
        None => {
            let rasterizer = CommandRasterizer::from_config(config);
            for event in rasterizer.security_events() {
                event.log();
            }
            Box::new(rasterizer)
        }
    };
    let notifier: fn(&ExportStatus) = print_status;
    Exporter::from_config(config, rasterizer, notifier)
}

fn write_artifact(artifact: &ExportArtifact, config: &Config, opts: &ExportArgs) -> Result<PathBuf> {
    if let Some(path) = &opts.output {
        fs::write(path, &artifact.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        return Ok(path.clone());
    }

    let dir = opts
        .out_dir
        .clone()
        .or_else(|| config.output.directory.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    artifact
        .write_to(&dir)
        .with_context(|| format!("Failed to write PDF into {}", dir.display()))
}

fn report_resources(artifact: &ExportArtifact) {
    for record in &artifact.resources {
        if !record.status.is_embedded() {
            log::warn!("Image not embedded ({:?}): {}", record.status, record.src);
        }
    }
}

fn cmd_export(mut config: Config, input: Option<&Path>, opts: &ExportArgs) -> Result<()> {
    let doc = load_document(input)?;
    let mut exporter = build_exporter(&mut config, opts)?;
    let session = Session::new(
        doc,
        Renderer::new(&config),
        OffscreenHost::from_config(&config.raster),
    );

    let artifact = session.export(&mut exporter)?;
    report_resources(&artifact);
    let path = write_artifact(&artifact, &config, opts)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(feature = "watch")]
fn cmd_watch(mut config: Config, input: Option<&Path>, opts: &ExportArgs) -> Result<()> {
    use mark2pdf_export::watcher::DocumentWatcher;
    use mark2pdf_export::worker::ExportRequest;
    use mark2pdf_export::ExportWorker;
    use std::time::Duration;

    let path = match input {
        Some(path) if path != Path::new("-") => path,
        _ => anyhow::bail!("--watch needs a Markdown file to watch"),
    };

    let doc = load_document(Some(path))?;
    let exporter = build_exporter(&mut config, opts)?;
    let mut session = Session::new(
        doc,
        Renderer::new(&config),
        OffscreenHost::from_config(&config.raster),
    );
    let worker = ExportWorker::spawn(exporter, OffscreenHost::from_config(&config.raster));
    let mut watcher = DocumentWatcher::new(path, config.watch.debounce_ms)?;

    let request = |session: &Session| ExportRequest {
        doc_id: 0,
        rev: session.document().rev,
        markup: session.preview().clone(),
        base_dir: session.document().base_dir().map(Path::to_path_buf),
        title: session.document().title(),
    };

    worker.request_export(request(&session));
    eprintln!("Watching {} (Ctrl-C to stop)", path.display());

    loop {
        if watcher.wait_changed(Duration::from_millis(200)) {
            match session.reload() {
                Ok(()) => worker.request_export(request(&session)),
                Err(e) => log::error!("Failed to reload document: {:#}", e),
            }
        }

        while let Some(result) = worker.try_recv_result() {
            // Results for revisions that have since been superseded are discarded
            if result.rev != session.document().rev {
                continue;
            }
            if let Ok(artifact) = result.outcome {
                report_resources(&artifact);
                match write_artifact(&artifact, &config, opts) {
                    Ok(path) => log::info!("Wrote {}", path.display()),
                    Err(e) => log::error!("{:#}", e),
                }
            }
        }
    }
}

#[cfg(not(feature = "watch"))]
fn cmd_watch(_config: Config, _input: Option<&Path>, _opts: &ExportArgs) -> Result<()> {
    anyhow::bail!("mark2pdf was built without the `watch` feature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export_args() {
        let cli = Cli::try_parse_from([
            "mark2pdf",
            "-vv",
            "export",
            "notes.md",
            "--out-dir",
            "out",
            "--scale",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Export {
                input,
                out_dir,
                scale,
                ..
            } => {
                assert_eq!(input, Some(PathBuf::from("notes.md")));
                assert_eq!(out_dir, Some(PathBuf::from("out")));
                assert_eq!(scale, Some(3.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_output_conflicts_with_out_dir() {
        let result = Cli::try_parse_from([
            "mark2pdf", "export", "a.md", "-o", "a.pdf", "--out-dir", "out",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_input_loads_demo() {
        let doc = load_document(None).unwrap();
        assert!(doc.text().contains('$'));
        assert!(doc.path.is_none());
    }

    #[test]
    fn test_write_artifact_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ExportArtifact {
            bytes: b"%PDF-1.7".to_vec(),
            page_count: 1,
            file_name: "mark2pdf_document.pdf".to_string(),
            placements: Vec::new(),
            rev: 1,
            resources: Vec::new(),
            security: Vec::new(),
        };
        let opts = ExportArgs {
            output: Some(dir.path().join("custom.pdf")),
            out_dir: None,
            raster: None,
            scale: None,
        };

        let path = write_artifact(&artifact, &Config::default(), &opts).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"%PDF-1.7");

        let opts = ExportArgs {
            output: None,
            out_dir: Some(dir.path().to_path_buf()),
            ..opts
        };
        let path = write_artifact(&artifact, &Config::default(), &opts).unwrap();
        assert!(path.ends_with("mark2pdf_document.pdf"));
    }
}
