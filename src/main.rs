use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use supertool::database::Database;
use supertool::error::{Result, SupertoolError};
use supertool::interface::QueryInterface;
use supertool::proxy;
use supertool::query::ScriptFile;
use supertool::record::Category;
use supertool::script::Runtime;
use supertool::server;
use supertool::settings::Settings;

/// Runs SuperTool query files against a genealogy database.
#[derive(Debug, Parser)]
#[command(name = "supertool", version, about)]
struct Args {
    /// Query file to run (block format, or JSON when it ends in .json)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Write the rows as CSV to this file instead of JSON lines to stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Category to run over; overrides the one stored in the query
    #[arg(long)]
    category: Option<String>,

    /// SQLite database file; overrides the configured one
    #[arg(long, env = "SUPERTOOL_DATABASE")]
    database: Option<String>,

    /// Configuration file (default: supertool.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV delimiter; overrides the configured one
    #[arg(long)]
    delimiter: Option<char>,

    /// JSON file of records to load before running
    #[arg(long)]
    import: Option<PathBuf>,

    /// List the attributes scripts can use for a category and exit
    #[arg(long, value_name = "CATEGORY")]
    list_attributes: Option<String>,

    /// Serve POST /v1/query on the configured listen address
    #[arg(long)]
    serve: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(database) = &args.database {
        settings.database = Some(database.clone());
    }
    if let Some(delimiter) = args.delimiter {
        settings.csv_delimiter = delimiter.to_string();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log)))
        .with_writer(std::io::stderr)
        .init();

    match run(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "supertool failed");
            eprintln!("{}", e.diagnostic());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, settings: &Settings) -> Result<()> {
    if let Some(name) = &args.list_attributes {
        let category = Category::from_name(name)
            .ok_or_else(|| SupertoolError::Engine(format!("Unknown category '{}'", name)))?;
        for attribute in proxy::attribute_names(category) {
            println!("{attribute}");
        }
        return Ok(());
    }

    let db = Arc::new(Database::new(settings.persistence_mode())?);
    if let Some(path) = &args.import {
        db.import(&fs::read_to_string(path)?)?;
    }
    let runtime = Runtime::new(db, settings.filter_store(), settings.include_path());
    let interface = QueryInterface::new(runtime);

    if args.serve {
        return serve(interface, settings);
    }

    let Some(script) = &args.script else {
        println!("No script_filename");
        return Ok(());
    };
    if !script.exists() {
        println!("Script file '{}' does not exist", script.display());
        return Ok(());
    }
    let query = ScriptFile::load(script, true)?;
    let category = match args.category.as_deref().filter(|c| !c.is_empty()) {
        Some(category) => category.to_string(),
        None => query.category.clone(),
    };
    if category.is_empty() {
        println!("No category name specified");
        return Ok(());
    }
    info!(script = %script.display(), %category, "running query");

    let rows = match &args.output {
        Some(path) => {
            let delimiter = settings.delimiter();
            let mut out = BufWriter::new(fs::File::create(path)?);
            let rows = interface.generate(&query, &category, |row| {
                writeln!(out, "{}", row.to_csv(delimiter))?;
                Ok(())
            })?;
            out.flush()?;
            rows
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            interface.generate(&query, &category, |row| {
                writeln!(out, "{}", serde_json::to_string(row)?)?;
                Ok(())
            })?
        }
    };
    info!(rows, "done");
    Ok(())
}

fn serve(interface: QueryInterface, settings: &Settings) -> Result<()> {
    let app = server::router(Arc::new(interface), settings.row_limit);
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(settings.listen.as_str()).await?;
        info!(listen = %settings.listen, "serving");
        axum::serve(listener, app).await?;
        Ok::<(), SupertoolError>(())
    })
}
