// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tangle - executable Markdown workflows
//!
//! Entry point for the Tangle CLI application.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use tangle::cli::{Cli, Commands, RunArgs, ToolsCommands};
use tangle::config::Settings;
use tangle::error::{Result, TangleError};
use tangle::exec::Executor;
use tangle::llm::provider::ProviderRegistry;
use tangle::render;
use tangle::session::NullSnapshotStore;
use tangle::tools::ToolRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Run(args)) => {
            run_document(&args, cli.config.as_deref(), cli.tools_dir.clone()).await
        }
        Some(Commands::Tools(args)) => match args.command {
            ToolsCommands::List { directory } | ToolsCommands::Rescan { directory } => {
                list_tools(directory.or(cli.tools_dir)).await
            }
        },
        None => match cli.document {
            Some(document) => {
                let args = RunArgs {
                    document,
                    provider: cli.provider,
                    model: cli.model,
                    param_text: None,
                };
                run_document(&args, cli.config.as_deref(), cli.tools_dir).await
            }
            None => Err(TangleError::Config(
                "no document given; run `tangle <document.md>`".to_string(),
            )),
        },
    }
}

async fn run_document(
    args: &RunArgs,
    config: Option<&Path>,
    tools_dir: Option<PathBuf>,
) -> Result<()> {
    let document_dir = args
        .document
        .parent()
        .map(Path::to_path_buf)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut settings = match config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load_for_document(&document_dir)?,
    };
    if let Some(provider) = &args.provider {
        settings.default_provider = provider.clone();
    }
    if let Some(model) = &args.model {
        let name = settings.default_provider.clone();
        settings.providers.entry(name).or_default().model = model.clone();
    }

    let tools_dir = tools_dir.unwrap_or_else(|| document_dir.join("tools"));
    let registry = Arc::new(ToolRegistry::new(tools_dir, &settings));
    match registry.rescan().await {
        Ok(count) => tracing::info!(tools = count, "tool registry ready"),
        Err(err) => tracing::warn!(%err, "tool rescan failed; continuing without tools"),
    }

    // Concrete chat providers are wired in by the embedding application;
    // the headless CLI runs documents against whatever is registered
    let providers = ProviderRegistry::new();

    let executor = Executor::new(settings, providers, registry, Arc::new(NullSnapshotStore));
    let report = executor
        .execute_with_input(&args.document, args.param_text.as_deref())
        .await?;

    if report.explicit_return {
        print!("{}", render::render_fragment(&report.return_fragment));
    }
    eprintln!(
        "done: snapshot {}, context {}",
        report.snapshot_label,
        report
            .artifacts
            .ctx_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    );
    Ok(())
}

async fn list_tools(directory: Option<PathBuf>) -> Result<()> {
    let directory = directory.unwrap_or_else(|| PathBuf::from("tools"));
    let settings = Settings::load()?;
    let registry = ToolRegistry::new(directory.clone(), &settings);
    let count = registry.rescan().await?;

    println!("{} tool(s) registered from {}", count, directory.display());
    for tool in registry.list().await {
        let required = tool.definition.input_schema.required.join(", ");
        println!(
            "  {:<24} [{}] {}{}",
            tool.definition.name,
            tool.source,
            tool.definition.description,
            if required.is_empty() {
                String::new()
            } else {
                format!(" (requires: {})", required)
            }
        );
    }
    Ok(())
}

fn print_error_chain(err: &TangleError) {
    eprintln!("error: {}: {}", err.kind(), err);
    let mut current = err;
    while let TangleError::ChildFailed { source, .. } = current {
        current = source;
        eprintln!("  caused by: {}: {}", current.kind(), current);
    }
}
