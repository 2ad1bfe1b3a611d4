// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! The default invocation executes a document headlessly:
//! `tangle workflow.md --provider anthropic -v`. Exit codes: 0 success,
//! 1 parse/validation error, 2 runtime error, 3 cancelled.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tangle - executable Markdown workflows for your terminal
#[derive(Parser, Debug)]
#[command(name = "tangle")]
#[command(version, about = "Executable Markdown workflows for your terminal")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Document to execute
    pub document: Option<PathBuf>,

    /// LLM provider to use (overrides the configured default)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use (overrides the provider's default)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Settings file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tools directory (defaults to `tools/` next to the document)
    #[arg(long, global = true)]
    pub tools_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a document (the default when a path is given)
    Run(RunArgs),

    /// Tool registry management
    Tools(ToolsArgs),
}

/// Arguments for the run subcommand
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Document to execute
    pub document: PathBuf,

    /// LLM provider to use
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// Markdown prepended as `# Input Parameters` before execution
    #[arg(long)]
    pub param_text: Option<String>,
}

/// Arguments for tools management
#[derive(clap::Args, Debug)]
pub struct ToolsArgs {
    #[command(subcommand)]
    pub command: ToolsCommands,
}

/// Tools subcommands
#[derive(Subcommand, Debug)]
pub enum ToolsCommands {
    /// List registered tools with their source and schema summary
    List {
        /// Tools directory to scan
        directory: Option<PathBuf>,
    },

    /// Rescan the tools directory and report what registered
    Rescan {
        /// Tools directory to scan
        directory: Option<PathBuf>,
    },
}
