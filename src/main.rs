use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{self, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mdrip::{BlockServer, FileName, Label, MdripConfig, Program};

#[derive(Parser)]
#[command(
    name = "mdrip",
    version,
    about = "Run the labelled shell blocks of markdown files"
)]
struct Cli {
    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of ./mdrip.toml or ~/.mdrip.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the selected blocks as a shell script
    Print(PrintArgs),

    /// Run the selected blocks in a subshell, reporting the first failure
    Test(TestArgs),

    /// Serve the selected blocks over HTTP, running them one at a time
    Serve(ServeArgs),
}

#[derive(clap::Args)]
struct Selection {
    /// Label of the blocks to use; empty selects every labelled block
    #[arg(short, long)]
    label: Option<String>,

    /// Markdown files to read blocks from
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(clap::Args)]
struct PrintArgs {
    #[command(flatten)]
    selection: Selection,

    /// Print the first N blocks bare, then everything in a trapped subshell
    #[arg(long, value_name = "N")]
    preambled: Option<usize>,
}

#[derive(clap::Args)]
struct TestArgs {
    #[command(flatten)]
    selection: Selection,

    /// Seconds a block may stay silent on stdout before the run fails
    #[arg(long, value_name = "SECS")]
    block_timeout: Option<u64>,

    /// How to report a failure
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(clap::Args)]
struct ServeArgs {
    #[command(flatten)]
    selection: Selection,

    /// Address to listen on
    #[arg(long, value_name = "HOST:PORT")]
    address: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,mdrip={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load(config: &MdripConfig, selection: &Selection, block_timeout: Duration) -> Program {
    let label = selection
        .label
        .as_deref()
        .or(config.label.as_deref())
        .map(Label::new)
        .unwrap_or_default();
    let file_names = selection
        .files
        .iter()
        .map(|path| FileName::from(path.as_path()))
        .collect();
    Program::load_or_exit(block_timeout, label, file_names)
}

fn print(config: &MdripConfig, args: PrintArgs) -> Result<i32> {
    let program = load(config, &args.selection, config.block_timeout());
    let mut stdout = io::stdout().lock();
    let printed = match args.preambled {
        Some(n) => program.print_preambled(&mut stdout, n),
        None => program.print_normal(&mut stdout),
    };
    printed
        .and_then(|_| stdout.flush())
        .context("Fail to print program")?;
    Ok(0)
}

fn test(config: &MdripConfig, args: TestArgs) -> Result<i32> {
    let block_timeout = args
        .block_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.block_timeout());
    let program = load(config, &args.selection, block_timeout);
    let result = config.create_runner().run(&program)?;
    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text if !result.succeeded() => result
            .dump(&mut io::stderr().lock(), program.label())
            .context("Fail to report failure")?,
        Format::Text => {}
    }
    Ok(if result.succeeded() { 0 } else { 1 })
}

fn serve(config: &MdripConfig, args: ServeArgs) -> Result<i32> {
    let program = load(config, &args.selection, config.block_timeout());
    let address = args
        .address
        .unwrap_or_else(|| config.address().to_string());

    let mut shell = process::Command::new(config.shell())
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("Fail to start {}", config.shell()))?;
    let executor = shell.stdin.take().context("Fail to open shell stdin")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Fail to start async runtime")?;
    println!("Serving at http://{address}");
    println!();
    runtime.block_on(BlockServer::new(program, Box::new(executor)).serve(&address))?;

    // The server owned the shell's stdin; it is closed now, so the shell ends.
    shell.wait().context("Fail to wait for shell")?;
    Ok(0)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = MdripConfig::discover(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Print(args) => print(&config, args),
        Command::Test(args) => test(&config, args),
        Command::Serve(args) => serve(&config, args),
    });
    match outcome {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("mdrip: {err:#}");
            process::exit(2);
        }
    }
}
