use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use k2s_env::K2sContext;
use k2s_scan::DependencyExtractor;
use serde::Serialize;
use std::path::PathBuf;

mod bootstrap;
mod fetch;

use bootstrap::{bootstrap_env, prepare_get, BootstrapOptions, ReadyToLaunch};

const RESTART_NOTICE: &str =
    "conda was installed into this runtime. Restart the runtime and run the same command again.";

#[derive(Parser)]
#[command(name = "k2s")]
#[command(about = "Run Jupyter notebooks without installing their dependencies by hand", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the packages (and files) a notebook or script uses
    Deps(DepsArgs),

    /// Install a notebook's dependencies and register a kernel for it
    Install(InstallArgs),

    /// Download a notebook, install what it needs and open it in JupyterLab
    Get(GetArgs),
}

#[derive(Args)]
struct DepsArgs {
    /// Notebook (.ipynb) or Python script
    path: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Also list the local files the code reads
    #[arg(long)]
    files: bool,
}

#[derive(Args)]
struct InstallArgs {
    /// Notebook to install dependencies for
    notebook: PathBuf,

    /// Environment name (default: install into the active environment)
    #[arg(short, long)]
    name: Option<String>,

    /// Fail instead of installing conda when none is found
    #[arg(long)]
    no_install_conda: bool,
}

#[derive(Args)]
struct GetArgs {
    /// `org/repo/ref/path/to/notebook.ipynb` on GitHub, or a full URL
    url: String,

    /// Set up the environment but do not start JupyterLab
    #[arg(long)]
    no_launch: bool,
}

#[derive(Serialize)]
struct DepsOutput {
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_files: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // stdout is reserved for JSON
    if matches!(&cli.command, Commands::Deps(args) if args.json) {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let quiet = cli.quiet;
    match cli.command {
        Commands::Deps(args) => run_deps(args)?,
        Commands::Install(args) => run_install(args, quiet).await?,
        Commands::Get(args) => run_get(args, quiet).await?,
    }

    Ok(())
}

fn run_deps(args: DepsArgs) -> Result<()> {
    let mut extractor = DependencyExtractor::new()?;
    let found = extractor
        .from_path(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    let local_files: Vec<String> = found.local_files.into_iter().collect();
    if args.json {
        let output = DepsOutput {
            packages: found.packages.to_vec(),
            local_files: args.files.then_some(local_files),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for package in found.packages.iter() {
        println!("{package}");
    }
    if args.files && !local_files.is_empty() {
        println!();
        println!("Local files:");
        for file in &local_files {
            println!("  {file}");
        }
    }
    Ok(())
}

async fn run_install(args: InstallArgs, quiet: bool) -> Result<()> {
    let mut hint = format!("To resume: k2s install {}", args.notebook.display());
    if let Some(name) = &args.name {
        hint.push_str(&format!(" --name {name}"));
    }

    let outcome = interruptible(hint, move || {
        let ctx = K2sContext::from_env(quiet)?;
        bootstrap_env(
            &ctx,
            BootstrapOptions {
                notebook: &args.notebook,
                env_name: args.name.as_deref(),
                extra: Default::default(),
                also_install: &[],
                install_conda: !args.no_install_conda,
            },
        )
    })
    .await?;

    if outcome == k2s_env::ProvisionOutcome::RestartRequired {
        println!("{RESTART_NOTICE}");
    }
    Ok(())
}

async fn run_get(args: GetArgs, quiet: bool) -> Result<()> {
    let hint = format!("To resume: k2s get {}", args.url);
    let dest = std::env::current_dir().context("Failed to resolve the working directory")?;
    let url = args.url.clone();

    let ready = interruptible(hint, move || {
        let ctx = K2sContext::from_env(quiet)?;
        prepare_get(&ctx, &url, &dest)
    })
    .await?;

    let Some(ready) = ready else {
        println!("{RESTART_NOTICE}");
        return Ok(());
    };

    if args.no_launch {
        println!("To launch:\n\n{}", relaunch_command(&ready));
        return Ok(());
    }
    launch(ready).await
}

/// Run blocking provisioning work off the async runtime. Ctrl-C prints
/// `hint` and exits successfully; child processes share the terminal's
/// process group and receive the same interrupt.
async fn interruptible<T, F>(hint: String, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        joined = task => joined.context("Provisioning task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted. {hint}");
            std::process::exit(0);
        }
    }
}

fn relaunch_command(ready: &ReadyToLaunch) -> String {
    format!(
        "{} {}",
        ready.jupyter_lab.display(),
        ready.notebook.display()
    )
}

async fn launch(ready: ReadyToLaunch) -> Result<()> {
    println!("Launching Jupyter...");
    println!("To exit: CTRL + C");

    let mut child = tokio::process::Command::new(&ready.jupyter_lab)
        .arg(&ready.notebook)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", ready.jupyter_lab.display()))?;

    let status = tokio::select! {
        status = child.wait() => Some(status.context("Failed to wait for jupyter-lab")?),
        _ = tokio::signal::ctrl_c() => None,
    };

    match status {
        Some(status) if !status.success() => bail!("jupyter-lab exited with {status}"),
        Some(_) => {}
        None => {
            println!("Exiting...");
            let _ = child.kill().await;
            println!("\nTo launch again:\n\n{}", relaunch_command(&ready));
        }
    }
    Ok(())
}
