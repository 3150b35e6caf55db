use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use relocator_config::{init_tracing, RelocationConfig, RelocatorConfig, Strategy, CONFIG_FILE_NAME};
use relocator_engine::archive::{AuditSink, DumpDirectory};
use relocator_engine::Relocator;
use relocator_hierarchy::{ClasspathSource, HierarchyResolver, JdkSource};

mod containers;

#[derive(Parser)]
#[command(
    name = "relocator",
    version,
    about = "Rename Java namespaces (javax -> jakarta) inside compiled classes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relocate every class in a directory tree or a jar
    Rewrite(RewriteArgs),
}

#[derive(Args)]
struct RewriteArgs {
    /// Class directory or `.jar` to rewrite
    input: PathBuf,
    /// Where to write the result (defaults to rewriting the input in place)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// `SRC=DST` prefix rename, repeatable; replaces the configured table
    #[arg(long = "relocate", value_name = "SRC=DST")]
    relocations: Vec<String>,
    /// Keep original stack map frames instead of recomputing them
    #[arg(long)]
    fast: bool,
    /// Directory or jar consulted for type hierarchy lookups, repeatable
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// JDK home supplying platform classes (defaults to `JAVA_HOME`, then `java` on `PATH`)
    #[arg(long, value_name = "DIR")]
    jdk: Option<PathBuf>,
    /// Also write every changed class under this directory
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,
    /// Configuration file (defaults to `relocator.toml` when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Rewrite(args) => rewrite(args),
    }
}

fn rewrite(args: RewriteArgs) -> Result<i32> {
    let config = load_config(&args)?;
    init_tracing(&config.logging);

    // The input goes first so its own classes shadow the extra classpath.
    let mut classpath = vec![args.input.clone()];
    classpath.extend(args.classpath.iter().cloned());
    let mut source = ClasspathSource::from_paths(&classpath).context("failed to open classpath")?;
    // Platform classes come last; without them Safe frames widen JDK types to Object.
    match &args.jdk {
        Some(home) => source.push(
            JdkSource::open(home).with_context(|| format!("failed to open JDK {}", home.display()))?,
        ),
        None => match JdkSource::discover() {
            Ok(jdk) => source.push(jdk),
            Err(err) => tracing::warn!(
                target: "relocator.cli",
                error = %err,
                "no JDK found; merges of platform types fall back to java/lang/Object"
            ),
        },
    }

    let mapper = Arc::new(config.mapper());
    let resolver = HierarchyResolver::new(Arc::new(source)).with_remapper(mapper.clone());
    let relocator = Relocator::new(mapper, Arc::new(resolver), config.options());

    let dump = args.dump.map(DumpDirectory::new);
    let audit = dump.as_ref().map(|dump| dump as &dyn AuditSink);
    let output = args.output.as_deref().unwrap_or(&args.input);

    tracing::info!(
        target: "relocator.cli",
        input = %args.input.display(),
        output = %output.display(),
        relocations = relocator.mapper().relocations().len(),
        "rewriting"
    );
    let summary = containers::rewrite_path(&relocator, &args.input, output, audit)?;
    println!("{summary}");
    Ok(if summary.failed > 0 { 1 } else { 0 })
}

fn load_config(args: &RewriteArgs) -> Result<RelocatorConfig> {
    let mut config = match &args.config {
        Some(path) => RelocatorConfig::load_from_path(path)?,
        None if Path::new(CONFIG_FILE_NAME).is_file() => {
            RelocatorConfig::load_from_path(CONFIG_FILE_NAME)?
        }
        None => RelocatorConfig::default(),
    };

    let relocations = args
        .relocations
        .iter()
        .map(|pair| RelocationConfig::parse_pair(pair))
        .collect::<Result<Vec<_>, _>>()?;
    config.set_relocations(relocations)?;
    if args.fast {
        config.strategy = Strategy::Fast;
    }
    Ok(config)
}
