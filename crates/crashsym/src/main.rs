use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use crashsym_core::hex::parse_hex_str;
use crashsym_core::symbols::{SymbolMap, SymbolMaps};
use crashsym_core::{Result as CrashsymResult, SymbolicatorBuilder, SymbolicatorConfig};
use crashsym_utils::{info, init_logging, LogConfig, LogFormat, LogLevel};

/// Symbolicate Apple crash reports and find the binaries to blame.
#[derive(Parser, Debug)]
#[command(name = "crashsym")]
#[command(version)]
#[command(about = "Symbolicate Apple crash reports and find the binaries to blame", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides CRASHSYM_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Annotate backtrace frames with symbol names and print the report
    Symbolicate
    {
        #[command(flatten)]
        input: InputArgs,
        /// External symbol map for one binary: IDENTIFIER=PATH[@BASE]
        #[arg(long = "map", value_name = "ID=PATH[@BASE]", value_parser = parse_map_arg)]
        maps: Vec<MapArg>,
        /// Report progress on stderr every N frames
        #[arg(long, value_name = "N")]
        progress: Option<usize>,
        /// Write the annotated report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the identifiers of the binaries blamed for the crash
    Blame
    {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args, Debug)]
struct InputArgs
{
    /// Crash report to read, or `-` for stdin
    report: String,
    /// Directory holding the device's filesystem (overrides CRASHSYM_SYSROOT)
    #[arg(long)]
    sysroot: Option<PathBuf>,
    /// dyld shared cache for the device (overrides CRASHSYM_SHARED_CACHE)
    #[arg(long)]
    shared_cache: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct MapArg
{
    identifier: String,
    path: PathBuf,
    base: Option<u64>,
}

fn parse_map_arg(value: &str) -> Result<MapArg, String>
{
    let (identifier, rest) = value
        .split_once('=')
        .ok_or_else(|| format!("expected IDENTIFIER=PATH[@BASE], got {value:?}"))?;
    if identifier.is_empty() || rest.is_empty() {
        return Err(format!("expected IDENTIFIER=PATH[@BASE], got {value:?}"));
    }

    let (path, base) = match rest.rsplit_once('@') {
        Some((path, base)) if is_hex_token(base) => (path, Some(parse_hex_str(base))),
        _ => (rest, None),
    };

    Ok(MapArg {
        identifier: identifier.to_string(),
        path: PathBuf::from(path),
        base,
    })
}

fn is_hex_token(text: &str) -> bool
{
    let digits = text.strip_prefix("0x").unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

fn main()
{
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().with_level(cli.log_level);
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Commands) -> CrashsymResult<()>
{
    match command {
        Commands::Symbolicate {
            input,
            maps,
            progress,
            output,
        } => {
            let report = read_report(&input.report)?;
            let mut builder = builder_for(&input)?.symbol_maps(load_maps(&maps)?);
            if let Some(stepping) = progress {
                builder = builder.progress_stepping(stepping);
            }

            let result = builder
                .build()
                .symbolicate_with_progress(&report, |progress| eprintln!("progress: {progress}"))?;
            info!(
                "Resolved {} of {} frames",
                result.resolved_frames, result.total_frames
            );

            match output {
                Some(path) => fs::write(path, &result.content)?,
                None => io::stdout().write_all(result.content.as_bytes())?,
            }
            for identifier in &result.blame {
                eprintln!("blame: {identifier}");
            }
            Ok(())
        }
        Commands::Blame { input } => {
            let report = read_report(&input.report)?;
            let blamed = builder_for(&input)?.build().blame_report(&report)?;
            let mut stdout = io::stdout().lock();
            for identifier in blamed {
                writeln!(stdout, "{identifier}")?;
            }
            Ok(())
        }
    }
}

/// Environment configuration with command-line overrides applied.
fn builder_for(input: &InputArgs) -> CrashsymResult<SymbolicatorBuilder>
{
    let mut config = SymbolicatorConfig::from_env()?;
    if input.sysroot.is_some() {
        config.sysroot.clone_from(&input.sysroot);
    }
    if input.shared_cache.is_some() {
        config.shared_cache.clone_from(&input.shared_cache);
    }
    Ok(SymbolicatorBuilder::from_config(&config))
}

fn load_maps(args: &[MapArg]) -> CrashsymResult<SymbolMaps>
{
    let mut maps = SymbolMaps::new();
    for arg in args {
        let map = SymbolMap::from_file(&arg.path, arg.base)?;
        info!("Loaded {} symbols for {} from {}", map.len(), arg.identifier, arg.path.display());
        maps.insert(arg.identifier.clone(), map);
    }
    Ok(maps)
}

fn read_report(source: &str) -> CrashsymResult<String>
{
    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(fs::read_to_string(source)?)
    }
}
