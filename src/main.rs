//! Program Runtime CLI entry point.
//!
//! Deploys the programs listed in the configuration file into in-memory
//! storage and calls one exported function, printing the results as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use program_runtime_common::ids::decode_hex;
use program_runtime_common::{ConfigFile, MemoryStorage, ProgramId, Storage};
use program_runtime_core::{
    CallArg, ExecutionContext, Runtime, SupportedImports, WasmEngine,
};
use program_runtime_host::register_defaults;

/// Interval at which the engine epoch advances when epoch interruption is on.
const EPOCH_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Parser)]
#[command(name = "program-runtime", version, about = "Run metered WebAssembly programs")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "PROGRAM_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call an exported function of a deployed program.
    Call {
        /// Hex id of the program to run.
        program: String,

        /// Exported function to call.
        function: String,

        /// Units minted into the runtime's meter.
        #[arg(long, default_value_t = 1_000_000)]
        units: u64,

        /// Argument: `int:N`, `hex:BYTES` (passed as a pointer) or `self`
        /// (pointer to the program's own id). Repeat in call order.
        #[arg(long = "arg", value_name = "ARG")]
        args: Vec<String>,
    },

    /// List deployed programs.
    Programs,
}

/// A parsed `--arg`.
#[derive(Debug)]
enum CliArg {
    Int(i64),
    Bytes(Vec<u8>),
}

fn parse_arg(raw: &str, program: ProgramId) -> anyhow::Result<CliArg> {
    if raw == "self" {
        return Ok(CliArg::Bytes(program.as_bytes().to_vec()));
    }
    if let Some(value) = raw.strip_prefix("int:") {
        let value = value
            .parse()
            .with_context(|| format!("invalid integer argument '{raw}'"))?;
        return Ok(CliArg::Int(value));
    }
    if let Some(hex) = raw.strip_prefix("hex:") {
        let bytes = decode_hex(hex).with_context(|| format!("invalid hex argument '{raw}'"))?;
        return Ok(CliArg::Bytes(bytes));
    }
    bail!("unrecognized argument '{raw}', expected int:N, hex:BYTES or self")
}

/// Load every configured program into `storage`.
///
/// Relative paths resolve against the directory of the configuration file.
fn deploy(storage: &dyn Storage, file: &ConfigFile, base: &Path) -> anyhow::Result<()> {
    for entry in &file.programs {
        let id: ProgramId = entry
            .id
            .parse()
            .with_context(|| format!("invalid program id '{}'", entry.id))?;
        let path = base.join(&entry.path);
        let bytecode =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;

        info!(program_id = %id, path = %path.display(), bytes = bytecode.len(), "Program deployed");
        storage
            .set_program(id, bytecode)
            .with_context(|| format!("failed to deploy program {id}"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,program_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let (file, base) = match &cli.config {
        Some(path) => {
            let file = ConfigFile::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (file, base)
        }
        None => (ConfigFile::default(), PathBuf::new()),
    };

    let storage = Arc::new(MemoryStorage::new());
    deploy(storage.as_ref(), &file, &base)?;

    match cli.command {
        Command::Programs => {
            let programs: Vec<_> = file.programs.iter().map(|p| &p.id).collect();
            println!("{}", serde_json::to_string_pretty(&programs)?);
            Ok(())
        }
        Command::Call {
            program,
            function,
            units,
            args,
        } => run_call(&file, storage, &program, function, units, &args).await,
    }
}

async fn run_call(
    file: &ConfigFile,
    storage: Arc<MemoryStorage>,
    program: &str,
    function: String,
    units: u64,
    raw_args: &[String],
) -> anyhow::Result<()> {
    let program: ProgramId = program
        .parse()
        .with_context(|| format!("invalid program id '{program}'"))?;
    let bytecode = storage
        .get_program(&program)
        .with_context(|| format!("program {program} is not deployed"))?;
    let args = raw_args
        .iter()
        .map(|raw| parse_arg(raw, program))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let engine = WasmEngine::new(&file.runtime.engine).context("failed to create engine")?;
    let mut supported = SupportedImports::new();
    register_defaults(&mut supported, storage)?;
    let imports = supported.imports();

    let ticker = engine.is_epoch_enabled().then(|| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EPOCH_TICK);
            loop {
                interval.tick().await;
                engine.increment_epoch();
            }
        })
    });

    let ctx = ExecutionContext::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling call");
            cancel.cancel();
        }
    });

    let execution = file.runtime.execution.clone();
    let output = tokio::task::spawn_blocking(move || -> anyhow::Result<serde_json::Value> {
        let mut rt = Runtime::new(&engine, &execution, imports, program);
        rt.initialize(&ctx, &bytecode, units)?;

        let mut call_args = Vec::with_capacity(args.len());
        for arg in args {
            call_args.push(match arg {
                CliArg::Int(value) => CallArg::Int(value),
                CliArg::Bytes(bytes) => CallArg::Ptr(rt.memory()?.write_bytes(&bytes)?),
            });
        }

        let results = rt.call(&ctx, &function, &call_args)?;
        rt.stop();

        Ok(serde_json::json!({
            "program": program.to_hex(),
            "function": function,
            "results": results,
            "remaining_units": rt.meter().balance(),
        }))
    })
    .await
    .context("call task panicked")??;

    if let Some(ticker) = ticker {
        ticker.abort();
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
