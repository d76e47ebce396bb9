// Run a register access script against a CIA and print the resulting trace.
//
//   cia-trace <script.json> [--config cfg.json] [--model MOS8521]
//
// Logging goes through env_logger (RUST_LOG=cia652x=trace for every event).

use std::path::PathBuf;
use std::process::ExitCode;

use cia652x::cia::interrupt::CiaModel;
use cia652x::config::CiaConfig;
use cia652x::trace;

struct Args {
    script: PathBuf,
    config: Option<PathBuf>,
    model: Option<CiaModel>,
}

fn parse_args() -> Result<Args, String> {
    let mut script = None;
    let mut config = None;
    let mut model = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config needs a file")?;
                config = Some(PathBuf::from(path));
            }
            "--model" => {
                let name = args.next().ok_or("--model needs a name")?;
                let parsed = serde_json::from_value(serde_json::Value::String(name.to_uppercase()))
                    .map_err(|_| format!("Unknown CIA model: {name}"))?;
                model = Some(parsed);
            }
            _ if arg.starts_with("--") => return Err(format!("Unknown option: {arg}")),
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            _ => return Err(format!("Unexpected argument: {arg}")),
        }
    }

    Ok(Args {
        script: script.ok_or("usage: cia-trace <script.json> [--config cfg.json] [--model NAME]")?,
        config,
        model,
    })
}

fn run() -> Result<(), String> {
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => CiaConfig::load(path)?,
        None => CiaConfig::default(),
    };
    if let Some(model) = args.model {
        config = config.with_model(model);
    }

    let script = trace::load_script(&args.script)?;
    log::info!(
        "Running {} accesses from {} on {:?}",
        script.len(),
        args.script.display(),
        config.model
    );

    let entries = trace::run_script(&config, &script)?;
    println!("{}", trace::to_json(&entries)?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[cia-trace] {e}");
            ExitCode::FAILURE
        }
    }
}
