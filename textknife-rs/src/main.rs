use textknife::cli::{self, ConfigFile};
use textknife::config::EngineConfig;
use textknife::engine::{ScriptEngine, EXIT_ERROR};

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("textknife: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(EXIT_ERROR);
        }
    };
    if args.help {
        println!("{}", cli::USAGE);
        return;
    }

    init_tracing();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some((path.clone(), true)),
        ConfigFile::Search => EngineConfig::default_path().map(|p| (p, false)),
    };
    let mut config = match config_path {
        None => EngineConfig::default(),
        Some((path, required)) => match EngineConfig::load_file(&path) {
            Ok((config, errors)) => {
                for e in errors {
                    tracing::warn!("{}: {e}", path.display());
                }
                config
            }
            Err(e) if required => {
                eprintln!("textknife: cannot read config {}: {e}", path.display());
                std::process::exit(EXIT_ERROR);
            }
            Err(_) => EngineConfig::default(),
        },
    };

    if let Some(sigils) = args.sigils {
        config.sigils = sigils;
    }
    if let Some(depth) = args.max_call_depth {
        config.max_call_depth = depth;
    }
    if args.trace.is_some() {
        config.trace = args.trace.clone();
    }

    // ── Engine ────────────────────────────────────────────────────────────────
    let mut engine = ScriptEngine::new(config);
    if let Some(trace) = engine.config().trace.clone() {
        if let Err(e) = engine.set_trace(&trace) {
            eprintln!("textknife: {e}");
            std::process::exit(EXIT_ERROR);
        }
    }

    let name = args
        .script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.script.display().to_string());
    if let Err(e) = engine.load_script(&name, &args.script) {
        eprintln!("textknife: {e}");
        std::process::exit(EXIT_ERROR);
    }

    for (k, v) in cli::script_arg_vars(&args.script_args) {
        engine.define_variable(&k, v);
    }
    for (k, v) in &args.defines {
        engine.define_variable(k, v.as_str());
    }

    let code = engine.test_and_run();
    // Drop the engine so a buffered trace file is flushed before exiting.
    drop(engine);
    std::process::exit(code);
}
