use callscreen::config::Config;
use callscreen::engine::DecisionEngine;
use callscreen::notify::LogNotifier;
use callscreen::persistence::FileStore;
use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG_PATH: &str = "/etc/callscreen.yaml";

#[derive(Serialize)]
struct ScreenedCall<'a> {
    number: Option<&'a str>,
    scheme: &'a str,
    block: bool,
    reason: &'a str,
}

#[tokio::main]
async fn main() {
    let matches = Command::new("callscreen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time call screening for VoIP calls")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("FILE")
                .help("Override the block/allow list file from the configuration")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .value_name("NUMBER")
                .help("Screen a single call and print the verdict")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("scheme")
                .long("scheme")
                .value_name("SCHEME")
                .help("Transport scheme for --check")
                .default_value("sip"),
        )
        .arg(
            Arg::new("block")
                .long("block")
                .value_name("NUMBER")
                .help("Add a number to the block list (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("allow")
                .long("allow")
                .value_name("NUMBER")
                .help("Add a number to the allow list (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .help("Print the block and allow lists")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Screen calls read from stdin, one \"SCHEME [NUMBER]\" per line")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging of every decision")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if let Some(store) = matches.get_one::<String>("store") {
        config.store_path = store.clone();
    }

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        println!("  Screening enabled: {}", config.enabled);
        println!("  Block anonymous callers: {}", config.block_anonymous);
        println!("  Decision cache capacity: {}", config.cache_capacity);
        println!("  Background queue capacity: {}", config.queue_capacity);
        println!("  List store: {}", config.store_path);
        println!("✅ Configuration is valid");
        return;
    }

    let engine = DecisionEngine::new(
        &config,
        Arc::new(FileStore::new(&config.store_path)),
        Arc::new(LogNotifier),
    );

    let mut mutated = false;
    if let Some(numbers) = matches.get_many::<String>("block") {
        for number in numbers {
            engine.add_blocked_number(number);
            mutated = true;
        }
    }
    if let Some(numbers) = matches.get_many::<String>("allow") {
        for number in numbers {
            engine.add_allowed_number(number);
            mutated = true;
        }
    }
    if mutated {
        engine.flush().await;
        println!("✅ Lists updated in {}", config.store_path);
    }

    if let Some(number) = matches.get_one::<String>("check") {
        let scheme = matches
            .get_one::<String>("scheme")
            .map(String::as_str)
            .unwrap_or("sip");
        let verdict = engine.evaluate(Some(number), Some(scheme));
        if verdict.block {
            println!("❌ BLOCK {number} via {scheme}: {}", verdict.reason);
        } else {
            println!("✅ ALLOW {number} via {scheme}: {}", verdict.reason);
        }
        engine.flush().await;
    }

    if matches.get_flag("list") {
        print_lists(&engine);
    }

    if matches.get_flag("serve") {
        if let Err(e) = serve(&engine).await {
            eprintln!("Error reading calls: {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if path == DEFAULT_CONFIG_PATH && !std::path::Path::new(path).exists() {
        log::info!("No configuration at {path}, using defaults");
        return Ok(Config::default());
    }
    Config::from_file(path)
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => println!("✅ Default configuration written to: {path}"),
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn print_lists(engine: &DecisionEngine) {
    let blocked = engine.blocked_numbers();
    let allowed = engine.allowed_numbers();

    println!("🚫 Blocked numbers ({}):", blocked.len());
    for number in &blocked {
        println!("  • {number}");
    }
    println!("✅ Allowed numbers ({}):", allowed.len());
    for number in &allowed {
        println!("  • {number}");
    }
}

/// Line protocol on stdin:
///   `SCHEME [NUMBER]`  screen a call, prints one JSON verdict
///   `block NUMBER` / `allow NUMBER`  queue a list change
///   `clear-cache`, `stats`, `reset-stats`
async fn serve(engine: &DecisionEngine) -> anyhow::Result<()> {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    log::info!("Reading calls from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_rx.recv() => {
                log::info!("Received shutdown signal, flushing pending work...");
                None
            }
        };
        let Some(line) = line else { break };

        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else { continue };
        let argument = parts.next();

        match (command.to_ascii_lowercase().as_str(), argument) {
            ("block", Some(number)) => engine.add_blocked_number(number),
            ("allow", Some(number)) => engine.add_allowed_number(number),
            ("clear-cache", _) => engine.clear_cache(),
            ("stats", _) => println!("{}", serde_json::to_string(&engine.stats())?),
            ("reset-stats", _) => println!("{}", serde_json::to_string(&engine.reset_stats())?),
            (_, number) => {
                let verdict = engine.evaluate(number, Some(command));
                let record = ScreenedCall {
                    number,
                    scheme: command,
                    block: verdict.block,
                    reason: verdict.reason_str(),
                };
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    engine.flush().await;
    let stats = engine.stats();
    println!("{}", serde_json::to_string(&stats)?);
    log::info!(
        "Screened {} calls, blocked {}, cache hit rate {:.1}%",
        stats.evaluations,
        stats.blocked,
        stats.cache_hit_rate() * 100.0
    );
    Ok(())
}
