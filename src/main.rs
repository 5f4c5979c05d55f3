//! Serial Studio CLI
//!
//! Headless front end for the session pipeline: connect to a serial port,
//! stream the decoded log, run macros and manage automation rules.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serial_studio_core::cli::{print_exit_codes, CliResult, EventPrinter, OutputFormat};
use serial_studio_core::config::{self, AppConfig, ConfigError, JsonFileStore};
use serial_studio_core::core::codec::{DisplayMode, RgbRemainder, TextEncoding};
use serial_studio_core::core::logger::TimestampMode;
use serial_studio_core::core::macros::{Macro, MacroScheduler};
use serial_studio_core::core::session::{PayloadFormat, SessionController, TxOrigin};
use serial_studio_core::core::simulator::DemoProducer;
use serial_studio_core::core::transport::{list_ports, ConnectionError, SerialFlowControl, SerialParity};
use serial_studio_core::core::trigger::{AutoReplyRule, HighlightRule, TriggerManager};
use serial_studio_core::core::workspace::AutomationBundle;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Serial Studio CLI
#[derive(Parser, Debug)]
#[command(
    name = "serial-studio",
    version,
    about = "Live serial terminal with telemetry extraction, macros and auto-replies",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SERIAL_STUDIO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Also write diagnostics to a daily rolling file
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Receive pipeline flags shared by `connect` and `demo`
#[derive(clap::Args, Debug, Clone)]
struct PipelineArgs {
    /// Display mode (text, hex, decimal, rgb)
    #[arg(long)]
    mode: Option<DisplayMode>,

    /// Text encoding (utf8, gbk)
    #[arg(long)]
    encoding: Option<TextEncoding>,

    /// Extract key:value telemetry
    #[arg(long)]
    chart: bool,

    /// Timestamp labels (absolute, delta)
    #[arg(long, value_parser = parse_timestamps)]
    timestamps: Option<TimestampMode>,

    /// Keep trailing RGB bytes for the next chunk
    #[arg(long)]
    rgb_carry: bool,

    /// Write the log as plain text on exit
    #[arg(long)]
    export_log: Option<PathBuf>,

    /// Mirror the log to a file while running
    #[arg(long)]
    capture: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Connect to a serial port and stream the log
    Connect {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Data bits (5-8)
        #[arg(long)]
        data_bits: Option<u8>,

        /// Parity (none, odd, even)
        #[arg(long)]
        parity: Option<SerialParity>,

        /// Stop bits (1, 2)
        #[arg(long)]
        stop_bits: Option<u8>,

        /// Flow control (none, hw, sw)
        #[arg(long, value_parser = parse_flow)]
        flow: Option<SerialFlowControl>,

        /// Send stdin lines as hex
        #[arg(long)]
        hex: bool,

        /// Do not append a line break to stdin lines
        #[arg(long)]
        no_newline: bool,

        /// Send one command, wait, then exit
        #[arg(short = 'c', long)]
        command: Option<String>,

        /// Wait for the response to `--command` (ms)
        #[arg(long, default_value = "1000")]
        wait: u64,

        /// Invoke a stored macro by label after connecting
        #[arg(short = 'm', long = "macro")]
        macros: Vec<String>,

        /// Exit after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run the demo producer without hardware
    Demo {
        /// Run for this many seconds
        #[arg(long, default_value = "10")]
        duration: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Manage stored macros
    Macros {
        #[command(subcommand)]
        action: MacroAction,
    },

    /// Manage auto-reply and highlight rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum MacroAction {
    /// List macros
    List,
    /// Add a macro
    Add {
        label: String,
        command: String,
        /// Command is hex digits
        #[arg(long)]
        hex: bool,
        /// Polling interval (ms); 0 for one-shot
        #[arg(long, default_value = "0")]
        interval: i64,
    },
    /// Remove a macro by label
    Remove { label: String },
}

#[derive(Subcommand, Debug)]
enum RuleAction {
    /// List auto-reply and highlight rules
    List,
    /// Add an auto-reply rule
    AddReply { pattern: String, reply: String },
    /// Remove an auto-reply rule by index
    RemoveReply { index: usize },
    /// Add a highlight rule
    AddHighlight { word: String, class: String },
    /// Remove a highlight rule by index
    RemoveHighlight { index: usize },
    /// Export macros and auto-replies to a JSON file
    Export { file: PathBuf },
    /// Replace macros and auto-replies from a JSON file
    Import { file: PathBuf },
}

fn parse_timestamps(s: &str) -> Result<TimestampMode, String> {
    match s.to_lowercase().as_str() {
        "absolute" | "abs" => Ok(TimestampMode::Absolute),
        "delta" => Ok(TimestampMode::Delta),
        other => Err(format!("unknown timestamp mode: {other}")),
    }
}

fn parse_flow(s: &str) -> Result<SerialFlowControl, String> {
    match s.to_lowercase().as_str() {
        "none" => Ok(SerialFlowControl::None),
        "hw" | "hardware" | "rtscts" => Ok(SerialFlowControl::Hardware),
        "sw" | "software" | "xonxoff" => Ok(SerialFlowControl::Software),
        other => Err(format!("unknown flow control: {other}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut app_config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return CliResult::from(e).to_exit_code();
        }
    };
    if cli.log_file {
        app_config.logging.file = true;
    }
    let _log_guard = init_tracing(&cli, &app_config);

    tracing::debug!("Starting serial-studio v{}", serial_studio_core::VERSION);

    let result = match &cli.command {
        Commands::ListPorts { detailed } => show_ports(&cli, *detailed),
        Commands::Connect { .. } => run_connect(&cli, &app_config).await,
        Commands::Demo { duration, pipeline } => run_demo(&cli, &app_config, *duration, pipeline).await,
        Commands::Macros { action } => handle_macros(&cli, action),
        Commands::Rules { action } => handle_rules(&cli, action),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(())
        }
    };

    let outcome = match result {
        Ok(()) => CliResult::success(),
        Err(e) => e.into(),
    };
    if let Some(message) = outcome.message() {
        if !outcome.is_success() {
            eprintln!("error: {message}");
        }
    }
    outcome.to_exit_code()
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load().or_else(|e| match e {
            ConfigError::NoConfigDir => Ok(AppConfig::default()),
            other => Err(other),
        }),
    }
}

fn init_tracing(cli: &Cli, app_config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        app_config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match (&app_config.logging.directory, app_config.logging.file) {
        (Some(dir), true) => {
            let appender = tracing_appender::rolling::daily(dir, "serial-studio.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn open_store() -> anyhow::Result<Arc<JsonFileStore>> {
    Ok(Arc::new(JsonFileStore::open_default()?))
}

fn build_session(app_config: &AppConfig, pipeline: &PipelineArgs, rules: Arc<TriggerManager>) -> anyhow::Result<SessionController> {
    let mut session_config = app_config.session_config();
    if let Some(mode) = pipeline.mode {
        session_config.display_mode = mode;
    }
    if let Some(encoding) = pipeline.encoding {
        session_config.encoding = encoding;
    }
    if let Some(timestamps) = pipeline.timestamps {
        session_config.timestamp_mode = timestamps;
    }
    if pipeline.chart {
        session_config.charting = true;
    }
    if pipeline.rgb_carry {
        session_config.rgb_remainder = RgbRemainder::Carry;
    }

    let session = SessionController::new(session_config, rules);
    if let Some(path) = &pipeline.capture {
        session
            .start_capture(path)
            .with_context(|| format!("cannot capture to {}", path.display()))?;
    }
    Ok(session)
}

/// Print events until `shutdown` fires
fn spawn_printer(cli: &Cli, session: &SessionController, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut events = session.subscribe();
    let timestamps = !cli.quiet;
    let format = cli.format;
    tokio::spawn(async move {
        let mut printer = EventPrinter::new(std::io::stdout(), format, timestamps);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if printer.print(&event).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "output fell behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        let _ = printer.finish();
    })
}

fn install_ctrlc(shutdown: &CancellationToken) -> anyhow::Result<()> {
    let token = shutdown.clone();
    ctrlc::set_handler(move || token.cancel()).context("cannot install Ctrl+C handler")?;
    Ok(())
}

fn finish_session(session: &SessionController, pipeline: &PipelineArgs) -> anyhow::Result<()> {
    session.stop_capture();
    if let Some(path) = &pipeline.export_log {
        std::fs::write(path, session.export_log())
            .with_context(|| format!("cannot export log to {}", path.display()))?;
    }
    Ok(())
}

fn print_telemetry(cli: &Cli, session: &SessionController) -> anyhow::Result<()> {
    let telemetry = session.telemetry_snapshot();
    if telemetry.is_empty() || cli.quiet {
        return Ok(());
    }
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "series": telemetry })),
        OutputFormat::Text => {
            eprintln!("{:<16} {:>8} {:>12} {:>12} {:>12}", "Series", "Samples", "Last", "Min", "Max");
            for (key, values) in &telemetry {
                let last = values.last().copied().unwrap_or_default();
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                eprintln!("{key:<16} {:>8} {last:>12.3} {min:>12.3} {max:>12.3}", values.len());
            }
        }
    }
    Ok(())
}

fn show_ports(cli: &Cli, detailed: bool) -> anyhow::Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(())
}

async fn run_connect(cli: &Cli, app_config: &AppConfig) -> anyhow::Result<()> {
    let Commands::Connect {
        port,
        baud,
        data_bits,
        parity,
        stop_bits,
        flow,
        hex,
        no_newline,
        command,
        wait,
        macros,
        timeout,
        pipeline,
    } = &cli.command
    else {
        unreachable!("run_connect called for another command");
    };

    let port = port
        .clone()
        .or_else(|| app_config.serial.port.clone())
        .ok_or_else(|| ConnectionError::Unsupported("no port selected (use --port)".to_string()))?;

    let mut options = app_config.serial.options();
    if let Some(baud) = baud {
        options.baud_rate = *baud;
    }
    if let Some(bits) = data_bits {
        options.data_bits = *bits;
    }
    if let Some(parity) = parity {
        options.parity = *parity;
    }
    if let Some(bits) = stop_bits {
        options.stop_bits = *bits;
    }
    if let Some(flow) = flow {
        options.flow_control = *flow;
    }

    let store = open_store()?;
    let rules = Arc::new(TriggerManager::load(store.clone())?);
    let session = build_session(app_config, pipeline, rules)?;

    let shutdown = CancellationToken::new();
    install_ctrlc(&shutdown)?;
    let printer = spawn_printer(cli, &session, shutdown.clone());

    if !cli.quiet {
        eprintln!("Connecting to {port} @ {} baud ({})...", options.baud_rate, options.frame());
    }
    if let Err(e) = session.connect_port(&port, &options).await {
        shutdown.cancel();
        let _ = printer.await;
        return Err(e.into());
    }
    if !cli.quiet {
        eprintln!("Connected. Press Ctrl+C to exit.");
    }

    let scheduler = MacroScheduler::load(store, Arc::new(session.clone()))?;
    for label in macros {
        let item = scheduler
            .find(label)
            .with_context(|| format!("no macro labelled {label:?}"))?;
        let invocation = scheduler.invoke(item.id).await?;
        tracing::info!(%label, ?invocation, "macro invoked");
    }

    let format = if *hex { PayloadFormat::Hex } else { PayloadFormat::Text };
    let newline = !*no_newline && !*hex && app_config.serial.append_newline;

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(*secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = if let Some(cmd) = command {
        let sent = send_input(&session, cmd, format, newline).await;
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(Duration::from_millis(*wait)) => {}
        }
        sent
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                () = &mut deadline => break Ok(()),
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = send_input(&session, &line, format, newline).await {
                            // malformed input is reported and the session keeps running
                            tracing::warn!(error = %e, "send failed");
                            if !session.is_connected() {
                                break Err(e);
                            }
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => break Err(e.into()),
                },
            }
        }
    };

    scheduler.stop_all();
    session.disconnect().await;
    shutdown.cancel();
    let _ = printer.await;

    print_telemetry(cli, &session)?;
    finish_session(&session, pipeline)?;
    if !cli.quiet {
        let stats = session.stats();
        eprintln!("Disconnected. RX {} bytes, TX {} bytes.", stats.rx_bytes, stats.tx_bytes);
    }
    outcome
}

async fn send_input(session: &SessionController, line: &str, format: PayloadFormat, newline: bool) -> anyhow::Result<()> {
    match format {
        PayloadFormat::Hex => session.send(line, format, TxOrigin::User).await?,
        PayloadFormat::Text => session.send_line(line, newline, TxOrigin::User).await?,
    };
    Ok(())
}

async fn run_demo(cli: &Cli, app_config: &AppConfig, duration: u64, pipeline: &PipelineArgs) -> anyhow::Result<()> {
    let rules = match open_store() {
        Ok(store) => TriggerManager::load(store)?,
        Err(e) => {
            tracing::warn!(error = %e, "rule store unavailable, running without rules");
            TriggerManager::load(Arc::new(config::MemoryStore::new()))?
        }
    };
    let mut pipeline = pipeline.clone();
    if pipeline.mode.is_none() {
        pipeline.chart = true;
    }
    let session = build_session(app_config, &pipeline, Arc::new(rules))?;

    let shutdown = CancellationToken::new();
    install_ctrlc(&shutdown)?;
    let printer = spawn_printer(cli, &session, shutdown.clone());

    let producer = DemoProducer::new(session.clone()).with_tick(Duration::from_millis(app_config.demo.tick_ms.max(1)));
    producer.start();

    tokio::select! {
        () = shutdown.cancelled() => {}
        () = tokio::time::sleep(Duration::from_secs(duration)) => {}
    }

    producer.stop();
    // let the producer log its stop notice
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let _ = printer.await;

    print_telemetry(cli, &session)?;
    finish_session(&session, &pipeline)
}

fn handle_macros(cli: &Cli, action: &MacroAction) -> anyhow::Result<()> {
    let store = open_store()?;
    let sink = Arc::new(SessionController::new(
        Default::default(),
        Arc::new(TriggerManager::load(Arc::new(config::MemoryStore::new()))?),
    ));
    let scheduler = MacroScheduler::load(store, sink)?;

    match action {
        MacroAction::List => {
            let macros = scheduler.list();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&macros)?),
                OutputFormat::Text => {
                    if macros.is_empty() && !cli.quiet {
                        println!("No macros defined.");
                    }
                    for m in &macros {
                        let kind = if m.is_polling() {
                            format!("every {} ms", m.interval_ms)
                        } else {
                            "one-shot".to_string()
                        };
                        let hex = if m.is_hex { " [HEX]" } else { "" };
                        println!("{:<16} {:<14} {}{hex}", m.label, kind, m.command.escape_debug());
                    }
                }
            }
        }
        MacroAction::Add { label, command, hex, interval } => {
            let mut item = Macro::new(label, &unescape(command)).every(*interval);
            if *hex {
                serial_studio_core::core::codec::parse_hex_payload(command)?;
                item = item.hex();
            }
            scheduler.add(item)?;
        }
        MacroAction::Remove { label } => {
            let item = scheduler
                .find(label)
                .with_context(|| format!("no macro labelled {label:?}"))?;
            scheduler.remove(item.id)?;
        }
    }
    Ok(())
}

fn handle_rules(cli: &Cli, action: &RuleAction) -> anyhow::Result<()> {
    let store = open_store()?;
    let rules = TriggerManager::load(store.clone())?;

    match action {
        RuleAction::List => match cli.format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "autoReplies": rules.auto_replies(),
                    "highlights": rules.highlights(),
                }))?
            ),
            OutputFormat::Text => {
                println!("Auto-replies:");
                for (i, rule) in rules.auto_replies().iter().enumerate() {
                    println!("  {i:>3}  {:?} -> {:?}", rule.match_text, rule.reply);
                }
                println!("Highlights:");
                for (i, rule) in rules.highlights().iter().enumerate() {
                    println!("  {i:>3}  {:?} ({})", rule.word, rule.class);
                }
            }
        },
        RuleAction::AddReply { pattern, reply } => {
            rules.add_auto_reply(AutoReplyRule::new(pattern, &unescape(reply)))?;
        }
        RuleAction::RemoveReply { index } => {
            rules
                .remove_auto_reply(*index)?
                .with_context(|| format!("no auto-reply at index {index}"))?;
        }
        RuleAction::AddHighlight { word, class } => {
            rules.add_highlight(HighlightRule::new(word, class))?;
        }
        RuleAction::RemoveHighlight { index } => {
            rules
                .remove_highlight(*index)?
                .with_context(|| format!("no highlight at index {index}"))?;
        }
        RuleAction::Export { file } => {
            let sink = Arc::new(SessionController::new(Default::default(), Arc::new(TriggerManager::load(store.clone())?)));
            let scheduler = MacroScheduler::load(store, sink)?;
            AutomationBundle::capture(&scheduler, &rules).save(file)?;
            if !cli.quiet {
                eprintln!("Exported to {}", file.display());
            }
        }
        RuleAction::Import { file } => {
            let bundle = AutomationBundle::load(file)?;
            let sink = Arc::new(SessionController::new(Default::default(), Arc::new(TriggerManager::load(store.clone())?)));
            let scheduler = MacroScheduler::load(store, sink)?;
            bundle.apply(&scheduler, &rules)?;
            if !cli.quiet {
                eprintln!(
                    "Imported {} macros and {} auto-replies",
                    bundle.macros.len(),
                    bundle.auto_replies.len()
                );
            }
        }
    }
    Ok(())
}

/// Expand `\n`, `\r` and `\t` typed on the command line
fn unescape(s: &str) -> String {
    s.replace("\\r", "\r").replace("\\n", "\n").replace("\\t", "\t")
}
