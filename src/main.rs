//! `tableorder-kitchen`: terminal kitchen display.
//!
//! Usage: `tableorder-kitchen [config.json]` (or `TABLEORDER_CONFIG`).

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use tableorder_live::diagnostics;
use tableorder_live::{DisplayEvent, KitchenDisplay, LiveConfig, QueueSnapshot, TerminalBell};

const HELP: &str = "commands: auth | ack | done order <id> | done call <id> | list | quit";

enum Command {
    Authorize,
    Acknowledge,
    DoneOrder(i64),
    DoneCall(i64),
    List,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let id = |raw: &str| raw.parse::<i64>().with_context(|| format!("not an id: {raw}"));
    match words.as_slice() {
        ["auth"] => Ok(Command::Authorize),
        ["ack"] => Ok(Command::Acknowledge),
        ["done", "order", raw] => Ok(Command::DoneOrder(id(*raw)?)),
        ["done", "call", raw] => Ok(Command::DoneCall(id(*raw)?)),
        ["list"] | ["ls"] => Ok(Command::List),
        ["quit"] | ["exit"] | ["q"] => Ok(Command::Quit),
        _ => bail!("unknown command: {line}"),
    }
}

fn print_queue(queue: &QueueSnapshot) {
    println!("-- orders ({}) --", queue.orders.len());
    for order in &queue.orders {
        let number = order
            .daily_number
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| format!("id {}", order.id));
        println!("{number} [{}] {} (id {})", order.table_label(), order.created_at, order.id);
        for item in &order.items {
            println!("    {} x{}", item.menu_name, item.quantity);
            if let Some(options) = item.options.as_deref().filter(|o| !o.is_empty()) {
                for line in options.lines() {
                    println!("      {line}");
                }
            }
        }
    }
    println!("-- calls ({}) --", queue.calls.len());
    for call in &queue.calls {
        println!(
            "[{}] {} {} (id {})",
            call.table_label(),
            call.message,
            call.created_at,
            call.id
        );
    }
}

fn print_event(event: &DisplayEvent) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        DisplayEvent::ItemArrived { kind, id } => println!("{now} new {kind} (id {id})"),
        DisplayEvent::ItemCompleted { kind, id } => println!("{now} {kind} {id} done"),
        DisplayEvent::CompletionFailed { kind, id, error } => {
            println!("{now} could not complete {kind} {id}: {error}")
        }
        DisplayEvent::QueueReplaced { orders, calls } => {
            println!("{now} queue loaded: {orders} orders, {calls} calls")
        }
        DisplayEvent::ConnectionChanged { state } => println!("{now} connection: {state:?}"),
        DisplayEvent::AlarmChanged { state } => println!("{now} alarm: {state:?}"),
    }
}

async fn run_command(display: &KitchenDisplay, command: Command) -> bool {
    match command {
        Command::Authorize => {
            if display.authorize_audio() {
                println!("audio enabled");
            } else {
                println!("audio not available on this terminal");
            }
        }
        Command::Acknowledge => display.acknowledge_alarm(),
        Command::DoneOrder(id) => {
            if let Err(e) = display.complete_order(id).await {
                println!("{e}");
            }
        }
        Command::DoneCall(id) => {
            if let Err(e) = display.complete_call(id).await {
                println!("{e}");
            }
        }
        Command::List => print_queue(&display.queue()),
        Command::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("TABLEORDER_CONFIG"))
        .map(PathBuf::from);

    let _log_guard = diagnostics::init_logging(&diagnostics::get_log_dir())
        .context("failed to initialise logging")?;

    let config = LiveConfig::load(config_path.as_deref()).context("invalid configuration")?;
    let display = Arc::new(
        KitchenDisplay::from_config(&config, Arc::new(TerminalBell::new()))
            .context("failed to set up kitchen display")?,
    );

    let mut events = display.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    display.start();
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => {
                        if !run_command(&display, command).await {
                            break;
                        }
                    }
                    Err(e) => println!("{e}\n{HELP}"),
                }
            }
        }
    }

    display.shutdown().await;
    printer.abort();
    Ok(())
}
