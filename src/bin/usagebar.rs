use anyhow::{anyhow, Context, Result};

use usagebar::config::ProfileConfig;
use usagebar::orchestrator::Pipeline;
use usagebar::plan;
use usagebar::summary::UsageSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug)]
struct CliArgs {
    command: String,
    format: OutputFormat,
    pretty: bool,
}

#[tokio::main]
async fn main() {
    usagebar::init_logging();

    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("usagebar {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match args.command.as_str() {
        "summary" => run_summary(args).await,
        "watch" => run_watch(args).await,
        _ => Err(anyhow!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(err) = result {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut format = OutputFormat::Text;
    let mut pretty = false;
    let mut command = String::new();

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }
    if command.is_empty() {
        command = "summary".to_string();
    }

    for arg in argv {
        match arg.as_str() {
            "--json" => format = OutputFormat::Json,
            "--pretty" => pretty = true,
            "--help" | "-h" | "--version" | "-V" => {
                command = arg;
                break;
            }
            _ => {}
        }
    }

    CliArgs {
        command,
        format,
        pretty,
    }
}

async fn run_summary(args: CliArgs) -> Result<()> {
    for profile in ProfileConfig::discover() {
        let name = profile.name.clone();
        let pipeline = Pipeline::new(profile);
        match pipeline.refresh().await {
            Some(summary) => print_summary(&name, &summary, args.format, args.pretty)?,
            None => return Err(anyhow!("refresh already in flight for {name}")),
        }
    }
    Ok(())
}

async fn run_watch(args: CliArgs) -> Result<()> {
    let profiles = ProfileConfig::discover();
    if profiles.is_empty() {
        return Err(anyhow!("no profiles found"));
    }

    for profile in profiles {
        let name = profile.name.clone();
        let pipeline = Pipeline::new(profile);
        let mut updates = pipeline.subscribe();

        tokio::spawn(pipeline.run());
        tokio::spawn(async move {
            while let Ok(summary) = updates.recv().await {
                if print_summary(&name, &summary, args.format, args.pretty).is_err() {
                    break;
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")
}

fn print_summary(
    name: &str,
    summary: &UsageSummary,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let rendered = if pretty {
                serde_json::to_string_pretty(summary)
            } else {
                serde_json::to_string(summary)
            }?;
            println!("{rendered}");
        }
        OutputFormat::Text => {
            println!("{name}");
            if summary.estimated_percentage < 0.0 {
                println!("  no usage data available");
                return Ok(());
            }
            let plan_name = plan::display_name(&summary.tier);
            if !plan_name.is_empty() {
                println!("  plan: {plan_name}");
            }
            let source = if summary.is_live { "live" } else { "estimated" };
            println!(
                "  usage: {:.1}% ({source})",
                summary.estimated_percentage
            );
            println!(
                "  weekly tokens: {} / {}",
                summary.weekly_tokens_used, summary.weekly_token_limit
            );
            println!(
                "  today: {} messages, {} tokens, {} sessions",
                summary.today.messages, summary.today.tokens, summary.today.sessions
            );
            println!("  burn rate: {}", summary.daily_burn_rate_text);
            println!("  runway: {}", summary.runway_text);
            println!("  session runway: {}", summary.session_runway_text);
        }
    }
    Ok(())
}

fn print_help() {
    println!("usagebar - Claude Code usage estimator");
    println!();
    println!("USAGE:");
    println!("  usagebar [summary|watch] [--json] [--pretty]");
    println!();
    println!("COMMANDS:");
    println!("  summary   Run one reconciliation pass per profile and print it (default)");
    println!("  watch     Keep refreshing on file changes and a poll timer, printing updates");
    println!();
    println!("OPTIONS:");
    println!("  --json    Print summaries as JSON");
    println!("  --pretty  Pretty-print JSON output");
}
