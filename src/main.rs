use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use planwire::actor::Actor;
use planwire::codec::simplify;
use planwire::config::RuntimeConfig;
use planwire::{trace, ActorId, Payload, Plan, RemoteReference, Runtime};

/// planwire: record a function once as a plan, replay it anywhere.
#[derive(Parser, Debug)]
#[command(name = "planwire")]
#[command(about = "Deferred, replayable remote-execution plans", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build f(x) = x + 1 as a plan and run it twice
    Demo {
        /// Ship the plan to a second actor before running it
        #[arg(long)]
        remote: bool,

        /// Print the recorded log in simplified form
        #[arg(long)]
        print_log: bool,

        /// Print the plan's lifecycle trace
        #[arg(long)]
        trace: bool,

        /// Runtime config (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn print_error_chain(err: &anyhow::Error) {
    eprintln!("Error: {err}");

    let mut n = 0;
    let mut cur = err.source();
    while let Some(cause) = cur {
        eprintln!("  {n}: {cause}");
        n += 1;
        cur = cause.source();
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Command::Demo {
            remote,
            print_log,
            trace,
            config,
        } => run_demo(remote, print_log, trace, config),
    };
    if let Err(err) = outcome {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn load_config(path: Option<PathBuf>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load_from_file(&path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let config = config
        .with_env_overrides()
        .context("failed to apply environment overrides")?;
    config.validate().context("invalid runtime config")?;
    Ok(config)
}

fn run_demo(remote: bool, print_log: bool, do_trace: bool, config: Option<PathBuf>) -> Result<()> {
    let rt = Runtime::new(load_config(config)?);
    let alice = rt.spawn_worker("alice")?;
    let bob = rt.spawn_worker("bob")?;

    let plan = Plan::new(&rt, alice.id(), "increment", |args| {
        args[0].call("add", vec![Payload::Int(1)])
    })?;

    if remote {
        plan.send(bob.id())
            .context("failed to bind plan to remote location")?;
    }
    let home = if remote { bob.id().clone() } else { alice.id().clone() };

    let inputs = [
        Payload::Seq(vec![Payload::Int(1), Payload::Int(2), Payload::Int(3)]),
        Payload::Seq(vec![Payload::Int(10), Payload::Int(20)]),
    ];
    for (run, value) in inputs.into_iter().enumerate() {
        let x = place(&rt, alice.id(), &home, value.clone())?;
        let y = plan
            .call(std::slice::from_ref(&x))
            .with_context(|| format!("run {} failed", run + 1))?;
        let output = y.get().context("failed to fetch result")?;
        println!(
            "RESULT run={} at={} input={value} output={output}",
            run + 1,
            y.location
        );
    }

    info!(plan = %plan.object_id(), "demo finished");
    println!("PLAN {plan}");

    if print_log {
        println!("LOG fingerprint={}", plan.fingerprint().unwrap_or_default());
        for (idx, message) in plan.log().iter().enumerate() {
            let simplified = serde_json::to_string(&simplify(message)?)?;
            println!("  {idx}. {simplified}");
        }
    }

    if do_trace {
        trace::print_trace(&plan.trace());
    }
    Ok(())
}

fn place(
    rt: &Arc<Runtime>,
    sender: &ActorId,
    home: &ActorId,
    value: Payload,
) -> Result<RemoteReference> {
    let id = rt.ids().next_id();
    rt.send_object(sender, id, value, home)
        .with_context(|| format!("failed to place input at {home}"))
}
