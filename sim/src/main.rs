//! Consult Sim - Terminal surface for consultation sessions
//!
//! Drives the consultation core from the command line:
//! - Chat with the simulated doctor, with delivery receipts and typing
//! - Audio/video calls with controls, medium switching and failure injection

mod config;
mod surface;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use consult_core::{
    Advisory, Attachment, CallMedium, CallPhase, ChannelNotifier, Consultation, Error, MediaDevices,
    MessageBody, RandomSource, SeededRandom, ThreadRandom,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::surface::Surface;

/// Consult Sim CLI
#[derive(Parser)]
#[command(name = "consult-sim")]
#[command(about = "Simulated telehealth consultation in the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "consult.toml")]
    config: String,

    /// Seed for reproducible replies, typing delays and link quality
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send messages to the doctor and wait for the replies
    Chat {
        /// Message text, may be given several times
        #[arg(short, long = "message", default_value = "Hello doctor")]
        messages: Vec<String>,

        /// Path of a file to upload after the messages
        #[arg(long)]
        attach: Option<String>,
    },

    /// Place a call and end it after a while
    Call {
        /// audio or video
        #[arg(long, default_value = "video")]
        medium: CallMedium,

        /// Seconds to stay on the call, counted from opening it
        #[arg(long, default_value_t = 10)]
        duration: u64,

        /// Switch to the other medium after this many seconds
        #[arg(long)]
        switch_after: Option<u64>,

        /// Make device acquisition fail
        #[arg(long)]
        fail: bool,
    },

    /// Write the default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "consult_sim=info,consult_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Chat {
        messages: vec!["Hello doctor".to_string()],
        attach: None,
    });

    if let Commands::InitConfig = command {
        Config::default().save(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;

    match command {
        Commands::Chat { messages, attach } => {
            run_chat(&config, cli.seed, messages, attach).await?;
        }
        Commands::Call {
            medium,
            duration,
            switch_after,
            fail,
        } => {
            run_call(&config, cli.seed, medium, duration, switch_after, fail).await?;
        }
        Commands::InitConfig => {}
    }

    Ok(())
}

fn random_source(seed: Option<u64>) -> Arc<dyn RandomSource> {
    match seed {
        Some(seed) => Arc::new(SeededRandom::new(seed)),
        None => Arc::new(ThreadRandom),
    }
}

fn drain_advisories(surface: &Surface, advisories: &mut UnboundedReceiver<Advisory>) {
    while let Ok(advisory) = advisories.try_recv() {
        println!("{}", surface.advisory_line(&advisory));
    }
}

async fn run_chat(
    config: &Config,
    seed: Option<u64>,
    messages: Vec<String>,
    attach: Option<String>,
) -> anyhow::Result<()> {
    let (notifier, mut advisories) = ChannelNotifier::new();
    let consultation = Consultation::builder(config.consultation.clone())
        .random(random_source(seed))
        .notifier(Arc::new(notifier))
        .build()?;

    let mut surface = Surface::new(config.surface.clone());
    let mut updates = consultation.subscribe_conversation();
    let timeout = Duration::from_secs(config.surface.wait_timeout_secs);

    let mut bodies: Vec<MessageBody> = messages.into_iter().map(MessageBody::from).collect();
    if let Some(path) = attach {
        bodies.push(MessageBody::attachment(Attachment::from_locator(&path)));
    }

    for body in bodies {
        if consultation.send_message(body).is_none() {
            anyhow::bail!("Conversation closed before the message could be sent");
        }

        // Each message runs its delivery chain and at most one reply; wait for
        // the conversation to go quiet before sending the next one.
        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    for line in surface.conversation_lines(&snapshot) {
                        println!("{}", line);
                    }
                    if consultation.conversation().pending_timers() == 0 {
                        break;
                    }
                }
                Some(advisory) = advisories.recv() => {
                    println!("{}", surface.advisory_line(&advisory));
                }
                _ = &mut deadline => {
                    tracing::warn!("No reply within {}s, giving up", timeout.as_secs());
                    break;
                }
            }
        }
    }

    drain_advisories(&surface, &mut advisories);
    consultation.teardown();
    Ok(())
}

async fn run_call(
    config: &Config,
    seed: Option<u64>,
    medium: CallMedium,
    duration: u64,
    switch_after: Option<u64>,
    fail: bool,
) -> anyhow::Result<()> {
    let (notifier, mut advisories) = ChannelNotifier::new();
    let mut builder = Consultation::builder(config.consultation.clone())
        .random(random_source(seed))
        .notifier(Arc::new(notifier));
    if fail {
        let devices = |medium: CallMedium| -> consult_core::Result<()> {
            Err(Error::DeviceUnavailable {
                medium,
                reason: "device acquisition disabled by --fail".to_string(),
            })
        };
        let devices: Arc<dyn MediaDevices> = Arc::new(devices);
        builder = builder.devices(devices);
    }
    let consultation = builder.build()?;

    let mut surface = Surface::new(config.surface.clone());
    let mut updates = consultation.subscribe_call();

    if consultation.open_call(medium).is_none() {
        anyhow::bail!("Could not open a {} call", medium);
    }

    let started = Instant::now();
    let end_at = started + Duration::from_secs(duration);
    let mut switch_at = switch_after.map(|secs| started + Duration::from_secs(secs));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                for line in surface.call_lines(snapshot.as_ref()) {
                    println!("{}", line);
                }
                if matches!(snapshot.as_ref().map(|s| s.phase), Some(CallPhase::Failed)) {
                    break;
                }
            }
            Some(advisory) = advisories.recv() => {
                println!("{}", surface.advisory_line(&advisory));
            }
            _ = time::sleep_until(switch_at.unwrap_or(end_at)), if switch_at.is_some() => {
                switch_at = None;
                if let Some(to) = consultation.switch_medium() {
                    tracing::info!("Switched call to {}", to);
                }
            }
            _ = time::sleep_until(end_at) => {
                if !consultation.end_call() {
                    tracing::warn!("Call was not active at the end of the session");
                }
                break;
            }
        }
    }

    let snapshot = consultation.call_snapshot();
    for line in surface.call_lines(snapshot.as_ref()) {
        println!("{}", line);
    }
    drain_advisories(&surface, &mut advisories);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    consultation.teardown();
    Ok(())
}
