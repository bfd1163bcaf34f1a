use std::path::PathBuf;

use clap::{Parser, Subcommand};
use portal_cli::cli::{commands::format_output, run_command, CliCommand, CliConfig, CommandContext};
use portal_cli::tracing_setup::init_tracing;
use portal_core::{Audience, EventKind, FeedTab};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "Inspect and drive the portal notification feed")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short, global = true)]
    pretty: bool,

    /// Path to JSON config file (contains storeDump, user, feed)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// JSON dump of the document store (overrides storeDump)
    #[arg(long, short = 's', global = true)]
    store: Option<PathBuf>,

    /// Write the store back to the dump after a mutating command
    #[arg(long, global = true)]
    save: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the notification dropdown for a user
    Feed {
        /// User ID (defaults to the config's user)
        #[arg(long, short = 'u')]
        user: Option<String>,
        /// Tab to render: all or unread
        #[arg(long, short = 't', default_value = "all", value_parser = parse_tab)]
        tab: FeedTab,
        /// Show everything instead of the first renderLimit events
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Print every frame as the feed changes, until Ctrl-C
    Watch {
        #[arg(long, short = 'u')]
        user: Option<String>,
    },

    /// Count unread notifications
    Unread {
        #[arg(long, short = 'u')]
        user: Option<String>,
    },

    /// Mark one notification read
    MarkRead {
        /// Event ID
        event_id: String,
        #[arg(long, short = 'u')]
        user: Option<String>,
    },

    /// Mark what the dropdown shows as read
    MarkAllRead {
        #[arg(long, short = 'u')]
        user: Option<String>,
        #[arg(long, short = 't', default_value = "all", value_parser = parse_tab)]
        tab: FeedTab,
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Recent activity digest, newest first
    Recent {
        /// Number of entries (defaults to recentActivityLimit)
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Publish a record to the activity log
    Publish {
        /// registration, resource_upload, announcement, schedule or meeting
        #[arg(value_parser = parse_kind)]
        kind: EventKind,
        /// Record title
        title: String,
        /// Record message
        #[arg(long, short = 'm')]
        message: Option<String>,
        /// public, members, staff or admin
        #[arg(long, default_value = "public")]
        audience: String,
    },

    /// Count a view of a resource
    ViewResource {
        /// Resource ID
        resource_id: String,
    },
}

fn parse_tab(value: &str) -> Result<FeedTab, String> {
    FeedTab::parse(value).ok_or_else(|| format!("unknown tab '{}' (expected all or unread)", value))
}

fn parse_kind(value: &str) -> Result<EventKind, String> {
    EventKind::parse(value).ok_or_else(|| format!("unknown event kind '{}'", value))
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(&cli);

    let Some(command) = to_command(cli.command.as_ref(), &config) else {
        eprintln!("No command specified. Use --help for usage.");
        std::process::exit(1);
    };

    let feed_config = match config.feed_config() {
        Ok(feed) => feed,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let dump = cli.store.clone().or_else(|| config.store_dump.clone());
    let ctx = match CommandContext::load(dump.as_deref(), feed_config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let writes = command.writes();
    match run_command(&ctx, command, cli.pretty).await {
        Ok(output) => print_output(&output, cli.pretty),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }

    if cli.save && writes {
        let Some(path) = dump else {
            eprintln!("Warning: --save needs --store or storeDump; nothing written");
            return;
        };
        if let Err(e) = ctx.save(&path) {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Convert the parsed subcommand, filling the user from config.
fn to_command(command: Option<&Commands>, config: &CliConfig) -> Option<CliCommand> {
    let user = |user: &Option<String>| -> String {
        match user.clone().or_else(|| config.user.clone()) {
            Some(user) => user,
            None => {
                eprintln!("Error: no user given (use --user or set \"user\" in the config)");
                std::process::exit(1);
            }
        }
    };

    let command = match command? {
        Commands::Feed { user: u, tab, all } => CliCommand::Feed {
            user_id: user(u),
            tab: *tab,
            show_all: *all,
        },
        Commands::Watch { user: u } => CliCommand::Watch { user_id: user(u) },
        Commands::Unread { user: u } => CliCommand::Unread { user_id: user(u) },
        Commands::MarkRead { event_id, user: u } => CliCommand::MarkRead {
            user_id: user(u),
            event_id: event_id.clone(),
        },
        Commands::MarkAllRead { user: u, tab, all } => CliCommand::MarkAllRead {
            user_id: user(u),
            tab: *tab,
            show_all: *all,
        },
        Commands::Recent { limit } => CliCommand::Recent { limit: *limit },
        Commands::Publish {
            kind,
            title,
            message,
            audience,
        } => CliCommand::Publish {
            kind: *kind,
            audience: Audience::from_field(Some(&Value::String(audience.clone()))),
            title: title.clone(),
            message: message.clone(),
        },
        Commands::ViewResource { resource_id } => CliCommand::ViewResource {
            resource_id: resource_id.clone(),
        },
    };
    Some(command)
}

fn print_output(value: &Value, pretty: bool) {
    match format_output(value, pretty) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load configuration from --config, then the default location.
fn load_config(cli: &Cli) -> CliConfig {
    let path = cli.config.clone().or_else(CliConfig::default_path);
    match path {
        Some(path) => match CliConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default(),
    }
}
