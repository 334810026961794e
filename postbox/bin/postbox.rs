#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use postbox::controller::{self, Outgoing, Postbox};
use postbox_delivery::{MemoryTransport, Plan, User};

/// Asynchronous mail dispatch with graceful shutdown
#[derive(Parser, Debug)]
#[command(name = "postbox", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to `POSTBOX_CONFIG`, then
    /// ./postbox.config.ron, then /etc/postbox/postbox.config.ron
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run until SIGINT or SIGTERM, then drain the queue and stop
    Run,

    /// Send one message and wait for it to be handled
    Send {
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        /// Plain-text body, used when no template is given
        #[arg(long, conflicts_with = "template")]
        body: Option<String>,

        /// Template name, rendered with --data
        #[arg(long)]
        template: Option<String>,

        /// Template data as JSON, or a plain string
        #[arg(long, requires = "template")]
        data: Option<String>,

        /// Attachment as NAME=PATH. May be repeated
        #[arg(long = "attach", value_parser = controller::parse_attachment)]
        attachments: Vec<(String, PathBuf)>,

        /// Print the composed message instead of delivering it
        #[arg(long)]
        dry_run: bool,
    },

    /// Send the invoice and manual for a new subscription
    Subscribe {
        #[arg(long)]
        user_id: u64,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        #[arg(long)]
        plan: String,

        /// Plan price in cents
        #[arg(long)]
        amount_cents: u64,

        /// Print the composed messages instead of delivering them
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_delivered(transport: &MemoryTransport) {
    for envelope in transport.delivered() {
        println!("{}", envelope.data);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => controller::find_config_file()?,
    };
    let postbox = Postbox::from_file(&config_path)?;

    match cli.command {
        Command::Run => postbox.run().await,
        Command::Send {
            to,
            subject,
            body,
            template,
            data,
            attachments,
            dry_run,
        } => {
            postbox_common::logging::init();
            let outgoing = Outgoing {
                to,
                subject,
                body,
                template,
                data,
                attachments,
            };
            let transport = dry_run.then(MemoryTransport::new);

            let stats = postbox.send(outgoing, transport.clone()).await?;
            transport.as_ref().map_or_else(
                || println!("Delivered {}", stats.delivered),
                print_delivered,
            );
            Ok(())
        }
        Command::Subscribe {
            user_id,
            email,
            first_name,
            last_name,
            plan,
            amount_cents,
            dry_run,
        } => {
            postbox_common::logging::init();
            let user = User {
                id: user_id,
                email,
                first_name,
                last_name,
            };
            let plan = Plan {
                id: 0,
                name: plan,
                amount_cents,
            };
            let transport = dry_run.then(MemoryTransport::new);

            let stats = postbox.subscribe(user, plan, transport.clone()).await?;
            transport.as_ref().map_or_else(
                || println!("Delivered {}", stats.delivered),
                print_delivered,
            );
            Ok(())
        }
    }
}
