use anyhow::Result;
use chatrelay::cli::{Cli, Commands, HistoryAction};
use chatrelay::service::DeleteOutcome;
use chatrelay::{build_service, server, utils, Settings};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = Settings::new()?;
    init_tracing(&settings.logging.level);

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                settings.server.bind = bind;
            }
            handle_serve(settings).await
        }
        Commands::History { action } => handle_history(settings, action).await,
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn handle_serve(settings: Settings) -> Result<()> {
    let service = Arc::new(build_service(&settings).await?);
    server::serve(service, &settings.server).await
}

async fn handle_history(settings: Settings, action: HistoryAction) -> Result<()> {
    let service = build_service(&settings).await?;

    match action {
        HistoryAction::List => {
            let summaries = service.conversations().await?;
            if summaries.is_empty() {
                utils::print_info("No conversations stored");
            } else {
                utils::print_header(&format!("{} conversations", summaries.len()));
                for summary in &summaries {
                    utils::print_summary(summary);
                }
            }
        }
        HistoryAction::Show { chat_id } => match service.conversation(&chat_id).await {
            Ok(conversation) => utils::print_conversation(&conversation),
            Err(e) => utils::print_error(&e.to_string()),
        },
        HistoryAction::Delete { chat_id } => match service.delete_conversation(&chat_id).await? {
            DeleteOutcome::Deleted { blobs_removed } => utils::print_success(&format!(
                "Deleted {} ({} images removed)",
                chat_id, blobs_removed
            )),
            DeleteOutcome::NotFound => utils::print_error(&format!("Chat {} not found", chat_id)),
            DeleteOutcome::BlobCleanupFailed(e) => {
                utils::print_error(&format!(
                    "Deleted {} but its images could not be removed: {}",
                    chat_id, e
                ));
                anyhow::bail!("image cleanup failed for {}", chat_id);
            }
        },
    }

    Ok(())
}
