use crate::storage::{Conversation, ConversationSummary, Role};
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.chars().count()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_summary(summary: &ConversationSummary) {
    let when = summary
        .last_message_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {}  {}",
        summary.chat_id.yellow(),
        when.dimmed(),
        summary.title.bold()
    );
}

pub fn print_conversation(conversation: &Conversation) {
    print_header(&conversation.title);
    for message in &conversation.messages {
        let speaker = match message.role {
            Role::User => "user".green().bold(),
            Role::Assistant => "assistant".magenta().bold(),
        };
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%H:%M:%S").to_string().dimmed(),
            speaker,
            message.content
        );
        if let Some(key) = &message.minio_key {
            println!("    {} {}", "image:".dimmed(), key);
        }
    }
}
