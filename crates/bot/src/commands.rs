// Chat commands: parsing and dispatch
//
// Every command replies through the tracker's notifier, so the same sender
// serves change notifications and command replies.

use std::sync::Arc;

use tracing::{debug, info};

use shelfwatch_core::notifier::DeliveryError;
use shelfwatch_core::{EntityKey, PutOutcome, Scheduler, SubscriberId, Tracker, TrackerError};

const HELP: &str = "\
📚 Commands:

/categories - list known categories
/check <category> - check the product count now
/checkall - check every category
/track <category> - notify me when the count changes
/trackall - track every category
/list - my subscriptions
/remove <category> - stop tracking a category
/add <key> <url> [name] - register a new category page
/status - tracker status
/help - this message

A numeric category id works anywhere a category is expected.
Example: /track darling";

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Categories,
    Check(String),
    CheckAll,
    Track(String),
    TrackAll,
    List,
    Remove(String),
    Add {
        key: String,
        url: String,
        name: Option<String>,
    },
    Status,
    /// Known command without its required arguments
    MissingArgument { usage: &'static str },
    Unknown(String),
}

/// Parse a message text; `None` when the text is not a command
///
/// Accepts `/cmd@botname` as well as `/cmd`.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let name = head
        .split_once('@')
        .map_or(head, |(name, _)| name)
        .to_lowercase();
    let args: Vec<&str> = parts.collect();

    let one_arg = |usage: &'static str, build: fn(String) -> Command| match args.first() {
        Some(arg) => build(arg.to_string()),
        None => Command::MissingArgument { usage },
    };

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "categories" => Command::Categories,
        "check" => one_arg("/check <category>", Command::Check),
        "checkall" => Command::CheckAll,
        "track" => one_arg("/track <category>", Command::Track),
        "trackall" => Command::TrackAll,
        "list" => Command::List,
        "remove" => one_arg("/remove <category>", Command::Remove),
        "add" => match args.as_slice() {
            [key, url, rest @ ..] => Command::Add {
                key: key.to_string(),
                url: url.to_string(),
                name: (!rest.is_empty()).then(|| rest.join(" ")),
            },
            _ => Command::MissingArgument {
                usage: "/add <key> <url> [name]",
            },
        },
        "status" => Command::Status,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

/// Executes commands against the tracker
pub struct CommandHandler {
    tracker: Arc<Tracker>,
    scheduler: Arc<Scheduler>,
}

impl CommandHandler {
    pub fn new(tracker: Arc<Tracker>, scheduler: Arc<Scheduler>) -> Self {
        Self { tracker, scheduler }
    }

    async fn reply(&self, chat: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        self.tracker.notifier().send(chat, text).await
    }

    /// Run `command` for `chat`, sending every reply
    pub async fn handle(&self, chat: SubscriberId, command: Command) -> Result<(), DeliveryError> {
        debug!(chat = %chat, ?command, "Handling command");

        match command {
            Command::Start => {
                let text = format!(
                    "👋 Hi! I watch product counts in shop categories and tell you when they change.\n\n{}",
                    HELP
                );
                self.reply(chat, &text).await
            }
            Command::Help => self.reply(chat, HELP).await,
            Command::Categories => self.reply(chat, &self.categories().await).await,
            Command::Check(key) => {
                self.reply(chat, &format!("🔄 Checking {}...", key)).await?;
                let text = match self.tracker.check_one(&EntityKey::new(key.as_str())).await {
                    Ok(report) => report.message(),
                    Err(e) => failure_text(&key, &e),
                };
                self.reply(chat, &text).await
            }
            Command::CheckAll => {
                self.reply(chat, "🔄 Checking all categories...").await?;
                let text = self.check_all().await;
                self.reply(chat, &text).await
            }
            Command::Track(key) => {
                self.reply(chat, &format!("⏳ Subscribing to {}...", key)).await?;
                let text = self.track(chat, &key).await;
                self.reply(chat, &text).await
            }
            Command::TrackAll => {
                let count = self.tracker.list_entities().await.len();
                self.reply(
                    chat,
                    &format!(
                        "⏳ Subscribing to all {} categories. This takes a while, I pause between requests.",
                        count
                    ),
                )
                .await?;
                let text = self.track_all(chat).await;
                self.reply(chat, &text).await
            }
            Command::List => {
                let text = self.list(chat).await;
                self.reply(chat, &text).await
            }
            Command::Remove(key) => {
                let text = match self.tracker.unsubscribe(chat, &EntityKey::new(key.as_str())).await {
                    Ok(()) => format!("✅ Unsubscribed from {}", key),
                    Err(e) if e.is_not_found() => {
                        format!("❌ You are not subscribed to \"{}\". See /list", key)
                    }
                    Err(e) => format!("❌ Could not unsubscribe: {}", e),
                };
                self.reply(chat, &text).await
            }
            Command::Add { key, url, name } => {
                let text = match self.tracker.add_entity(&key, &url, name.as_deref()).await {
                    Ok(entity) => format!(
                        "✅ Added category {} ({})\nTrack it with /track {}",
                        entity.key, entity.display_name, entity.key
                    ),
                    Err(e) => format!("❌ Could not add category: {}", e),
                };
                self.reply(chat, &text).await
            }
            Command::Status => {
                let text = self.status(chat).await;
                self.reply(chat, &text).await
            }
            Command::MissingArgument { usage } => {
                self.reply(chat, &format!("❌ Missing argument. Usage: {}", usage))
                    .await
            }
            Command::Unknown(name) => {
                self.reply(
                    chat,
                    &format!("❓ Unknown command /{}. Send /help for the list.", name),
                )
                .await
            }
        }
    }

    async fn categories(&self) -> String {
        let entities = self.tracker.list_entities().await;
        if entities.is_empty() {
            return "📋 No categories configured".to_string();
        }
        let mut text = String::from("📋 Categories:\n");
        for entity in entities {
            text.push_str(&format!(
                "\n• {}\n  {}\n  {}\n",
                entity.key,
                entity.display_name,
                entity.locator.describe()
            ));
        }
        text
    }

    async fn check_all(&self) -> String {
        let results = self.tracker.check_all().await;
        let mut text = String::from("📊 Results:\n");
        for (key, outcome) in results {
            let line = match outcome {
                Ok(report) => report.message(),
                Err(e) => failure_text(key.as_str(), &e),
            };
            text.push('\n');
            text.push_str(&line);
            text.push('\n');
        }
        text
    }

    async fn track(&self, chat: SubscriberId, key: &str) -> String {
        match self.tracker.subscribe(chat, &EntityKey::new(key)).await {
            Ok(PutOutcome::Created(sub)) => {
                info!(chat = %chat, entity = %sub.entity.category_key, "New subscription");
                format!(
                    "✅ Subscribed to {}\n📊 Current count: {} items\n⏳ I check every {} minutes and will tell you when the count changes.",
                    sub.entity.category_name,
                    sub.last_product_count,
                    self.scheduler.config().interval_minutes
                )
            }
            Ok(PutOutcome::AlreadySubscribed(sub)) => format!(
                "ℹ️ You are already subscribed to {} (last count: {} items)",
                sub.entity.category_name, sub.last_product_count
            ),
            Err(e) => failure_text(key, &e),
        }
    }

    async fn track_all(&self, chat: SubscriberId) -> String {
        let report = self.tracker.subscribe_all(chat).await;
        let mut text = format!(
            "✅ Subscribed: {} of {}\n",
            report.success_count(),
            report.total()
        );
        if !report.already_subscribed.is_empty() {
            text.push_str(&format!(
                "ℹ️ Already tracked: {}\n",
                report.already_subscribed.len()
            ));
        }
        if !report.failed.is_empty() {
            text.push_str("\n❌ Failed:\n");
            for (key, error) in &report.failed {
                text.push_str(&format!("• {}: {}\n", key, error));
            }
        }
        text
    }

    async fn list(&self, chat: SubscriberId) -> String {
        let subscriptions = match self.tracker.subscriptions(chat).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => return format!("❌ Could not load subscriptions: {}", e),
        };
        if subscriptions.is_empty() {
            return "📭 You have no subscriptions yet.\nUse /track <category> or /trackall to add one."
                .to_string();
        }

        let mut text = String::from("📋 Your subscriptions:\n");
        for sub in subscriptions {
            let checked = sub
                .last_checked
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".to_string());
            text.push_str(&format!(
                "\n• {} ({})\n   📊 {} items\n   🕐 last checked: {}\n",
                sub.entity.category_name, sub.entity.category_key, sub.last_product_count, checked
            ));
        }
        text
    }

    async fn status(&self, chat: SubscriberId) -> String {
        let scheduler = self.scheduler.status().await;
        let mut text = format!(
            "📊 Tracker status:\n\n{}\nInterval: every {} min\nSweeps: {} run, {} skipped\n",
            if scheduler.running {
                "🟢 Running"
            } else {
                "🔴 Stopped"
            },
            scheduler.interval_minutes,
            scheduler.sweeps_completed,
            scheduler.sweeps_skipped
        );

        match self.tracker.status(chat).await {
            Ok(status) => {
                text.push_str(&format!(
                    "Categories: {}\nYour subscriptions: {}\n",
                    status.entities, status.subscriptions
                ));
                if let Some(sweep) = status.last_sweep {
                    text.push_str(&format!(
                        "Last sweep: {} ({} checked, {} failed, {} changed)\n",
                        sweep.finished_at.format("%Y-%m-%d %H:%M UTC"),
                        sweep.entities_checked,
                        sweep.failed.len(),
                        sweep.changed.len()
                    ));
                }
            }
            Err(e) => text.push_str(&format!("❌ Could not load subscriptions: {}\n", e)),
        }
        text
    }
}

/// User-facing text for a failed operation on `key`
fn failure_text(key: &str, error: &TrackerError) -> String {
    match error {
        TrackerError::NotFound(_) => format!(
            "❌ Unknown category \"{}\". See /categories for the list.",
            key
        ),
        TrackerError::Acquisition(e) => {
            format!("😔 Sorry, could not get the count for {}: {}", key, e)
        }
        other => format!("❌ Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("  /list  "), Some(Command::List));
        assert_eq!(parse("/CheckAll"), Some(Command::CheckAll));
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("/"), None);
    }

    #[test]
    fn test_parse_bot_suffix() {
        assert_eq!(
            parse("/track@shelfwatch_bot darling"),
            Some(Command::Track("darling".to_string()))
        );
        assert_eq!(parse("/status@shelfwatch_bot"), Some(Command::Status));
    }

    #[test]
    fn test_parse_missing_argument() {
        assert_eq!(
            parse("/check"),
            Some(Command::MissingArgument {
                usage: "/check <category>"
            })
        );
        assert_eq!(
            parse("/add only-key"),
            Some(Command::MissingArgument {
                usage: "/add <key> <url> [name]"
            })
        );
    }

    #[test]
    fn test_parse_add() {
        assert_eq!(
            parse("/add lipstick https://shop.test/lipstick Red Lipstick"),
            Some(Command::Add {
                key: "lipstick".to_string(),
                url: "https://shop.test/lipstick".to_string(),
                name: Some("Red Lipstick".to_string()),
            })
        );
        assert_eq!(
            parse("/add lipstick https://shop.test/lipstick"),
            Some(Command::Add {
                key: "lipstick".to_string(),
                url: "https://shop.test/lipstick".to_string(),
                name: None,
            })
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse("/subscribe"),
            Some(Command::Unknown("subscribe".to_string()))
        );
    }

    #[test]
    fn test_failure_text() {
        let text = failure_text(
            "darling",
            &TrackerError::Acquisition(shelfwatch_core::AcquisitionError::blocked("captcha")),
        );
        assert!(text.starts_with("😔 Sorry"));
        assert!(text.contains("darling"));

        let text = failure_text("x", &TrackerError::entity_not_found(&EntityKey::new("x")));
        assert!(text.contains("/categories"));
    }
}
