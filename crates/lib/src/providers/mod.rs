//! Inbound message providers (e.g. Telegram).
//!
//! Providers turn webhook bodies into [`InboundMessage`]s; the gateway persists them and
//! announces them on the dashboard channel.

mod inbound;
mod telegram;

pub use inbound::InboundMessage;
pub use telegram::{parse_update, TelegramClient, TelegramUpdate, TELEGRAM_PROVIDER};
