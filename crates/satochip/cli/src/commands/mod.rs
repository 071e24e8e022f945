mod card;
mod keys;

pub(crate) use card::{authentikey_command, setup_command, status_command};
pub(crate) use keys::{sign_message_command, xpub_command};
