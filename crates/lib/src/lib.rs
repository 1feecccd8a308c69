//! Chatrelay core library: addressing rules, completion relay, dispatch driver
//! and the Telegram channel used by the CLI.

pub mod addressing;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod init;
pub mod llm;
pub mod relay;
