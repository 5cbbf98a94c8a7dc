//! tgwa core library — news formatter, relay gate, WhatsApp link status, channels and
//! the dashboard gateway, used by the `tgwa` CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod news;
pub mod relay;
pub mod status;
