//! Per-guild queued music playback for Discord.
//!
//! The engine lives in [`audio`]: one [`SessionHandle`](audio::SessionHandle)
//! per guild, owned by a [`SessionRegistry`](audio::SessionRegistry). The
//! [`bot`] module wires it to Serenity slash commands and Songbird voice.

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod settings;
pub mod sources;
pub mod storage;
pub mod ui;
