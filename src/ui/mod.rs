//! Discord presentation: embeds for replies and announcements.

pub mod embeds;
