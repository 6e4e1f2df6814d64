//! Event payload types shared with the hosting application.

pub mod events;
