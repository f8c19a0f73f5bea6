pub mod events;
pub mod metadata;
pub mod sequencing;
pub mod sessions;
