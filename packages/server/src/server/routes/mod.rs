// HTTP routes
pub mod events;
pub mod health;
pub mod metadata;
pub mod sequences;
pub mod sessions;
pub mod stream;

pub use events::*;
pub use health::*;
pub use metadata::*;
pub use sequences::*;
pub use sessions::*;
pub use stream::*;
