mod messages;
mod record;

pub use messages::*;
pub use record::*;
