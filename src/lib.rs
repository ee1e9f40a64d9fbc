pub mod config;
pub mod error;
pub mod events;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod task;
pub mod worker;

pub use error::{CadenceError, Result};
pub use node::Node;
