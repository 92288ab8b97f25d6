pub mod config;
pub mod errors;
pub mod trial;

pub use config::*;
pub use errors::*;
pub use trial::*;
