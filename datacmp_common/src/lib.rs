pub mod comparator;
pub mod config;
pub mod datasource;
pub mod error;
pub mod types;
pub mod value;

pub use comparator::*;
pub use config::*;
pub use datasource::*;
pub use error::*;
pub use types::*;
pub use value::*;
