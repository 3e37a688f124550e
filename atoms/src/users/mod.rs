pub mod model;
pub mod store;

pub use model::{User, UserRole};
pub use store::DynamoUserDirectory;
