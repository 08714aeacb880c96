pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{OperationId, TenantId, Version};
pub use error::{RepositoryError, Result};
pub use memory::InMemoryOperationRepository;
pub use postgres::PostgresOperationRepository;
pub use query::OperationQuery;
pub use store::{OperationRepository, OperationRepositoryExt};
