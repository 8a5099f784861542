//! Persistence for contracts, schedules, disbursements, repayments and the
//! event outbox. The in-memory store is always available; the Postgres store
//! sits behind the `database` feature.

pub mod error;
pub mod memory;
#[cfg(feature = "database")]
pub mod pool;
#[cfg(feature = "database")]
pub mod postgres;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLoanStore;
#[cfg(feature = "database")]
pub use pool::{health_check, init_pool, init_pool_from_config, run_migrations, PoolConfig};
#[cfg(feature = "database")]
pub use postgres::PgLoanStore;
pub use repository::{
    ContractRegistry, DisbursementRepository, LoanStore, OutboxRepository, RepaymentRepository,
    ScheduleStore, UnitOfWork,
};
