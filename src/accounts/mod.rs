pub mod models;
pub mod postgres;
pub mod store;

pub use models::{
    fill_history, level_for_xp, Account, AnswerCredit, CreditOutcome, ProgressSnapshot, XpHistoryEntry,
};
pub use postgres::PgAccountStore;
pub use store::{AccountStore, InMemoryAccountStore};
