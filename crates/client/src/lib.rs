//! HTTP client for the TradeDesk backend job endpoints.
//!
//! Wraps job submission, status and result retrieval for analysis and
//! backtest runs. Authentication lives in an explicit [`Session`] passed
//! to [`TradeDeskApi`]; 401/403 responses surface as typed errors.

pub mod api;
pub mod session;

pub use api::{ApiError, TradeDeskApi};
pub use session::{ConfigError, Session};
