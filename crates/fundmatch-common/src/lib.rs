//! Common types and utilities shared across FundMatch crates

pub mod dates;
pub mod hashing;
pub mod types;

pub use dates::parse_date;
pub use hashing::sha256_hex;
pub use types::{CloseDate, FundingMatch, Opportunity, ProfileLink, ResearcherProfile};
