//! fundmatch-match - Opportunity ranking and match persistence
//!
//! The ranker resolves a user's stored embedding, queries the opportunities
//! collection, and shapes raw cosine similarities into a 20-95 confidence
//! band (an ordinal UX device, not a calibrated probability). Ranked lists
//! are written through to the SQLite match store as a full replacement per
//! user.

pub mod ranker;
pub mod store;

pub use ranker::{ConfidenceCurve, RankError, Ranker};
pub use store::{MatchStore, RecentUser, StoreError};
