pub mod classifier;
pub mod coordinator;
pub mod executor;
pub mod positions;
pub mod price_feed;
pub mod ratchet;
pub mod webhook;
