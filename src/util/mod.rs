pub mod filter;
pub mod guard;
pub mod storage;
pub mod timefmt;
