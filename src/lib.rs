pub mod audit;
pub mod cache;
pub mod error;
pub mod filter;
pub mod global;
pub mod init;
pub mod middleware;
pub mod moderation;
pub mod orm;
pub mod rate_limit;
pub mod report;
pub mod reputation;
pub mod web;
