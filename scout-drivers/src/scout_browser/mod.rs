pub mod behavioral;
pub mod block;
pub mod driver;
pub mod fingerprint;
pub mod page;
pub mod scripted;
pub mod session;
pub mod stealth;
