//! Database entities.

pub mod job;
pub mod recipient;
pub mod send_attempt;
pub mod sender_account;

pub use job::Entity as Job;
pub use recipient::Entity as Recipient;
pub use send_attempt::Entity as SendAttempt;
pub use sender_account::Entity as SenderAccount;
