//! Database repositories.

mod job;
mod recipient;
mod send_attempt;
mod sender_account;

pub use job::JobRepository;
pub use recipient::RecipientRepository;
pub use send_attempt::SendAttemptRepository;
pub use sender_account::SenderAccountRepository;
