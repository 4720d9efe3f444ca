// IMAP module: connection, mailbox session seam and envelope parsing
pub mod conn;
pub mod envelope;
pub mod mailbox;
