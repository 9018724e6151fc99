pub mod question;
pub mod retrieval;
