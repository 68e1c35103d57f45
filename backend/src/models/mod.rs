pub mod creator;
pub mod invite;
pub mod user;
pub mod waitlist;
